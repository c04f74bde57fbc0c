//! Emulated memory access.
//!
//! The cache only ever reads pixel data out of the emulated address space;
//! the trait keeps it decoupled from whichever memory manager the frontend
//! runs.

/// Read-only view into the emulated address space.
pub trait MemoryAccessor {
    /// Borrow `len` bytes at `addr`, or `None` if the range is unmapped.
    fn read_bytes(&self, addr: u32, len: usize) -> Option<&[u8]>;
}

/// Vector-backed memory region starting at a fixed base address.
///
/// Useful for tests and for frontends that keep guest RAM in one flat
/// allocation.
pub struct VecMemory {
    base: u32,
    data: Vec<u8>,
}

impl VecMemory {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size],
        }
    }

    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) {
        let offset = (addr - self.base) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl MemoryAccessor for VecMemory {
    fn read_bytes(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let offset = addr.checked_sub(self.base)? as usize;
        self.data.get(offset..offset + len)
    }
}
