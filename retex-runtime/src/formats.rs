//! Texture formats and backend format capabilities.

/// Pixel formats a texture upload can arrive in.
///
/// Only the bit width matters to the cache; decoding is the render
/// backend's problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgb565,
    Rgba5551,
    Rgba4444,
    Rgba8888,
    Clut4,
    Clut8,
    Clut16,
    Clut32,
    Dxt1,
    Dxt3,
    Dxt5,
}

impl TextureFormat {
    /// Bits of source data per pixel, used to size hashed regions.
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            Self::Clut4 | Self::Dxt1 => 4,
            Self::Clut8 | Self::Dxt3 | Self::Dxt5 => 8,
            Self::Rgb565 | Self::Rgba5551 | Self::Rgba4444 | Self::Clut16 => 16,
            Self::Rgba8888 | Self::Clut32 => 32,
        }
    }
}

/// Compressed-format support flags of the rendering backend.
///
/// Captured by value at construction so replacement handles never hold a
/// live reference into the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatSupport {
    pub bc123: bool,
    pub astc: bool,
    pub bc7: bool,
    pub etc2: bool,
}
