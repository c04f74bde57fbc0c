//! Fire-and-forget background task execution.
//!
//! Save tasks are dispatched to a small worker pool and never waited on:
//! there is no cancellation, no completion callback and no backpressure.
//! Tasks classify themselves so an embedder with its own thread manager can
//! route I/O-bound work away from interactive workers; the built-in pool
//! only uses the priority.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Whether a task mostly burns CPU or mostly blocks on storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Cpu,
    IoBlocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    High,
    Normal,
    Low,
}

/// A detached unit of background work.
pub trait Task: Send {
    fn task_type(&self) -> TaskType;
    fn priority(&self) -> TaskPriority;
    fn run(self: Box<Self>);
}

/// Sink for detached tasks.
pub trait TaskScheduler: Send + Sync {
    fn enqueue(&self, task: Box<dyn Task>);
}

struct PoolQueue {
    normal: VecDeque<Box<dyn Task>>,
    low: VecDeque<Box<dyn Task>>,
}

struct PoolInner {
    queue: Mutex<PoolQueue>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// Worker pool executing tasks on detached threads.
///
/// Low-priority tasks only run when nothing else is queued. Dropping the
/// pool stops the workers after their current task; anything still queued is
/// discarded, matching the best-effort shutdown contract of save tasks.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Self {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(PoolQueue {
                normal: VecDeque::new(),
                low: VecDeque::new(),
            }),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..num_workers.max(1))
            .map(|i| {
                let inner = inner.clone();
                std::thread::Builder::new()
                    .name(format!("retex-worker-{}", i))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { inner, workers }
    }
}

fn worker_loop(inner: &PoolInner) {
    let mut queue = inner.queue.lock().expect("worker queue lock poisoned");
    loop {
        if let Some(task) = queue.normal.pop_front().or_else(|| queue.low.pop_front()) {
            drop(queue);
            task.run();
            queue = inner.queue.lock().expect("worker queue lock poisoned");
            continue;
        }
        if inner.shutdown.load(Ordering::Acquire) {
            return;
        }
        let (guard, _) = inner
            .available
            .wait_timeout(queue, Duration::from_millis(100))
            .expect("worker queue lock poisoned");
        queue = guard;
    }
}

impl TaskScheduler for WorkerPool {
    fn enqueue(&self, task: Box<dyn Task>) {
        let mut queue = self.inner.queue.lock().expect("worker queue lock poisoned");
        match task.priority() {
            TaskPriority::High => queue.normal.push_front(task),
            TaskPriority::Normal => queue.normal.push_back(task),
            TaskPriority::Low => queue.low.push_back(task),
        }
        drop(queue);
        self.inner.available.notify_one();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
