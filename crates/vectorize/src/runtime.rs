//! Host capabilities and cooperative cancellation.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// What the host can offer the pipeline. Probed once and handed to the
/// pipeline constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub worker_threads: usize,
}

impl Capabilities {
    /// Inspect the global worker pool
    pub fn probe() -> Self {
        Self {
            worker_threads: rayon::current_num_threads().max(1),
        }
    }

    /// Force single-threaded stages
    pub fn sequential() -> Self {
        Self { worker_threads: 1 }
    }

    pub fn parallel(&self) -> bool {
        self.worker_threads > 1
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::probe()
    }
}

/// Shared flag checked between pipeline stages
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
