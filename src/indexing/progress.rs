use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Progress and cancellation for one indexing run.
///
/// Each run owns its own instance. Workers update it after every completed
/// image, and another thread may poll [`IndexProgress::snapshot`] at any time.
#[derive(Debug, Default)]
pub struct IndexProgress {
    counts: Mutex<Counts>,
    stop: AtomicBool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    current: usize,
    total: usize,
}

impl IndexProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(current, total)`
    pub fn snapshot(&self) -> (usize, usize) {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        (counts.current, counts.total)
    }

    /// Ask the run to stop taking new images. Images already in flight finish.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn start(&self, total: usize) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        *counts = Counts { current: 0, total };
    }

    pub(crate) fn advance(&self) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.current += 1;
    }
}
