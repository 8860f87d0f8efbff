use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::time::Instant;

/// Admits iterations for a constant-VU scenario until its deadline or an explicit stop.
#[derive(Debug)]
pub struct IterationGate {
    counter: AtomicU64,
    deadline: Instant,
    stopped: AtomicBool,
}

impl IterationGate {
    pub fn new(deadline: Instant) -> Self {
        Self {
            counter: AtomicU64::new(0),
            deadline,
            stopped: AtomicBool::new(false),
        }
    }

    /// No further iterations are admitted after this call.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Admits one more iteration and returns its scenario-wide id, or `None` once closed.
    pub fn next(&self) -> Option<u64> {
        if self.stopped.load(Ordering::Acquire) || Instant::now() >= self.deadline {
            return None;
        }

        Some(self.counter.fetch_add(1, Ordering::Relaxed))
    }
}
