use std::sync::atomic::{AtomicU64, Ordering};

/// Submission tallies shared between the receive path and the controller.
#[derive(Debug, Default)]
pub struct RunCounters {
    success: AtomicU64,
    failure: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub success: u64,
    pub failure: u64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn failure(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            success: self.success(),
            failure: self.failure(),
        }
    }
}
