use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Outstanding record count would go negative")]
pub struct CounterUnderflow;

/// Unacknowledged records of the open batch.
#[derive(Debug, Default)]
pub struct OutstandingCounter {
    remaining: AtomicUsize,
}

impl OutstandingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self, size: usize) {
        self.remaining.store(size, Ordering::Release);
    }

    /// Returns the count left after this decrement. Never wraps below zero.
    pub fn decrement(&self) -> Result<usize, CounterUnderflow> {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|previous| previous - 1)
            .map_err(|_| CounterUnderflow)
    }

    pub fn get(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}
