//! Configuration for the fetch scheduler.

use crate::backoff::BackoffPolicy;

/// Configuration for the fetch scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of fetch workers.
    pub workers: usize,
    /// Attempts per request before the entry is marked `Error`.
    pub max_attempts: u32,
    /// Retry delay policy.
    pub backoff: BackoffPolicy,
    /// Bound on each Normal and Low queue; oldest work is shed beyond it.
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
            queue_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the attempt ceiling.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the droppable queue bound.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}
