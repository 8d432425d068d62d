//! Fetch requests and their priorities.

use crate::address::Address;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Fetch priority, highest first when dequeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Speculative work.
    Low = 0,
    /// Adjacent or prefetch data.
    #[default]
    Normal = 1,
    /// Visible but never fetched; a placeholder is showing.
    High = 2,
    /// Visible and known wrong; refetch after invalidation.
    Critical = 3,
}

impl Priority {
    /// Highest first.
    pub const DESCENDING: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Whether overflowing queues of this priority may shed their oldest work.
    pub fn is_droppable(self) -> bool {
        matches!(self, Priority::Normal | Priority::Low)
    }
}

/// A request to refresh one Level 1 entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub address: Address,
    pub priority: Priority,
    /// Zero-based attempt number.
    pub attempt: u32,
    /// Version claimed by the failed attempt this request retries.
    pub resume: Option<u64>,
    /// Earliest moment the request may run.
    pub not_before: Option<Instant>,
}

impl FetchRequest {
    pub fn new(address: Address, priority: Priority) -> Self {
        Self {
            address,
            priority,
            attempt: 0,
            resume: None,
            not_before: None,
        }
    }

    pub fn critical(address: Address) -> Self {
        Self::new(address, Priority::Critical)
    }

    /// The follow-up request after an attempt that failed under the claim
    /// taken at `claimed_version`.
    pub fn retry_at(&self, claimed_version: u64, not_before: Instant) -> Self {
        Self {
            address: self.address.clone(),
            priority: self.priority,
            attempt: self.attempt + 1,
            resume: Some(claimed_version),
            not_before: Some(not_before),
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert!(!Priority::Critical.is_droppable());
        assert!(Priority::Low.is_droppable());
    }

    #[test]
    fn test_retry_keeps_priority() {
        let now = Instant::now();
        let request = FetchRequest::critical(Address::root(0));
        assert!(request.is_ready(now));

        let retry = request.retry_at(4, now + Duration::from_millis(200));
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.resume, Some(4));
        assert_eq!(retry.priority, Priority::Critical);
        assert!(!retry.is_ready(now));
        assert!(retry.is_ready(now + Duration::from_secs(1)));
    }
}
