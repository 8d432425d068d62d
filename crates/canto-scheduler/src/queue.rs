//! Strict-priority fetch queues.
//!
//! Four FIFO lanes, one per [`Priority`]. Consumers always take from the
//! highest non-empty lane, so Critical work fully drains before High is
//! touched, and so on down. Normal and Low lanes are bounded and shed their
//! oldest request on overflow; Critical and High are never dropped.

use canto_core::{FetchRequest, Priority};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Result of [`PriorityQueues::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued, and the oldest request in the same lane was dropped.
    QueuedDroppingOldest(FetchRequest),
    /// The queues are closed; the request was discarded.
    Closed,
}

#[derive(Default)]
struct Lanes {
    critical: VecDeque<FetchRequest>,
    high: VecDeque<FetchRequest>,
    normal: VecDeque<FetchRequest>,
    low: VecDeque<FetchRequest>,
    closed: bool,
}

impl Lanes {
    fn lane(&self, priority: Priority) -> &VecDeque<FetchRequest> {
        match priority {
            Priority::Critical => &self.critical,
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<FetchRequest> {
        match priority {
            Priority::Critical => &mut self.critical,
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}

/// Multi-producer, multi-consumer priority queues.
pub struct PriorityQueues {
    lanes: Mutex<Lanes>,
    notify: Notify,
    capacity: usize,
}

impl PriorityQueues {
    /// `capacity` bounds each droppable lane.
    pub fn new(capacity: usize) -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Add a request to the back of its lane.
    pub fn push(&self, request: FetchRequest) -> EnqueueOutcome {
        let outcome = {
            let mut lanes = self.lanes.lock();
            if lanes.closed {
                return EnqueueOutcome::Closed;
            }
            let priority = request.priority;
            let capacity = self.capacity;
            let lane = lanes.lane_mut(priority);
            let dropped = if priority.is_droppable() && lane.len() >= capacity {
                lane.pop_front()
            } else {
                None
            };
            lane.push_back(request);
            match dropped {
                Some(old) => EnqueueOutcome::QueuedDroppingOldest(old),
                None => EnqueueOutcome::Queued,
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Take the oldest ready request from the highest non-empty lane.
    pub fn try_pop(&self) -> Option<FetchRequest> {
        let now = Instant::now();
        let mut lanes = self.lanes.lock();
        for priority in Priority::DESCENDING {
            let lane = lanes.lane_mut(priority);
            if let Some(pos) = lane.iter().position(|r| r.is_ready(now)) {
                return lane.remove(pos);
            }
        }
        None
    }

    /// Wait for the next request. Returns `None` once closed.
    pub async fn pop(&self) -> Option<FetchRequest> {
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return None;
            }
            if let Some(request) = self.try_pop() {
                return Some(request);
            }
            notified.await;
        }
    }

    /// Refuse further pushes and wake every waiting consumer.
    pub fn close(&self) {
        self.lanes.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lanes.lock().closed
    }

    /// Number of queued requests at one priority.
    pub fn len_of(&self, priority: Priority) -> usize {
        self.lanes.lock().lane(priority).len()
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        Priority::DESCENDING
            .iter()
            .map(|p| lanes.lane(*p).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

}
