//! Priority fetch scheduling for Canto.

pub mod backoff;
pub mod config;
pub mod metrics;
pub mod queue;
pub mod scheduler;

pub use backoff::BackoffPolicy;
pub use config::SchedulerConfig;
pub use metrics::{SchedulerMetrics, SchedulerMetricsSnapshot};
pub use queue::{EnqueueOutcome, PriorityQueues};
pub use scheduler::FetchScheduler;
