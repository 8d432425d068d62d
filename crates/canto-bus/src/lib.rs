//! Event batching and in-process publish/subscribe for Canto.

pub mod batcher;
mod bus;
pub mod config;
pub mod metrics;

pub use batcher::{Batcher, EventIngress, spawn_batcher};
pub use bus::LocalEventBus;
pub use config::{BusConfig, WindowPolicy};
pub use metrics::{BusMetrics, MetricsSnapshot};
