//! Two-level rendering cache for Canto.
//!
//! Level 1 ([`CacheManager`]) holds raw payloads fetched from the remote
//! source and may be read from any thread. Level 2 ([`ExecutionCache`]) holds
//! artifacts derived from Level 1 payloads and is owned by the affinity thread.

pub mod execution;
pub mod manager;
pub mod types;

pub use execution::ExecutionCache;
pub use manager::{CacheManager, CacheView, StaleOutcome, UpdateOutcome};
pub use types::{CacheStats, ExecutionStats};
