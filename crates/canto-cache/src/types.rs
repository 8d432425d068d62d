//! Cache statistics.

use serde::Serialize;

/// Level 1 entry counts by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub fetching: usize,
    pub fresh: usize,
    pub stale: usize,
    pub error: usize,
}

/// Level 2 counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub entries: usize,
    pub hits: u64,
    pub builds: u64,
    pub invalidations: u64,
    pub evictions: u64,
}
