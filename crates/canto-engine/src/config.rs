//! Engine configuration.

use canto_bus::{BusConfig, WindowPolicy};
use canto_core::{Category, Error, Result};
use canto_notify::NotifierConfig;
use canto_scheduler::{BackoffPolicy, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Supported fetch worker range.
pub const MIN_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 6;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fetch worker count. Clamped to 4..=6 unless `allow_any_worker_count`.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub allow_any_worker_count: bool,
    /// Fetch attempts before an entry is marked `Error`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Jitter as a fraction of the delay.
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
    /// Bound on each Normal and Low fetch queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Concurrent batch deliveries on the bus.
    #[serde(default = "default_delivery_concurrency")]
    pub delivery_concurrency: usize,
    #[serde(default = "default_ingress_buffer")]
    pub ingress_buffer: usize,
    /// Level 2 artifacts kept before least recently used are evicted.
    #[serde(default = "default_l2_capacity")]
    pub l2_capacity: usize,
    /// Batch window overrides in milliseconds.
    #[serde(default)]
    pub windows: BTreeMap<Category, u64>,
    /// Failure notifiers. Empty means log only.
    #[serde(default)]
    pub notifiers: Vec<NotifierConfig>,
}

fn default_workers() -> usize {
    MIN_WORKERS
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_cap_ms() -> u64 {
    5000
}

fn default_backoff_jitter() -> f64 {
    0.2
}

fn default_queue_capacity() -> usize {
    256
}

fn default_delivery_concurrency() -> usize {
    8
}

fn default_ingress_buffer() -> usize {
    1024
}

fn default_l2_capacity() -> usize {
    512
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            allow_any_worker_count: false,
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            backoff_jitter: default_backoff_jitter(),
            queue_capacity: default_queue_capacity(),
            delivery_concurrency: default_delivery_concurrency(),
            ingress_buffer: default_ingress_buffer(),
            l2_capacity: default_l2_capacity(),
            windows: BTreeMap::new(),
            notifiers: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values no session can run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(Error::Config(format!(
                "backoff_jitter must be within 0..=1, got {}",
                self.backoff_jitter
            )));
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(Error::Config(format!(
                "backoff_base_ms ({}) exceeds backoff_cap_ms ({})",
                self.backoff_base_ms, self.backoff_cap_ms
            )));
        }
        if self.l2_capacity == 0 {
            return Err(Error::Config("l2_capacity must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Worker count actually used.
    pub fn effective_workers(&self) -> usize {
        if self.allow_any_worker_count {
            return self.workers.max(1);
        }
        let clamped = self.workers.clamp(MIN_WORKERS, MAX_WORKERS);
        if clamped != self.workers {
            warn!(
                requested = self.workers,
                using = clamped,
                "Worker count outside supported range"
            );
        }
        clamped
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
            jitter: self.backoff_jitter,
        }
    }

    pub fn window_policy(&self) -> WindowPolicy {
        self.windows
            .iter()
            .fold(WindowPolicy::default(), |policy, (category, millis)| {
                policy.with_window(*category, Duration::from_millis(*millis))
            })
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig::default()
            .with_windows(self.window_policy())
            .with_delivery_concurrency(self.delivery_concurrency)
            .with_ingress_buffer(self.ingress_buffer)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_workers(self.effective_workers())
            .with_max_attempts(self.max_attempts)
            .with_backoff(self.backoff())
            .with_queue_capacity(self.queue_capacity)
    }
}
