//! Configuration for batching and delivery.

use canto_core::Category;
use std::collections::HashMap;
use std::time::Duration;

/// Batch window length per category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPolicy {
    windows: HashMap<Category, Duration>,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        let windows = Category::ALL
            .iter()
            .map(|category| (*category, default_window(*category)))
            .collect();
        Self { windows }
    }
}

fn default_window(category: Category) -> Duration {
    match category {
        Category::Interaction => Duration::from_millis(16),
        Category::Presence => Duration::from_millis(33),
        Category::CacheInvalidation => Duration::from_millis(50),
        Category::Document | Category::Notification => Duration::from_millis(100),
        Category::System => Duration::ZERO,
    }
}

impl WindowPolicy {
    /// Window for `category`. Zero means publish immediately.
    pub fn window(&self, category: Category) -> Duration {
        self.windows
            .get(&category)
            .copied()
            .unwrap_or_else(|| default_window(category))
    }

    /// Override the window of one category.
    pub fn with_window(mut self, category: Category, window: Duration) -> Self {
        self.windows.insert(category, window);
        self
    }
}

/// Configuration for the event bus and batcher.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Per-category batch windows.
    pub windows: WindowPolicy,
    /// Maximum batch deliveries running at once across all subscribers.
    pub delivery_concurrency: usize,
    /// Capacity of the ingress channel.
    pub ingress_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            windows: WindowPolicy::default(),
            delivery_concurrency: 8,
            ingress_buffer: 1024,
        }
    }
}

impl BusConfig {
    /// Set the window policy.
    pub fn with_windows(mut self, windows: WindowPolicy) -> Self {
        self.windows = windows;
        self
    }

    /// Set the delivery pool size.
    pub fn with_delivery_concurrency(mut self, n: usize) -> Self {
        self.delivery_concurrency = n.max(1);
        self
    }

    /// Set the ingress channel capacity.
    pub fn with_ingress_buffer(mut self, n: usize) -> Self {
        self.ingress_buffer = n.max(1);
        self
    }
}
