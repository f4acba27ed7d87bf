use std::time::Duration;

use serde::Deserialize;

use crate::context::ExecContext;

/// Executor settings.
///
/// The plain fields deserialize from JSON, e.g.
/// `{"max_pool_size": 4, "auto_clean_quantity": 100}`; missing fields keep
/// their defaults. Zero means "unlimited" for both auto-clean fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// The context every rule run receives.
    #[serde(skip)]
    pub ctx: ExecContext,

    /// Worker pool width. Defaults to the number of available processors.
    pub max_pool_size: usize,

    /// Advisory clean interval, in seconds.
    pub auto_clean_interval: u64,

    /// Advisory number of finished tasks after which a clean is due.
    pub auto_clean_quantity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            ctx: ExecContext::default(),
            max_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            auto_clean_interval: 0,
            auto_clean_quantity: 0,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, ctx: ExecContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn with_auto_clean_interval(mut self, interval: Duration) -> Self {
        self.auto_clean_interval = interval.as_secs();
        self
    }

    pub fn with_auto_clean_quantity(mut self, quantity: usize) -> Self {
        self.auto_clean_quantity = quantity;
        self
    }

    pub fn auto_clean_interval(&self) -> Option<Duration> {
        (self.auto_clean_interval > 0).then(|| Duration::from_secs(self.auto_clean_interval))
    }

    pub fn auto_clean_quantity(&self) -> Option<usize> {
        (self.auto_clean_quantity > 0).then_some(self.auto_clean_quantity)
    }

    /// Takes every positive numeric field of `other`. The context is kept.
    pub fn update(&mut self, other: &ExecutorConfig) {
        if other.max_pool_size > 0 {
            self.max_pool_size = other.max_pool_size;
        }
        if other.auto_clean_interval > 0 {
            self.auto_clean_interval = other.auto_clean_interval;
        }
        if other.auto_clean_quantity > 0 {
            self.auto_clean_quantity = other.auto_clean_quantity;
        }
    }
}
