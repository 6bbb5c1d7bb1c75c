//! Fluent builder API for watcher configuration.
//!
//! # Example
//!
//! ```rust
//! use chainwatch_core::builder::WatcherBuilder;
//! use chainwatch_core::config::EventOrdering;
//!
//! let config = WatcherBuilder::new()
//!     .max_reorg_depth(16)
//!     .start_block(19_000_000)
//!     .event_ordering(EventOrdering::WatchedFirst)
//!     .retry_limit(10)
//!     .build_config()
//!     .unwrap();
//! assert_eq!(config.max_reorg_depth, 16);
//! ```

use crate::config::{EventOrdering, WatcherConfig};
use crate::error::WatcherError;

/// Fluent builder for `WatcherConfig`.
#[derive(Default)]
pub struct WatcherBuilder {
    config: WatcherConfig,
}

impl WatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: WatcherConfig::default(),
        }
    }

    /// Set the reorg depth after which a fork is assumed irreversible.
    pub fn max_reorg_depth(mut self, depth: u64) -> Self {
        self.config.max_reorg_depth = depth;
        self
    }

    /// Set the cold-start block.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = Some(block);
        self
    }

    /// Set the upstream polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn event_ordering(mut self, ordering: EventOrdering) -> Self {
        self.config.event_ordering = ordering;
        self
    }

    pub fn prefetch_events(mut self, enabled: bool) -> Self {
        self.config.prefetch_events = enabled;
        self
    }

    pub fn batch_event_updates(mut self, enabled: bool) -> Self {
        self.config.batch_event_updates = enabled;
        self
    }

    pub fn ordering_violation_alert_after(mut self, attempts: u32) -> Self {
        self.config.ordering_violation_alert_after = attempts;
        self
    }

    /// Set the worker count for both queues.
    pub fn concurrency(mut self, block: usize, event: usize) -> Self {
        self.config.queue.block_concurrency = block;
        self.config.queue.event_concurrency = event;
        self
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.config.queue.retry_limit = limit;
        self
    }

    /// Set the retry backoff bounds in milliseconds.
    pub fn retry_backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.queue.retry_initial_backoff_ms = initial;
        self.config.queue.retry_max_backoff_ms = max;
        self
    }

    /// Set the job TTL in seconds.
    pub fn expire_after_secs(mut self, secs: u64) -> Self {
        self.config.queue.expire_after_secs = secs;
        self
    }

    /// Validate and build the `WatcherConfig`.
    pub fn build_config(self) -> Result<WatcherConfig, WatcherError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
