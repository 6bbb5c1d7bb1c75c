//! Watcher and job-queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WatcherError;

/// Order in which a block's events are handed to the indexer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrdering {
    /// Strict ordinal order.
    #[default]
    Sequential,
    /// Events of contracts watched when the block started go first; events of
    /// contracts that became watched during the block are replayed after them.
    WatchedFirst,
}

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Concurrent workers on the block-processing queue.
    pub block_concurrency: usize,
    /// Concurrent workers on the event-processing queue.
    pub event_concurrency: usize,
    /// Retries after the first failed attempt.
    pub retry_limit: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub retry_multiplier: f64,
    /// Jobs older than this are expired instead of run.
    pub expire_after_secs: u64,
    /// How long an idle worker sleeps before looking for work again.
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            block_concurrency: 1,
            event_concurrency: 1,
            retry_limit: 20,
            retry_initial_backoff_ms: 500,
            retry_max_backoff_ms: 30_000,
            retry_multiplier: 2.0,
            expire_after_secs: 60 * 60,
            poll_interval_ms: 250,
        }
    }
}

impl QueueConfig {
    pub fn expire_after(&self) -> Duration {
        Duration::from_secs(self.expire_after_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuration for a watcher instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// How deep a fork may be before it is assumed irreversible.
    pub max_reorg_depth: u64,
    /// Block to start from on a cold start. `None` = block 0.
    pub start_block: Option<u64>,
    /// Wait between upstream polls while a height is not yet available.
    pub poll_interval_ms: u64,
    pub event_ordering: EventOrdering,
    /// Keep fetched events in memory and persist them when the block completes.
    pub prefetch_events: bool,
    /// Persist block counters once per block instead of once per event.
    pub batch_event_updates: bool,
    /// Attempts after which an ordering violation is treated as corruption.
    pub ordering_violation_alert_after: u32,
    /// Delay before fetching a newly seen block's events.
    pub job_delay_ms: u64,
    pub queue: QueueConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            max_reorg_depth: 16,
            start_block: None,
            poll_interval_ms: 1000,
            event_ordering: EventOrdering::Sequential,
            prefetch_events: false,
            batch_event_updates: false,
            ordering_violation_alert_after: 5,
            job_delay_ms: 0,
            queue: QueueConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Parse a JSON config document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, WatcherError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| WatcherError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WatcherError> {
        if self.max_reorg_depth == 0 {
            return Err(WatcherError::Config("max_reorg_depth must be at least 1".into()));
        }
        if self.queue.block_concurrency == 0 || self.queue.event_concurrency == 0 {
            return Err(WatcherError::Config("queue concurrency must be at least 1".into()));
        }
        if self.queue.retry_initial_backoff_ms > self.queue.retry_max_backoff_ms {
            return Err(WatcherError::Config(format!(
                "retry_initial_backoff_ms ({}) exceeds retry_max_backoff_ms ({})",
                self.queue.retry_initial_backoff_ms, self.queue.retry_max_backoff_ms
            )));
        }
        if self.queue.retry_multiplier < 1.0 {
            return Err(WatcherError::Config("retry_multiplier must be >= 1.0".into()));
        }
        if self.ordering_violation_alert_after == 0 {
            return Err(WatcherError::Config(
                "ordering_violation_alert_after must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_delay(&self) -> Duration {
        Duration::from_millis(self.job_delay_ms)
    }
}
