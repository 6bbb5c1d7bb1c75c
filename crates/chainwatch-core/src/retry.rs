//! Requeue decision for failed jobs.
//!
//! A job that fails with a retryable error goes back on its queue after
//! `initial * multiplier^(attempt - 1)`, capped at the configured maximum,
//! until it has failed `retry_limit + 1` times.

use std::time::Duration;

use crate::config::QueueConfig;
use crate::error::WatcherError;
use crate::job::Job;

#[derive(Debug, Clone)]
pub struct JobBackoff {
    retry_limit: u32,
    initial_ms: f64,
    max_ms: f64,
    multiplier: f64,
}

impl JobBackoff {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            retry_limit: config.retry_limit,
            initial_ms: config.retry_initial_backoff_ms as f64,
            max_ms: config.retry_max_backoff_ms as f64,
            multiplier: config.retry_multiplier,
        }
    }

    /// How long `job` waits before its next run, or `None` if it has failed
    /// for good. `job.attempt` counts the failure that just happened.
    pub fn retry_after(&self, job: &Job, err: &WatcherError) -> Option<Duration> {
        if !err.is_retryable() || job.attempt == 0 || job.attempt > self.retry_limit {
            return None;
        }
        let delay_ms = self.initial_ms * self.multiplier.powi((job.attempt - 1) as i32);
        Some(Duration::from_millis(delay_ms.min(self.max_ms) as u64))
    }
}
