//! Error types for the chainwatch pipeline.

use thiserror::Error;

/// Errors that can occur while watching, indexing and pruning.
///
/// Most variants are retryable: a job that fails with one of them is put back
/// on its queue and tried again after a backoff. See [`WatcherError::is_retryable`].
#[derive(Debug, Error)]
pub enum WatcherError {
    /// A block cannot be indexed yet because its parent is missing or incomplete.
    #[error("dependency not ready for block {block_number} ({block_hash}): {reason}")]
    DependencyNotReady {
        block_number: u64,
        block_hash: String,
        reason: String,
    },

    /// An event was applied out of sequence within its block.
    #[error(
        "events out of order for block {block_number} ({block_hash}): got index {index}, \
         last processed {last_processed:?}"
    )]
    OrderingViolation {
        block_number: u64,
        block_hash: String,
        index: u32,
        last_processed: Option<u32>,
    },

    /// The upstream data source returned nothing or failed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Indexing is too far ahead of pruning.
    #[error("chain pruning not caught up: latest canonical {latest_canonical}, latest indexed {latest_indexed}")]
    ReorgLagExceeded {
        latest_canonical: u64,
        latest_indexed: u64,
    },

    /// Pruning at this height would resolve a fork that is still too shallow.
    #[error("pruning not safe at height {height}: latest indexed {latest_indexed}")]
    PruneNotSafe { height: u64, latest_indexed: u64 },

    /// A job outlived its TTL before it could complete.
    #[error("job {job_id} expired after {age_secs}s")]
    JobExpired { job_id: u64, age_secs: u64 },

    /// Persisted state is inconsistent; retrying will not help.
    #[error("corruption: {0}")]
    Corruption(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl WatcherError {
    /// Returns `true` if the job that produced this error should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DependencyNotReady { .. }
                | Self::OrderingViolation { .. }
                | Self::UpstreamUnavailable(_)
                | Self::ReorgLagExceeded { .. }
                | Self::PruneNotSafe { .. }
                | Self::Storage(_)
                | Self::Handler { .. }
                | Self::Other(_)
        )
    }

    /// Returns `true` for an out-of-order event application.
    pub fn is_ordering_violation(&self) -> bool {
        matches!(self, Self::OrderingViolation { .. })
    }

    pub(crate) fn dependency(block_number: u64, block_hash: &str, reason: impl Into<String>) -> Self {
        Self::DependencyNotReady {
            block_number,
            block_hash: block_hash.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for WatcherError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
