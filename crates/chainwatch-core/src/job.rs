//! Job payloads and lifecycle records.
//!
//! Each payload kind belongs to exactly one queue; pushing a payload onto the
//! wrong queue is rejected when the job is built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::WatcherError;
use crate::types::{BlockHeader, Contract};

/// Queue driving ancestry resolution, indexing and pruning.
pub const QUEUE_BLOCK_PROCESSING: &str = "block-processing";
/// Queue driving ordered event application.
pub const QUEUE_EVENT_PROCESSING: &str = "event-processing";

/// Payload of an index job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBlock {
    pub block_hash: String,
    pub block_number: u64,
    pub parent_hash: String,
    pub block_timestamp: i64,
}

impl IndexBlock {
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            hash: self.block_hash.clone(),
            number: self.block_number,
            parent_hash: self.parent_hash.clone(),
            timestamp: self.block_timestamp,
        }
    }
}

impl From<&BlockHeader> for IndexBlock {
    fn from(header: &BlockHeader) -> Self {
        Self {
            block_hash: header.hash.clone(),
            block_number: header.number,
            parent_hash: header.parent_hash.clone(),
            block_timestamp: header.timestamp,
        }
    }
}

/// What a job asks its handler to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Resolve ancestry for a block, persist its progress and fetch its events.
    Index(IndexBlock),
    /// Resolve the contested height `prune_block_height`.
    Prune { prune_block_height: u64 },
    /// Apply the events of a block in order.
    Events { block_hash: String },
    /// Refresh the in-memory watched-contract cache.
    Contract(Contract),
}

impl JobPayload {
    pub fn index(header: &BlockHeader) -> Self {
        Self::Index(IndexBlock::from(header))
    }

    /// The queue this payload kind belongs to.
    pub fn queue(&self) -> &'static str {
        match self {
            Self::Index(_) | Self::Prune { .. } => QUEUE_BLOCK_PROCESSING,
            Self::Events { .. } | Self::Contract(_) => QUEUE_EVENT_PROCESSING,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Index(_) => "index",
            Self::Prune { .. } => "prune",
            Self::Events { .. } => "events",
            Self::Contract(_) => "contract",
        }
    }
}

/// A unit of work on a queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub queue: String,
    pub payload: JobPayload,
    /// Higher priority dequeues first.
    pub priority: i32,
    /// Failed attempts so far.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub(crate) created: Instant,
    pub(crate) not_before: Instant,
}

impl Job {
    pub(crate) fn new(
        id: u64,
        queue: &str,
        payload: JobPayload,
        priority: i32,
    ) -> Result<Self, WatcherError> {
        if payload.queue() != queue {
            return Err(WatcherError::Other(format!(
                "{} job cannot be pushed to queue '{queue}'",
                payload.kind()
            )));
        }
        let now = Instant::now();
        Ok(Self {
            id,
            queue: queue.to_string(),
            payload,
            priority,
            attempt: 0,
            created_at: Utc::now(),
            created: now,
            not_before: now,
        })
    }

    pub(crate) fn is_ready(&self, now: Instant) -> bool {
        self.not_before <= now
    }

    /// Age of the job since it was first pushed.
    pub fn age(&self) -> std::time::Duration {
        self.created.elapsed()
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    /// Failed with a terminal error or after exhausting retries.
    Failed,
    /// Outlived its TTL.
    Expired,
}

/// Delivered to completion handlers once a job's outcome is known.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: Job,
    pub status: JobStatus,
    /// Rendered error of the last attempt, if any.
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn failed(&self) -> bool {
        self.status != JobStatus::Completed
    }
}
