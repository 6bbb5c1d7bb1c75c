//! Job handlers for both queues and the completion chain.
//!
//! ```text
//! block-processing:  Index ──► BlockProcessor        Prune ──► ChainPruner
//! event-processing:  Events ──► EventProcessor      Contract ──► Indexer::cache_contract
//!
//! Events completed ──► advance latest indexed
//!                  ├─► push Prune (priority + 1) when lag > max reorg depth
//!                  ├─► broadcast BlockProgress
//!                  └─► push Index for the next height while the chain head is ahead
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::block_processor::BlockProcessor;
use crate::error::WatcherError;
use crate::event_processor::EventProcessor;
use crate::job::{Job, JobOutcome, JobPayload, QUEUE_BLOCK_PROCESSING};
use crate::pruner::ChainPruner;
use crate::queue::{CompletionHandler, JobHandler, JobQueue};
use crate::store::Store;
use crate::types::{BlockProgress, SyncPointer};
use crate::upstream::{ChainSource, Indexer};

// ─── Job handlers ─────────────────────────────────────────────────────────────

/// Handles index and prune jobs.
pub struct BlockJobRunner {
    processor: BlockProcessor,
    pruner: ChainPruner,
}

impl BlockJobRunner {
    pub fn new(processor: BlockProcessor, pruner: ChainPruner) -> Self {
        Self { processor, pruner }
    }
}

#[async_trait]
impl JobHandler for BlockJobRunner {
    async fn handle(&self, job: &Job, queue: &JobQueue) -> Result<(), WatcherError> {
        match &job.payload {
            JobPayload::Index(block) => {
                self.processor.index_block(job, block, queue).await?;
                Ok(())
            }
            JobPayload::Prune { prune_block_height } => {
                self.pruner.prune(*prune_block_height).await?;
                Ok(())
            }
            other => Err(WatcherError::Other(format!(
                "unexpected {} job on block queue",
                other.kind()
            ))),
        }
    }
}

/// Handles event and contract jobs.
pub struct EventJobRunner {
    processor: EventProcessor,
    indexer: Arc<dyn Indexer>,
}

impl EventJobRunner {
    pub fn new(processor: EventProcessor, indexer: Arc<dyn Indexer>) -> Self {
        Self { processor, indexer }
    }
}

#[async_trait]
impl JobHandler for EventJobRunner {
    async fn handle(&self, job: &Job, _queue: &JobQueue) -> Result<(), WatcherError> {
        match &job.payload {
            JobPayload::Events { block_hash } => {
                self.processor.process_block_events(block_hash).await?;
                Ok(())
            }
            JobPayload::Contract(contract) => {
                debug!(address = %contract.address, kind = %contract.kind, "caching contract");
                self.indexer.cache_contract(contract).await
            }
            other => Err(WatcherError::Other(format!(
                "unexpected {} job on event queue",
                other.kind()
            ))),
        }
    }
}

// ─── Completion handlers ──────────────────────────────────────────────────────

/// Logs terminal outcomes of block-processing jobs.
pub struct BlockJobCompletion;

#[async_trait]
impl CompletionHandler for BlockJobCompletion {
    async fn on_complete(&self, outcome: &JobOutcome, _queue: &JobQueue) -> Result<(), WatcherError> {
        if outcome.failed() {
            error!(
                job_id = outcome.job.id,
                kind = outcome.job.payload.kind(),
                status = ?outcome.status,
                error = outcome.error.as_deref().unwrap_or_default(),
                "block job did not complete"
            );
        } else if let JobPayload::Prune { prune_block_height } = outcome.job.payload {
            debug!(prune_block_height, "prune job completed");
        }
        Ok(())
    }
}

/// Advances the sync status once a block's events are all applied and
/// schedules the follow-up work.
pub struct EventJobCompletion {
    store: Arc<dyn Store>,
    upstream: Arc<dyn ChainSource>,
    max_reorg_depth: u64,
    completions: broadcast::Sender<BlockProgress>,
}

impl EventJobCompletion {
    pub fn new(
        store: Arc<dyn Store>,
        upstream: Arc<dyn ChainSource>,
        max_reorg_depth: u64,
        completions: broadcast::Sender<BlockProgress>,
    ) -> Self {
        Self {
            store,
            upstream,
            max_reorg_depth,
            completions,
        }
    }

    async fn block_completed(
        &self,
        progress: BlockProgress,
        priority: i32,
        queue: &JobQueue,
    ) -> Result<(), WatcherError> {
        let status = self
            .store
            .advance_sync_status(SyncPointer::LatestIndexed, &progress.pointer(), false)
            .await?;

        if status.reorg_lag() > self.max_reorg_depth {
            queue.push_unique(
                QUEUE_BLOCK_PROCESSING,
                JobPayload::Prune {
                    prune_block_height: status.latest_canonical.number + 1,
                },
                priority + 1,
            )?;
        }

        let next = progress.block_number + 1;
        // Receivers may come and go; a send with none attached is fine.
        let _ = self.completions.send(progress);

        if status.chain_head.number >= next && self.store.blocks_at_height(next, false).await?.is_empty() {
            let blocks = self.upstream.blocks_by_number(next).await?;
            for block in &blocks {
                queue.push_unique(QUEUE_BLOCK_PROCESSING, JobPayload::index(block), 0)?;
            }
            if !blocks.is_empty() {
                debug!(block_number = next, count = blocks.len(), "continuing to next height");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CompletionHandler for EventJobCompletion {
    async fn on_complete(&self, outcome: &JobOutcome, queue: &JobQueue) -> Result<(), WatcherError> {
        if outcome.failed() {
            error!(
                job_id = outcome.job.id,
                kind = outcome.job.payload.kind(),
                status = ?outcome.status,
                error = outcome.error.as_deref().unwrap_or_default(),
                "event job did not complete"
            );
            return Ok(());
        }
        let JobPayload::Events { block_hash } = &outcome.job.payload else {
            return Ok(());
        };
        let Some(progress) = self.store.block_progress(block_hash).await? else {
            return Ok(());
        };
        if !progress.is_complete || progress.is_pruned {
            return Ok(());
        }
        debug!(block_number = progress.block_number, block_hash = %progress.block_hash, "block indexed");
        self.block_completed(progress, outcome.job.priority, queue).await
    }
}
