//! Block processor: ancestry resolution, progress persistence and event fetching.
//!
//! ```text
//! Unseen ──► ParentPending ──► Saved ──► EventsPending ──► Complete
//!                 │  parent missing:    push parent (priority + 1), abort
//!                 │  parent incomplete: re-push parent,             abort
//! ```
//!
//! Every abort is a retryable error, so the job comes back once the
//! dependency has had a chance to settle.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::error::WatcherError;
use crate::job::{IndexBlock, Job, JobPayload, QUEUE_BLOCK_PROCESSING, QUEUE_EVENT_PROCESSING};
use crate::queue::JobQueue;
use crate::store::Store;
use crate::types::{BlockHeader, BlockProgress, Event, SyncStatus};
use crate::upstream::{ChainSource, EventCache, Indexer};

pub struct BlockProcessor {
    config: WatcherConfig,
    store: Arc<dyn Store>,
    upstream: Arc<dyn ChainSource>,
    indexer: Arc<dyn Indexer>,
    cache: Arc<EventCache>,
}

impl BlockProcessor {
    pub fn new(
        config: WatcherConfig,
        store: Arc<dyn Store>,
        upstream: Arc<dyn ChainSource>,
        indexer: Arc<dyn Indexer>,
        cache: Arc<EventCache>,
    ) -> Self {
        Self {
            config,
            store,
            upstream,
            indexer,
            cache,
        }
    }

    /// Run an index job for `block`.
    ///
    /// Returns the persisted progress row, or `None` if the block sits on a
    /// branch below the canonical cursor and was skipped.
    pub async fn index_block(
        &self,
        job: &Job,
        block: &IndexBlock,
        queue: &JobQueue,
    ) -> Result<Option<BlockProgress>, WatcherError> {
        let header = block.header();
        let status = match self.store.sync_status().await? {
            Some(status) => status,
            None => {
                info!(block_number = header.number, block_hash = %header.hash, "bootstrapping sync status");
                self.store.init_sync_status(&header.pointer()).await?
            }
        };

        self.check_reorg_lag(&status, job, queue)?;

        if header.hash != status.latest_canonical.hash {
            if header.number <= status.latest_canonical.number {
                warn!(
                    block_number = header.number,
                    block_hash = %header.hash,
                    canonical = %status.latest_canonical,
                    "block on a resolved fork, skipping"
                );
                return Ok(None);
            }
            self.resolve_parent(&header, job, queue).await?;
        }

        let progress = match self.store.block_progress(&header.hash).await? {
            Some(existing) => existing,
            None => self.save_block(&header).await?,
        };

        self.indexer.process_block(&progress).await?;

        // Always hand the block to the event queue; a block that is already
        // complete is acknowledged there so the completion chain still fires.
        queue.push_unique(
            QUEUE_EVENT_PROCESSING,
            JobPayload::Events {
                block_hash: progress.block_hash.clone(),
            },
            job.priority,
        )?;

        Ok(Some(progress))
    }

    fn check_reorg_lag(&self, status: &SyncStatus, job: &Job, queue: &JobQueue) -> Result<(), WatcherError> {
        if status.reorg_lag() <= self.config.max_reorg_depth {
            return Ok(());
        }
        let prune_block_height = status.latest_canonical.number + 1;
        queue.push_unique(
            QUEUE_BLOCK_PROCESSING,
            JobPayload::Prune { prune_block_height },
            job.priority + 1,
        )?;
        Err(WatcherError::ReorgLagExceeded {
            latest_canonical: status.latest_canonical.number,
            latest_indexed: status.latest_indexed.number,
        })
    }

    async fn resolve_parent(&self, header: &BlockHeader, job: &Job, queue: &JobQueue) -> Result<(), WatcherError> {
        match self.store.block_progress(&header.parent_hash).await? {
            None => {
                let parent = self
                    .upstream
                    .block_by_hash(&header.parent_hash)
                    .await?
                    .ok_or_else(|| {
                        WatcherError::UpstreamUnavailable(format!(
                            "parent {} of block {} not found upstream",
                            header.parent_hash, header.number
                        ))
                    })?;
                debug!(
                    block_number = header.number,
                    parent_number = parent.number,
                    priority = job.priority + 1,
                    "parent not indexed, pushing parent"
                );
                queue.push_unique(QUEUE_BLOCK_PROCESSING, JobPayload::index(&parent), job.priority + 1)?;
                Err(WatcherError::dependency(header.number, &header.hash, "parent block not indexed"))
            }
            Some(parent) if !parent.is_complete => {
                debug!(
                    block_number = header.number,
                    parent_number = parent.block_number,
                    "parent incomplete, re-pushing parent"
                );
                queue.push_unique(
                    QUEUE_BLOCK_PROCESSING,
                    JobPayload::index(&parent.header()),
                    job.priority + 1,
                )?;
                Err(WatcherError::dependency(header.number, &header.hash, "parent block incomplete"))
            }
            Some(parent) => {
                let removed = self.store.remove_unknown_events(&parent.block_hash).await?;
                if removed > 0 {
                    debug!(block_number = parent.block_number, removed, "dropped unresolved events of parent");
                }
                Ok(())
            }
        }
    }

    async fn save_block(&self, header: &BlockHeader) -> Result<BlockProgress, WatcherError> {
        let delay = self.config.job_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let events = Event::number_all(&header.hash, self.indexer.fetch_block_events(header).await?);
        let progress = BlockProgress::new(header, events.len() as u32);

        let saved = if self.config.prefetch_events {
            self.cache.insert(&header.hash, events);
            self.store.save_block(&progress, &[]).await?
        } else {
            self.store.save_block(&progress, &events).await?
        };
        info!(
            block_number = saved.block_number,
            block_hash = %saved.block_hash,
            num_events = saved.num_events,
            "block saved"
        );
        Ok(saved)
    }
}
