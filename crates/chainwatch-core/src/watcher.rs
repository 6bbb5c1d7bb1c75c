//! Block watcher: wires the pipeline together and feeds it chain-head updates.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::block_processor::BlockProcessor;
use crate::config::WatcherConfig;
use crate::error::WatcherError;
use crate::event_processor::EventProcessor;
use crate::job::{JobPayload, QUEUE_BLOCK_PROCESSING, QUEUE_EVENT_PROCESSING};
use crate::pruner::ChainPruner;
use crate::queue::JobQueue;
use crate::runner::{BlockJobCompletion, BlockJobRunner, EventJobCompletion, EventJobRunner};
use crate::store::Store;
use crate::types::{BlockHeader, BlockProgress, Contract, SyncPointer};
use crate::upstream::{ChainSource, EventCache, Indexer};

const COMPLETION_CHANNEL_CAPACITY: usize = 1024;

/// The assembled pipeline: queue, processors, pruner and chain-head ingestion.
///
/// The store and queue are constructed once and shared by reference with
/// every component; nothing is held in globals.
pub struct Watcher {
    config: WatcherConfig,
    store: Arc<dyn Store>,
    upstream: Arc<dyn ChainSource>,
    indexer: Arc<dyn Indexer>,
    queue: JobQueue,
    completions: broadcast::Sender<BlockProgress>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
    pub fn new(
        config: WatcherConfig,
        store: Arc<dyn Store>,
        upstream: Arc<dyn ChainSource>,
        indexer: Arc<dyn Indexer>,
    ) -> Result<Self, WatcherError> {
        config.validate()?;
        let queue = JobQueue::new(config.queue.clone());
        let cache = Arc::new(EventCache::new());
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);

        let block_processor = BlockProcessor::new(
            config.clone(),
            store.clone(),
            upstream.clone(),
            indexer.clone(),
            cache.clone(),
        );
        let pruner = ChainPruner::new(store.clone(), config.max_reorg_depth);
        queue.subscribe(
            QUEUE_BLOCK_PROCESSING,
            Arc::new(BlockJobRunner::new(block_processor, pruner)),
        );
        queue.on_complete(QUEUE_BLOCK_PROCESSING, Arc::new(BlockJobCompletion));

        let event_processor = EventProcessor::new(config.clone(), store.clone(), indexer.clone(), cache);
        queue.subscribe(
            QUEUE_EVENT_PROCESSING,
            Arc::new(EventJobRunner::new(event_processor, indexer.clone())),
        );
        queue.on_complete(
            QUEUE_EVENT_PROCESSING,
            Arc::new(EventJobCompletion::new(
                store.clone(),
                upstream.clone(),
                config.max_reorg_depth,
                completions.clone(),
            )),
        );

        Ok(Self {
            config,
            store,
            upstream,
            indexer,
            queue,
            completions,
            subscription: Mutex::new(None),
        })
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Receive every block as it becomes fully indexed.
    pub fn subscribe_completions(&self) -> broadcast::Receiver<BlockProgress> {
        self.completions.subscribe()
    }

    /// Start workers, resume interrupted work and follow the chain head.
    pub async fn start(&self) -> Result<(), WatcherError> {
        self.queue.start();

        if self.store.sync_status().await?.is_none() {
            self.cold_start().await?;
        } else {
            self.resume().await?;
        }

        let mut blocks = self.upstream.subscribe_blocks().await?;
        let store = self.store.clone();
        let queue = self.queue.clone();
        let handle = tokio::spawn(async move {
            while let Some(header) = blocks.recv().await {
                if let Err(e) = ingest_block(store.as_ref(), &queue, &header).await {
                    warn!(block_number = header.number, block_hash = %header.hash, error = %e, "failed to ingest block");
                }
            }
            info!("chain head subscription closed");
        });
        if let Some(previous) = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            previous.abort();
        }
        info!(max_reorg_depth = self.config.max_reorg_depth, "watcher started");
        Ok(())
    }

    /// Stop following the chain head and drain the queue workers.
    pub async fn stop(&self) {
        let handle = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.queue.stop().await;
        info!("watcher stopped");
    }

    /// Handle one chain-head notification.
    pub async fn on_new_block(&self, header: &BlockHeader) -> Result<(), WatcherError> {
        ingest_block(self.store.as_ref(), &self.queue, header).await
    }

    /// Re-enqueue work that was in flight when the process last stopped.
    ///
    /// Pushes an event job for every incomplete, unpruned block and, if it
    /// is not stored yet, index jobs for the height after the latest indexed
    /// block. Returns the number of jobs pushed.
    pub async fn resume(&self) -> Result<usize, WatcherError> {
        let mut pushed = 0;
        for block in self.store.incomplete_blocks().await? {
            let payload = JobPayload::Events {
                block_hash: block.block_hash.clone(),
            };
            if self.queue.push_unique(QUEUE_EVENT_PROCESSING, payload, 0)?.is_some() {
                pushed += 1;
            }
        }

        if let Some(status) = self.store.sync_status().await? {
            let next = status.latest_indexed.number + 1;
            if status.chain_head.number >= next && self.store.blocks_at_height(next, false).await?.is_empty() {
                for block in self.upstream.blocks_by_number(next).await? {
                    if self
                        .queue
                        .push_unique(QUEUE_BLOCK_PROCESSING, JobPayload::index(&block), 0)?
                        .is_some()
                    {
                        pushed += 1;
                    }
                }
            }
            info!(latest_indexed = %status.latest_indexed, pushed, "resumed");
        }
        Ok(pushed)
    }

    /// Poll upstream for the start block until it exists, then seed the
    /// sync status and the queue from it.
    async fn cold_start(&self) -> Result<(), WatcherError> {
        let start = self.config.start_block.unwrap_or(0);
        let blocks = self.wait_for_blocks(start).await?;
        let Some(first) = blocks.first() else {
            return Ok(());
        };
        self.store.init_sync_status(&first.pointer()).await?;
        for block in &blocks {
            self.queue
                .push_unique(QUEUE_BLOCK_PROCESSING, JobPayload::index(block), 0)?;
        }
        info!(block_number = start, "cold start");
        Ok(())
    }

    /// Poll `blocks_by_number(number)` with a fixed wait until it returns a block.
    pub async fn wait_for_blocks(&self, number: u64) -> Result<Vec<BlockHeader>, WatcherError> {
        loop {
            match self.upstream.blocks_by_number(number).await {
                Ok(blocks) if !blocks.is_empty() => return Ok(blocks),
                Ok(_) => debug!(block_number = number, "block not yet available upstream"),
                Err(WatcherError::UpstreamUnavailable(reason)) => {
                    debug!(block_number = number, reason = %reason, "upstream unavailable")
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Watch `contract` from now on, here and in every process sharing the queue.
    pub async fn watch_contract(&self, contract: Contract) -> Result<(), WatcherError> {
        self.indexer.cache_contract(&contract).await?;
        self.queue
            .push_job(QUEUE_EVENT_PROCESSING, JobPayload::Contract(contract), 0)?;
        Ok(())
    }
}

/// Advance the chain head to `header` and enqueue it for indexing.
async fn ingest_block(store: &dyn Store, queue: &JobQueue, header: &BlockHeader) -> Result<(), WatcherError> {
    let pointer = header.pointer();
    if store.sync_status().await?.is_none() {
        store.init_sync_status(&pointer).await?;
    } else {
        store
            .advance_sync_status(SyncPointer::ChainHead, &pointer, false)
            .await?;
    }
    debug!(block_number = header.number, block_hash = %header.hash, "new block");
    queue.push_unique(QUEUE_BLOCK_PROCESSING, JobPayload::index(header), 0)?;
    Ok(())
}
