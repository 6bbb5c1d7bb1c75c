//! Upstream chain source, downstream indexer hooks and the per-block event cache.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::WatcherError;
use crate::types::{BlockHeader, BlockProgress, Contract, Event, FetchedEvent, ParsedEvent};

/// The single upstream data source trusted for chain-head truth.
///
/// Queries may be issued before a height exists upstream; they then return
/// empty results rather than failing.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// All blocks known at `number` (more than one while a fork is live).
    async fn blocks_by_number(&self, number: u64) -> Result<Vec<BlockHeader>, WatcherError>;

    async fn block_by_hash(&self, block_hash: &str) -> Result<Option<BlockHeader>, WatcherError>;

    /// Stream of new-block notifications.
    async fn subscribe_blocks(&self) -> Result<mpsc::Receiver<BlockHeader>, WatcherError>;
}

/// Contract-specific logic driven by the pipeline.
///
/// `process_event` and `process_block` may write derived state; they run
/// inside the job that applies the block and are retried with it.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Fetch a block's events in log order. Events of unwatched contracts
    /// carry [`EventName::Unknown`](crate::types::EventName::Unknown).
    async fn fetch_block_events(&self, block: &BlockHeader) -> Result<Vec<FetchedEvent>, WatcherError>;

    /// Apply one decoded event of a watched contract.
    async fn process_event(&self, event: &Event) -> Result<(), WatcherError>;

    /// Block-level bookkeeping, called once the block's progress row exists.
    async fn process_block(&self, _block: &BlockProgress) -> Result<(), WatcherError> {
        Ok(())
    }

    /// The watched contract at `address`, if any.
    fn is_watched_contract(&self, address: &str) -> Option<Contract>;

    /// Decode a raw log emitted by a contract of `kind`.
    fn parse_event_name_and_args(&self, kind: &str, raw_log: &Value) -> Result<ParsedEvent, WatcherError>;

    /// Add a contract to the in-memory watched set.
    async fn cache_contract(&self, contract: &Contract) -> Result<(), WatcherError>;
}

/// Events fetched for blocks that have not completed yet, keyed by block hash.
#[derive(Default)]
pub struct EventCache {
    blocks: Mutex<HashMap<String, Vec<Event>>>,
}

impl EventCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Event>>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, block_hash: &str, events: Vec<Event>) {
        self.lock().insert(block_hash.to_string(), events);
    }

    pub fn get(&self, block_hash: &str) -> Option<Vec<Event>> {
        self.lock().get(block_hash).cloned()
    }

    /// Replace one cached event, e.g. after lazy decoding.
    pub fn update(&self, event: &Event) {
        if let Some(slot) = self
            .lock()
            .get_mut(&event.block_hash)
            .and_then(|events| events.iter_mut().find(|e| e.index == event.index))
        {
            *slot = event.clone();
        }
    }

    pub fn remove(&self, block_hash: &str) -> Option<Vec<Event>> {
        self.lock().remove(block_hash)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
