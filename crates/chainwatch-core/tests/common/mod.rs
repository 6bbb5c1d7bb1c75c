//! Mock upstream chain and indexer shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chainwatch_core::queue::JobQueue;
use chainwatch_core::{
    BlockHeader, ChainSource, Contract, Event, EventName, FetchedEvent, Indexer, MemoryStore, ParsedEvent,
    Store, Watcher, WatcherBuilder, WatcherConfig, WatcherError,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Deterministic block hash for `number` on `branch`.
pub fn hash(branch: &str, number: u64) -> String {
    format!("0x{branch}{number:04}")
}

pub fn header(branch: &str, number: u64, parent: &str) -> BlockHeader {
    BlockHeader {
        hash: hash(branch, number),
        number,
        parent_hash: parent.to_string(),
        timestamp: 1_700_000_000 + number as i64,
    }
}

/// Headers `from..=to` on `branch`, the first one extending `parent`.
pub fn chain(branch: &str, from: u64, to: u64, parent: &str) -> Vec<BlockHeader> {
    let mut parent = parent.to_string();
    (from..=to)
        .map(|n| {
            let h = header(branch, n, &parent);
            parent = h.hash.clone();
            h
        })
        .collect()
}

pub fn config(max_reorg_depth: u64) -> WatcherConfig {
    WatcherBuilder::new()
        .max_reorg_depth(max_reorg_depth)
        .retry_backoff_ms(0, 0)
        .poll_interval_ms(10)
        .build_config()
        .unwrap()
}

/// A raw log as the mock indexer understands it.
pub fn log(contract: &str, name: &str, args: Value) -> (String, Value) {
    (contract.to_string(), json!({ "event": name, "args": args }))
}

// ─── MockChain ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockChain {
    blocks: Mutex<HashMap<String, BlockHeader>>,
    subscribers: Mutex<Vec<mpsc::Sender<BlockHeader>>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, header: &BlockHeader) {
        self.blocks.lock().unwrap().insert(header.hash.clone(), header.clone());
    }

    /// Add `header` and notify subscribers.
    pub fn announce(&self, header: &BlockHeader) {
        self.add(header);
        for tx in self.subscribers.lock().unwrap().iter() {
            let _ = tx.try_send(header.clone());
        }
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn blocks_by_number(&self, number: u64) -> Result<Vec<BlockHeader>, WatcherError> {
        let mut blocks: Vec<BlockHeader> = self
            .blocks
            .lock()
            .unwrap()
            .values()
            .filter(|b| b.number == number)
            .cloned()
            .collect();
        blocks.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(blocks)
    }

    async fn block_by_hash(&self, block_hash: &str) -> Result<Option<BlockHeader>, WatcherError> {
        Ok(self.blocks.lock().unwrap().get(block_hash).cloned())
    }

    async fn subscribe_blocks(&self) -> Result<mpsc::Receiver<BlockHeader>, WatcherError> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers.lock().unwrap().push(tx);
        Ok(rx)
    }
}

// ─── MockIndexer ──────────────────────────────────────────────────────────────

/// Indexer whose `PoolCreated` events start watching the pool in `args.pool`.
#[derive(Default)]
pub struct MockIndexer {
    logs: Mutex<HashMap<String, Vec<(String, Value)>>>,
    watched: Mutex<HashMap<String, Contract>>,
    /// `(block_hash, index, event_name)` in application order.
    pub applied: Mutex<Vec<(String, u32, String)>>,
    pub blocks_seen: Mutex<Vec<String>>,
    pub fetches: Mutex<u32>,
    /// `(block_hash, index)` pairs whose next application fails.
    failing: Mutex<HashSet<(String, u32)>>,
}

impl MockIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&self, address: &str, kind: &str) {
        self.watched
            .lock()
            .unwrap()
            .insert(address.to_string(), Contract::new(address, kind, 0));
    }

    pub fn set_logs(&self, block_hash: &str, logs: Vec<(String, Value)>) {
        self.logs.lock().unwrap().insert(block_hash.to_string(), logs);
    }

    /// Make the next application of event `index` in `block_hash` fail
    /// with a retryable handler error.
    pub fn fail_once(&self, block_hash: &str, index: u32) {
        self.failing.lock().unwrap().insert((block_hash.to_string(), index));
    }

    pub fn applied_in(&self, block_hash: &str) -> Vec<(u32, String)> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _, _)| h == block_hash)
            .map(|(_, i, n)| (*i, n.clone()))
            .collect()
    }

    fn decode(raw: &Value) -> ParsedEvent {
        ParsedEvent {
            name: raw["event"].as_str().unwrap_or_default().to_string(),
            info: raw["args"].clone(),
        }
    }
}

#[async_trait]
impl Indexer for MockIndexer {
    async fn fetch_block_events(&self, block: &BlockHeader) -> Result<Vec<FetchedEvent>, WatcherError> {
        *self.fetches.lock().unwrap() += 1;
        let logs = self.logs.lock().unwrap().get(&block.hash).cloned().unwrap_or_default();
        Ok(logs
            .into_iter()
            .map(|(contract, raw)| {
                let name = if self.is_watched_contract(&contract).is_some() {
                    let parsed = Self::decode(&raw);
                    EventName::known(parsed.name, parsed.info)
                } else {
                    EventName::Unknown
                };
                FetchedEvent {
                    contract,
                    name,
                    extra_info: raw,
                    proof: None,
                }
            })
            .collect())
    }

    async fn process_event(&self, event: &Event) -> Result<(), WatcherError> {
        if self.failing.lock().unwrap().remove(&(event.block_hash.clone(), event.index)) {
            return Err(WatcherError::Handler {
                handler: "mock".into(),
                reason: format!("event {} rejected", event.index),
            });
        }
        if event.name.as_str() == "PoolCreated" {
            if let Some(pool) = event.name.info().and_then(|i| i["pool"].as_str()) {
                self.watch(pool, "pool");
            }
        }
        self.applied.lock().unwrap().push((
            event.block_hash.clone(),
            event.index,
            event.name.as_str().to_string(),
        ));
        Ok(())
    }

    async fn process_block(&self, block: &chainwatch_core::BlockProgress) -> Result<(), WatcherError> {
        self.blocks_seen.lock().unwrap().push(block.block_hash.clone());
        Ok(())
    }

    fn is_watched_contract(&self, address: &str) -> Option<Contract> {
        self.watched.lock().unwrap().get(address).cloned()
    }

    fn parse_event_name_and_args(&self, _kind: &str, raw_log: &Value) -> Result<ParsedEvent, WatcherError> {
        Ok(Self::decode(raw_log))
    }

    async fn cache_contract(&self, contract: &Contract) -> Result<(), WatcherError> {
        self.watch(&contract.address, &contract.kind);
        Ok(())
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub indexer: Arc<MockIndexer>,
    pub store: Arc<MemoryStore>,
    pub watcher: Watcher,
}

impl Harness {
    pub fn new(config: WatcherConfig) -> Self {
        let chain = Arc::new(MockChain::new());
        let indexer = Arc::new(MockIndexer::new());
        let store = Arc::new(MemoryStore::new());
        let watcher = Watcher::new(config, store.clone(), chain.clone(), indexer.clone()).unwrap();
        Self {
            chain,
            indexer,
            store,
            watcher,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        self.watcher.queue()
    }

    /// Publish `header` upstream and hand it to the watcher.
    pub async fn announce(&self, header: &BlockHeader) {
        self.chain.add(header);
        self.watcher.on_new_block(header).await.unwrap();
    }

    pub async fn settle(&self) -> usize {
        self.queue().run_until_idle().await
    }

    /// Announce and settle each header in turn.
    pub async fn feed(&self, headers: &[BlockHeader]) {
        for h in headers {
            self.announce(h).await;
            self.settle().await;
        }
    }

    pub async fn sync_status(&self) -> chainwatch_core::SyncStatus {
        self.store.sync_status().await.unwrap().unwrap()
    }
}
