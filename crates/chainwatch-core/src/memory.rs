//! In-memory store.
//!
//! Keeps all pipeline state in RAM behind one lock. Used by tests and by
//! short-lived watchers that do not need persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::WatcherError;
use crate::store::Store;
use crate::types::{BlockPointer, BlockProgress, EntityVersion, Event, SyncPointer, SyncStatus};

#[derive(Default)]
struct Inner {
    sync_status: Option<SyncStatus>,
    blocks: HashMap<String, BlockProgress>,
    events: HashMap<String, BTreeMap<u32, Event>>,
    /// Keyed by `(entity_type, entity_id, block_hash)`.
    entities: HashMap<(String, String, String), EntityVersion>,
}

/// In-memory [`Store`]. All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total number of stored block progress rows.
    pub fn block_count(&self) -> usize {
        self.lock().blocks.len()
    }

    /// Total number of stored events across all blocks.
    pub fn event_count(&self) -> usize {
        self.lock().events.values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn sync_status(&self) -> Result<Option<SyncStatus>, WatcherError> {
        Ok(self.lock().sync_status.clone())
    }

    async fn init_sync_status(&self, block: &BlockPointer) -> Result<SyncStatus, WatcherError> {
        Ok(self
            .lock()
            .sync_status
            .get_or_insert_with(|| SyncStatus::bootstrap(block))
            .clone())
    }

    async fn advance_sync_status(
        &self,
        pointer: SyncPointer,
        block: &BlockPointer,
        force: bool,
    ) -> Result<SyncStatus, WatcherError> {
        let mut inner = self.lock();
        let status = inner
            .sync_status
            .as_mut()
            .ok_or_else(|| WatcherError::Storage("sync status not initialised".into()))?;
        status.advance(pointer, block, force);
        Ok(status.clone())
    }

    async fn block_progress(&self, block_hash: &str) -> Result<Option<BlockProgress>, WatcherError> {
        Ok(self.lock().blocks.get(block_hash).cloned())
    }

    async fn blocks_at_height(
        &self,
        block_number: u64,
        include_pruned: bool,
    ) -> Result<Vec<BlockProgress>, WatcherError> {
        let mut blocks: Vec<BlockProgress> = self
            .lock()
            .blocks
            .values()
            .filter(|b| b.block_number == block_number && (include_pruned || !b.is_pruned))
            .cloned()
            .collect();
        blocks.sort_by(|a, b| a.block_hash.cmp(&b.block_hash));
        Ok(blocks)
    }

    async fn save_block(
        &self,
        progress: &BlockProgress,
        events: &[Event],
    ) -> Result<BlockProgress, WatcherError> {
        let mut inner = self.lock();
        if let Some(existing) = inner.blocks.get(&progress.block_hash) {
            return Ok(existing.clone());
        }
        inner.blocks.insert(progress.block_hash.clone(), progress.clone());
        let stored = inner.events.entry(progress.block_hash.clone()).or_default();
        for event in events {
            stored.entry(event.index).or_insert_with(|| event.clone());
        }
        Ok(progress.clone())
    }

    async fn update_block_progress(&self, progress: &BlockProgress) -> Result<(), WatcherError> {
        let mut inner = self.lock();
        let row = inner.blocks.get_mut(&progress.block_hash).ok_or_else(|| {
            WatcherError::Storage(format!("block {} not found", progress.block_hash))
        })?;
        *row = progress.clone();
        Ok(())
    }

    async fn complete_block(
        &self,
        progress: &BlockProgress,
        events: &[Event],
    ) -> Result<(), WatcherError> {
        let mut inner = self.lock();
        if !inner.blocks.contains_key(&progress.block_hash) {
            return Err(WatcherError::Storage(format!(
                "block {} not found",
                progress.block_hash
            )));
        }
        let stored = inner.events.entry(progress.block_hash.clone()).or_default();
        for event in events {
            stored.insert(event.index, event.clone());
        }
        inner.blocks.insert(progress.block_hash.clone(), progress.clone());
        Ok(())
    }

    async fn mark_blocks_pruned(&self, block_hashes: &[String]) -> Result<(), WatcherError> {
        let mut inner = self.lock();
        for hash in block_hashes {
            if let Some(block) = inner.blocks.get_mut(hash) {
                block.is_pruned = true;
            }
        }
        Ok(())
    }

    async fn incomplete_blocks(&self) -> Result<Vec<BlockProgress>, WatcherError> {
        let mut blocks: Vec<BlockProgress> = self
            .lock()
            .blocks
            .values()
            .filter(|b| !b.is_complete && !b.is_pruned)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| b.block_number);
        Ok(blocks)
    }

    async fn block_events(
        &self,
        block_hash: &str,
        after_index: Option<u32>,
    ) -> Result<Vec<Event>, WatcherError> {
        let inner = self.lock();
        let Some(events) = inner.events.get(block_hash) else {
            return Ok(Vec::new());
        };
        Ok(events
            .values()
            .filter(|e| after_index.map_or(true, |after| e.index > after))
            .cloned()
            .collect())
    }

    async fn save_event(&self, event: &Event) -> Result<(), WatcherError> {
        self.lock()
            .events
            .entry(event.block_hash.clone())
            .or_default()
            .insert(event.index, event.clone());
        Ok(())
    }

    async fn remove_unknown_events(&self, block_hash: &str) -> Result<u64, WatcherError> {
        let mut inner = self.lock();
        let Some(events) = inner.events.get_mut(block_hash) else {
            return Ok(0);
        };
        let before = events.len();
        events.retain(|_, e| !e.name.is_unknown());
        Ok((before - events.len()) as u64)
    }

    async fn save_entity_version(&self, version: &EntityVersion) -> Result<(), WatcherError> {
        let key = (
            version.entity_type.clone(),
            version.entity_id.clone(),
            version.block_hash.clone(),
        );
        self.lock().entities.insert(key, version.clone());
        Ok(())
    }

    async fn entity_version_at(
        &self,
        entity_type: &str,
        entity_id: &str,
        block_hash: &str,
    ) -> Result<Option<EntityVersion>, WatcherError> {
        let key = (
            entity_type.to_string(),
            entity_id.to_string(),
            block_hash.to_string(),
        );
        Ok(self.lock().entities.get(&key).cloned())
    }

    async fn latest_entity_version(
        &self,
        entity_type: &str,
        entity_id: &str,
        max_block_number: u64,
    ) -> Result<Option<EntityVersion>, WatcherError> {
        let inner = self.lock();
        Ok(inner
            .entities
            .values()
            .filter(|v| {
                v.entity_type == entity_type
                    && v.entity_id == entity_id
                    && v.block_number <= max_block_number
                    && inner.blocks.get(&v.block_hash).map_or(false, |b| !b.is_pruned)
            })
            .max_by(|a, b| {
                a.block_number
                    .cmp(&b.block_number)
                    .then_with(|| b.block_hash.cmp(&a.block_hash))
            })
            .cloned())
    }

    async fn rewind_to(&self, block: &BlockPointer) -> Result<(), WatcherError> {
        let mut inner = self.lock();
        let removed: Vec<String> = inner
            .blocks
            .values()
            .filter(|b| b.block_number > block.number)
            .map(|b| b.block_hash.clone())
            .collect();
        for hash in &removed {
            inner.blocks.remove(hash);
            inner.events.remove(hash);
        }
        inner.entities.retain(|_, v| v.block_number <= block.number);
        if let Some(status) = inner.sync_status.as_mut() {
            for pointer in [
                SyncPointer::ChainHead,
                SyncPointer::LatestIndexed,
                SyncPointer::LatestCanonical,
            ] {
                if status.get(pointer).number > block.number {
                    status.advance(pointer, block, true);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockHeader, EventName};
    use serde_json::json;

    fn block(number: u64, hash: &str, parent: &str, num_events: u32) -> BlockProgress {
        BlockProgress::new(
            &BlockHeader {
                hash: hash.into(),
                number,
                parent_hash: parent.into(),
                timestamp: 0,
            },
            num_events,
        )
    }

    fn event(block_hash: &str, index: u32, name: EventName) -> Event {
        Event {
            block_hash: block_hash.into(),
            index,
            contract: "0xc0ffee".into(),
            name,
            extra_info: json!({}),
            proof: None,
        }
    }

    #[tokio::test]
    async fn save_block_is_idempotent() {
        let store = MemoryStore::new();
        let b = block(1, "0xa", "0x0", 2);
        let events = vec![
            event("0xa", 0, EventName::Unknown),
            event("0xa", 1, EventName::known("Transfer", json!({}))),
        ];

        store.save_block(&b, &events).await.unwrap();
        let mut advanced = b.clone();
        advanced.record_processed(0).unwrap();
        store.update_block_progress(&advanced).await.unwrap();

        // replay returns the stored row and writes nothing
        let replayed = store.save_block(&b, &events).await.unwrap();
        assert_eq!(replayed.num_processed_events, 1);
        assert_eq!(store.block_count(), 1);
        assert_eq!(store.event_count(), 2);
    }

    #[tokio::test]
    async fn init_sync_status_keeps_existing() {
        let store = MemoryStore::new();
        let first = store.init_sync_status(&BlockPointer::new("0xa", 10)).await.unwrap();
        let second = store.init_sync_status(&BlockPointer::new("0xb", 20)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.latest_indexed.number, 9);
    }

    #[tokio::test]
    async fn block_events_after_index() {
        let store = MemoryStore::new();
        let events: Vec<Event> = (0..4).map(|i| event("0xa", i, EventName::Unknown)).collect();
        store.save_block(&block(1, "0xa", "0x0", 4), &events).await.unwrap();

        let rest = store.block_events("0xa", Some(1)).await.unwrap();
        assert_eq!(rest.iter().map(|e| e.index).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(store.remove_unknown_events("0xa").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn rewind_drops_rows_above_height() {
        let store = MemoryStore::new();
        store.init_sync_status(&BlockPointer::new("0x1", 1)).await.unwrap();
        for n in 1..=5u64 {
            let parent = format!("0x{}", n - 1);
            store.save_block(&block(n, &format!("0x{n}"), &parent, 0), &[]).await.unwrap();
        }
        store
            .advance_sync_status(SyncPointer::ChainHead, &BlockPointer::new("0x5", 5), false)
            .await
            .unwrap();
        store
            .advance_sync_status(SyncPointer::LatestIndexed, &BlockPointer::new("0x5", 5), false)
            .await
            .unwrap();

        store.rewind_to(&BlockPointer::new("0x3", 3)).await.unwrap();

        assert_eq!(store.block_count(), 3);
        let status = store.sync_status().await.unwrap().unwrap();
        assert_eq!(status.chain_head.number, 3);
        assert_eq!(status.latest_indexed.number, 3);
        // canonical was already below the rewind height
        assert_eq!(status.latest_canonical.number, 1);
    }

    #[tokio::test]
    async fn latest_entity_version_skips_pruned() {
        let store = MemoryStore::new();
        store.save_block(&block(4, "0x4a", "0x3", 0), &[]).await.unwrap();
        store.save_block(&block(4, "0x4b", "0x3", 0), &[]).await.unwrap();
        for hash in ["0x4a", "0x4b"] {
            store
                .save_entity_version(&EntityVersion {
                    entity_type: "Pool".into(),
                    entity_id: "p1".into(),
                    block_hash: hash.into(),
                    block_number: 4,
                    data: json!(hash),
                })
                .await
                .unwrap();
        }
        store.mark_blocks_pruned(&["0x4a".to_string()]).await.unwrap();

        let latest = store.latest_entity_version("Pool", "p1", 10).await.unwrap().unwrap();
        assert_eq!(latest.block_hash, "0x4b");
        assert!(store.latest_entity_version("Pool", "p1", 3).await.unwrap().is_none());
    }
}
