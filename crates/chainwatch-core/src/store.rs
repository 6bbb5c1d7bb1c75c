//! Persistence seam for block progress, events, sync status and entity versions.
//!
//! Implementations include `MemoryStore` (this crate), `SqliteStore` and
//! `PostgresStore` (`chainwatch-storage`). Every method is atomic: compound
//! writes run in one transaction (or under one lock).

use async_trait::async_trait;

use crate::error::WatcherError;
use crate::frothy::{self, FrothyRegion};
use crate::types::{BlockPointer, BlockProgress, EntityVersion, Event, SyncPointer, SyncStatus};

#[async_trait]
pub trait Store: Send + Sync {
    // ─── Sync status ─────────────────────────────────────────────────────────

    async fn sync_status(&self) -> Result<Option<SyncStatus>, WatcherError>;

    /// Bootstrap the sync status from `block` unless one already exists.
    /// Returns the persisted status.
    async fn init_sync_status(&self, block: &BlockPointer) -> Result<SyncStatus, WatcherError>;

    /// Compare-and-advance one pointer. Returns the status after the update.
    async fn advance_sync_status(
        &self,
        pointer: SyncPointer,
        block: &BlockPointer,
        force: bool,
    ) -> Result<SyncStatus, WatcherError>;

    // ─── Block progress ──────────────────────────────────────────────────────

    async fn block_progress(&self, block_hash: &str) -> Result<Option<BlockProgress>, WatcherError>;

    async fn blocks_at_height(
        &self,
        block_number: u64,
        include_pruned: bool,
    ) -> Result<Vec<BlockProgress>, WatcherError>;

    /// Insert `progress` and its `events` unless the block is already stored.
    ///
    /// Returns the persisted row, which is the pre-existing one on replay.
    /// Events are inserted only alongside a fresh row, so replaying never
    /// duplicates them.
    async fn save_block(
        &self,
        progress: &BlockProgress,
        events: &[Event],
    ) -> Result<BlockProgress, WatcherError>;

    /// Overwrite the counters and flags of an existing row.
    async fn update_block_progress(&self, progress: &BlockProgress) -> Result<(), WatcherError>;

    /// Persist the final row of a completed block together with its events.
    async fn complete_block(
        &self,
        progress: &BlockProgress,
        events: &[Event],
    ) -> Result<(), WatcherError>;

    async fn mark_blocks_pruned(&self, block_hashes: &[String]) -> Result<(), WatcherError>;

    /// Non-pruned blocks that still have events to apply, lowest first.
    async fn incomplete_blocks(&self) -> Result<Vec<BlockProgress>, WatcherError>;

    // ─── Events ──────────────────────────────────────────────────────────────

    /// Events of a block in ordinal order, optionally only those after `after_index`.
    async fn block_events(
        &self,
        block_hash: &str,
        after_index: Option<u32>,
    ) -> Result<Vec<Event>, WatcherError>;

    /// Upsert one event, keyed by `(block_hash, index)`.
    async fn save_event(&self, event: &Event) -> Result<(), WatcherError>;

    /// Delete placeholder-named events of a block. Returns how many were removed.
    async fn remove_unknown_events(&self, block_hash: &str) -> Result<u64, WatcherError>;

    // ─── Ancestry ────────────────────────────────────────────────────────────

    /// Hash of the block `depth` parent-hops above `block_hash`.
    ///
    /// Stops at the oldest recorded ancestor if fewer exist. `None` if
    /// `block_hash` itself is unknown.
    async fn ancestor_at_depth(
        &self,
        block_hash: &str,
        depth: u64,
    ) -> Result<Option<String>, WatcherError> {
        frothy::walk_ancestor_at_depth(self, block_hash, depth).await
    }

    /// Hashes within `max_depth` parent-hops of `block_hash`, nearest first.
    async fn frothy_region(
        &self,
        block_hash: &str,
        max_depth: u64,
    ) -> Result<FrothyRegion, WatcherError> {
        frothy::walk_frothy_region(self, block_hash, max_depth).await
    }

    // ─── Entity versions ─────────────────────────────────────────────────────

    /// Upsert, keyed by `(entity_type, entity_id, block_hash)`.
    async fn save_entity_version(&self, version: &EntityVersion) -> Result<(), WatcherError>;

    async fn entity_version_at(
        &self,
        entity_type: &str,
        entity_id: &str,
        block_hash: &str,
    ) -> Result<Option<EntityVersion>, WatcherError>;

    /// Newest version written in a non-pruned block at or below `max_block_number`.
    async fn latest_entity_version(
        &self,
        entity_type: &str,
        entity_id: &str,
        max_block_number: u64,
    ) -> Result<Option<EntityVersion>, WatcherError>;

    // ─── Admin ───────────────────────────────────────────────────────────────

    /// Delete everything above `block`'s height and force every sync pointer
    /// down to `block`.
    async fn rewind_to(&self, block: &BlockPointer) -> Result<(), WatcherError>;
}
