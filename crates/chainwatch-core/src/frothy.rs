//! Ancestor query engine over persisted block progress.
//!
//! The frothy region is the unconfirmed suffix of the chain: every block
//! within `max_reorg_depth` parent-hops of a given block. Reads of derived
//! state resolve against the branch of the requesting block inside the region
//! and fall back to the latest non-pruned value below it.
//!
//! Walks are bounded and best-effort: near the first indexed block fewer
//! ancestors are recorded and the walk stops at the oldest one found.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WatcherError;
use crate::store::Store;
use crate::types::EntityVersion;

/// Blocks reachable from one block within the reorg depth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrothyRegion {
    /// The starting block and its ancestors, nearest first.
    pub block_hashes: Vec<String>,
    /// One below the oldest visited block number.
    pub boundary_block_number: u64,
}

impl FrothyRegion {
    pub fn contains(&self, block_hash: &str) -> bool {
        self.block_hashes.iter().any(|h| h == block_hash)
    }
}

/// Iterative parent walk backing [`Store::ancestor_at_depth`].
pub async fn walk_ancestor_at_depth<S: Store + ?Sized>(
    store: &S,
    block_hash: &str,
    depth: u64,
) -> Result<Option<String>, WatcherError> {
    let Some(mut current) = store.block_progress(block_hash).await? else {
        return Ok(None);
    };
    for _ in 0..depth {
        match store.block_progress(&current.parent_hash).await? {
            Some(parent) => current = parent,
            None => break,
        }
    }
    Ok(Some(current.block_hash))
}

/// Iterative parent walk backing [`Store::frothy_region`].
pub async fn walk_frothy_region<S: Store + ?Sized>(
    store: &S,
    block_hash: &str,
    max_depth: u64,
) -> Result<FrothyRegion, WatcherError> {
    let mut current = store
        .block_progress(block_hash)
        .await?
        .ok_or_else(|| WatcherError::Storage(format!("block {block_hash} not found")))?;
    let mut block_hashes = vec![current.block_hash.clone()];
    for _ in 0..max_depth {
        match store.block_progress(&current.parent_hash).await? {
            Some(parent) => {
                block_hashes.push(parent.block_hash.clone());
                current = parent;
            }
            None => break,
        }
    }
    Ok(FrothyRegion {
        block_hashes,
        boundary_block_number: current.block_number.saturating_sub(1),
    })
}

/// The version of an entity as seen from `block_hash`.
///
/// Checks `block_hash` and its ancestors within `max_depth` hops, nearest
/// first. Without a hit, falls back to the newest version written in a
/// non-pruned block at or below the region boundary.
pub async fn prev_entity_version<S: Store + ?Sized>(
    store: &S,
    entity_type: &str,
    entity_id: &str,
    block_hash: &str,
    max_depth: u64,
) -> Result<Option<EntityVersion>, WatcherError> {
    let region = store.frothy_region(block_hash, max_depth).await?;
    for hash in &region.block_hashes {
        if let Some(version) = store.entity_version_at(entity_type, entity_id, hash).await? {
            return Ok(Some(version));
        }
    }
    debug!(
        entity_type,
        entity_id,
        block_hash,
        boundary = region.boundary_block_number,
        "no version in frothy region, reading below boundary"
    );
    store
        .latest_entity_version(entity_type, entity_id, region.boundary_block_number)
        .await
}
