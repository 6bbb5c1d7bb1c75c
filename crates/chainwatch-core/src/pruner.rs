//! Chain pruner: resolves one contested height per pass.
//!
//! Siblings that lose are marked pruned; their descendants become
//! unreachable from the canonical chain and are left for later passes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::WatcherError;
use crate::store::Store;
use crate::types::{BlockPointer, BlockProgress, SyncPointer};

pub struct ChainPruner {
    store: Arc<dyn Store>,
    max_reorg_depth: u64,
}

impl ChainPruner {
    pub fn new(store: Arc<dyn Store>, max_reorg_depth: u64) -> Self {
        Self {
            store,
            max_reorg_depth,
        }
    }

    /// Resolve the canonical block at `prune_block_height` and advance the
    /// canonical cursor to it.
    ///
    /// Returns the new canonical block, or `None` if the height was already
    /// resolved.
    pub async fn prune(&self, prune_block_height: u64) -> Result<Option<BlockPointer>, WatcherError> {
        let status = self
            .store
            .sync_status()
            .await?
            .ok_or_else(|| WatcherError::Storage("sync status not initialised".into()))?;

        if status.latest_canonical.number >= prune_block_height {
            debug!(
                prune_block_height,
                latest_canonical = status.latest_canonical.number,
                "height already pruned"
            );
            return Ok(None);
        }
        if status.latest_indexed.number < prune_block_height + self.max_reorg_depth {
            return Err(WatcherError::PruneNotSafe {
                height: prune_block_height,
                latest_indexed: status.latest_indexed.number,
            });
        }

        let mut blocks = self.store.blocks_at_height(prune_block_height, false).await?;
        let canonical = match blocks.len() {
            0 => {
                return Err(WatcherError::Corruption(format!(
                    "no unpruned block at height {prune_block_height}"
                )))
            }
            1 => blocks.remove(0),
            _ => self.resolve_fork(prune_block_height, blocks).await?,
        };

        let pointer = canonical.pointer();
        self.store
            .advance_sync_status(SyncPointer::LatestCanonical, &pointer, false)
            .await?;
        info!(block_number = pointer.number, block_hash = %pointer.hash, "canonical block advanced");
        Ok(Some(pointer))
    }

    /// Pick the sibling that is an ancestor of the indexed block
    /// `max_reorg_depth` above it and prune the others.
    async fn resolve_fork(
        &self,
        height: u64,
        siblings: Vec<BlockProgress>,
    ) -> Result<BlockProgress, WatcherError> {
        let tip_height = height + self.max_reorg_depth;
        let tips: Vec<BlockProgress> = self
            .store
            .blocks_at_height(tip_height, false)
            .await?
            .into_iter()
            .filter(|b| b.is_complete)
            .collect();
        let tip = match tips.as_slice() {
            [] => {
                return Err(WatcherError::PruneNotSafe {
                    height,
                    latest_indexed: tip_height.saturating_sub(1),
                })
            }
            [tip] => tip,
            [tip, ..] => {
                warn!(tip_height, candidates = tips.len(), "fork deeper than reorg depth, using first tip");
                tip
            }
        };

        let ancestor = self
            .store
            .ancestor_at_depth(&tip.block_hash, self.max_reorg_depth)
            .await?
            .ok_or_else(|| WatcherError::Corruption(format!("tip {} vanished", tip.block_hash)))?;

        let (canonical, orphans): (Vec<BlockProgress>, Vec<BlockProgress>) =
            siblings.into_iter().partition(|b| b.block_hash == ancestor);
        let canonical = canonical.into_iter().next().ok_or_else(|| {
            WatcherError::Corruption(format!(
                "ancestor {ancestor} of {} is not a block at height {height}",
                tip.block_hash
            ))
        })?;

        let pruned: Vec<String> = orphans.into_iter().map(|b| b.block_hash).collect();
        self.store.mark_blocks_pruned(&pruned).await?;
        info!(height, canonical = %canonical.block_hash, pruned = pruned.len(), "fork resolved");
        Ok(canonical)
    }
}
