//! Administrative rewind.

use tracing::info;

use crate::error::WatcherError;
use crate::store::Store;
use crate::types::{BlockPointer, BlockProgress};

/// Rewind all pipeline state to the block at height `block_number`.
///
/// Every unpruned block at that height must be complete. If the height is
/// still contested, the block on the latest indexed branch is kept.
/// Returns the block the pipeline was rewound to.
pub async fn reset_to_block(store: &dyn Store, block_number: u64) -> Result<BlockPointer, WatcherError> {
    let blocks = store.blocks_at_height(block_number, false).await?;
    if blocks.is_empty() {
        return Err(WatcherError::Other(format!("no block at height {block_number}")));
    }
    if let Some(incomplete) = blocks.iter().find(|b| !b.is_complete) {
        return Err(WatcherError::Other(format!(
            "block {} at height {block_number} is not complete",
            incomplete.block_hash
        )));
    }

    let target = select_branch(store, blocks).await?;
    store.rewind_to(&target).await?;
    info!(block_number = target.number, block_hash = %target.hash, "rewound to block");
    Ok(target)
}

async fn select_branch(store: &dyn Store, mut blocks: Vec<BlockProgress>) -> Result<BlockPointer, WatcherError> {
    if blocks.len() > 1 {
        if let Some(status) = store.sync_status().await? {
            let height = blocks[0].block_number;
            let depth = status.latest_indexed.number.saturating_sub(height);
            if let Some(ancestor) = store.ancestor_at_depth(&status.latest_indexed.hash, depth).await? {
                if let Some(block) = blocks.iter().find(|b| b.block_hash == ancestor) {
                    return Ok(block.pointer());
                }
            }
        }
    }
    Ok(blocks.remove(0).pointer())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::types::{BlockHeader, SyncPointer};

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

    #[tokio::test]
    async fn rejects_incomplete_height() {
        let store = MemoryStore::new();
        store.save_block(&block(3, "0x3", "0x2", 2), &[]).await.unwrap();
        assert!(reset_to_block(&store, 3).await.is_err());
        assert!(reset_to_block(&store, 4).await.is_err());
    }

    #[tokio::test]
    async fn keeps_block_on_indexed_branch() {
        let store = MemoryStore::new();
        store.init_sync_status(&BlockPointer::new("0x1", 1)).await.unwrap();
        for b in [
            block(1, "0x1", "0x0", 0),
            block(2, "0x2a", "0x1", 0),
            block(2, "0x2b", "0x1", 0),
            block(3, "0x3b", "0x2b", 0),
        ] {
            store.save_block(&b, &[]).await.unwrap();
        }
        store
            .advance_sync_status(SyncPointer::LatestIndexed, &BlockPointer::new("0x3b", 3), false)
            .await
            .unwrap();

        let target = reset_to_block(&store, 2).await.unwrap();
        assert_eq!(target, BlockPointer::new("0x2b", 2));
        assert!(store.block_progress("0x3b").await.unwrap().is_none());
        let status = store.sync_status().await.unwrap().unwrap();
        assert_eq!(status.latest_indexed, target);
    }
}
