//! Component-level scenarios for pruning, ordering and reorg-aware reads.

mod common;

use std::sync::Arc;

use chainwatch_core::event_processor::EventProcessor;
use chainwatch_core::pruner::ChainPruner;
use chainwatch_core::{
    prev_entity_version, BlockHeader, BlockProgress, EntityVersion, Event, EventCache,
    EventName, EventOrdering, MemoryStore, Store, SyncPointer, WatcherBuilder, WatcherError,
};
use common::{chain, hash, MockIndexer};
use serde_json::json;

const DEPTH: u64 = 16;

async fn insert(store: &MemoryStore, headers: &[BlockHeader]) {
    for h in headers {
        store.save_block(&BlockProgress::new(h, 0), &[]).await.unwrap();
    }
}

async fn set_status(store: &MemoryStore, canonical: &BlockHeader, indexed: &BlockHeader) {
    store.init_sync_status(&canonical.pointer()).await.unwrap();
    store
        .advance_sync_status(SyncPointer::LatestIndexed, &indexed.pointer(), false)
        .await
        .unwrap();
}

// ─── Pruning ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn linear_chain_prune_keeps_single_block() {
    let store = Arc::new(MemoryStore::new());
    let blocks = chain("a", 0, 20, "0xgenesis");
    insert(&store, &blocks).await;
    set_status(&store, &blocks[3], &blocks[20]).await;

    let pruner = ChainPruner::new(store.clone(), DEPTH);
    let canonical = pruner.prune(4).await.unwrap().unwrap();

    assert_eq!(canonical, blocks[4].pointer());
    let at_height = store.blocks_at_height(4, true).await.unwrap();
    assert_eq!(at_height.len(), 1);
    assert!(!at_height[0].is_pruned);
    assert_eq!(
        store.sync_status().await.unwrap().unwrap().latest_canonical,
        blocks[4].pointer()
    );
}

#[tokio::test]
async fn fork_prune_demotes_non_ancestor_sibling() {
    let store = Arc::new(MemoryStore::new());
    let trunk = chain("a", 0, 9, "0xgenesis");
    let losing = chain("x", 10, 12, &trunk[9].hash);
    let winning = chain("b", 10, 10 + DEPTH, &trunk[9].hash);
    insert(&store, &trunk).await;
    insert(&store, &losing).await;
    insert(&store, &winning).await;
    set_status(&store, &trunk[9], winning.last().unwrap()).await;

    let pruner = ChainPruner::new(store.clone(), DEPTH);
    let canonical = pruner.prune(10).await.unwrap().unwrap();

    assert_eq!(canonical.hash, hash("b", 10));
    assert!(store.block_progress(&hash("x", 10)).await.unwrap().unwrap().is_pruned);
    // descendants of the loser are left for later passes
    assert!(!store.block_progress(&hash("x", 11)).await.unwrap().unwrap().is_pruned);

    let live = store.blocks_at_height(10, false).await.unwrap();
    assert_eq!(live.len(), 1);
    let status = store.sync_status().await.unwrap().unwrap();
    let ancestor = store
        .ancestor_at_depth(&status.latest_indexed.hash, status.latest_indexed.number - 10)
        .await
        .unwrap();
    assert_eq!(ancestor.as_deref(), Some(live[0].block_hash.as_str()));
    assert_eq!(status.latest_canonical.hash, live[0].block_hash);
}

#[tokio::test]
async fn ancestor_at_depth_matches_parent_walk() {
    let store = MemoryStore::new();
    let trunk = chain("a", 0, 40, "0xgenesis");
    let side = chain("s", 21, 40, &trunk[20].hash);
    insert(&store, &trunk).await;
    insert(&store, &side).await;

    for tip in [&trunk[40], &side[19]] {
        for depth in 0..=DEPTH {
            let mut expected = tip.clone();
            for _ in 0..depth {
                expected = trunk
                    .iter()
                    .chain(side.iter())
                    .find(|b| b.hash == expected.parent_hash)
                    .cloned()
                    .unwrap();
            }
            let got = store.ancestor_at_depth(&tip.hash, depth).await.unwrap();
            assert_eq!(got, Some(expected.hash), "depth {depth} from {}", tip.hash);
        }
    }
}

// ─── Event ordering ───────────────────────────────────────────────────────────

fn five_event_block(store_hash: &str) -> Vec<Event> {
    (0..5)
        .map(|index| Event {
            block_hash: store_hash.to_string(),
            index,
            contract: "0xtoken".into(),
            name: EventName::known("Transfer", json!({ "n": index })),
            extra_info: json!({}),
            proof: None,
        })
        .collect()
}

fn processor(store: Arc<MemoryStore>, indexer: Arc<MockIndexer>, alert_after: u32) -> EventProcessor {
    let config = WatcherBuilder::new()
        .ordering_violation_alert_after(alert_after)
        .build_config()
        .unwrap();
    EventProcessor::new(config, store, indexer, Arc::new(EventCache::new()))
}

#[tokio::test]
async fn out_of_order_event_waits_for_predecessor() {
    let store = Arc::new(MemoryStore::new());
    let indexer = Arc::new(MockIndexer::new());
    indexer.watch("0xtoken", "erc20");
    let header = chain("a", 7, 7, "0xparent").remove(0);
    let events = five_event_block(&header.hash);
    let mut progress = store
        .save_block(&BlockProgress::new(&header, 5), &events)
        .await
        .unwrap();
    let processor = processor(store.clone(), indexer.clone(), 5);

    processor.process_event(&mut progress, events[0].clone()).await.unwrap();
    let err = processor
        .process_event(&mut progress, events[2].clone())
        .await
        .unwrap_err();
    assert!(err.is_ordering_violation());
    assert!(err.is_retryable());

    processor.process_event(&mut progress, events[1].clone()).await.unwrap();
    processor.process_event(&mut progress, events[2].clone()).await.unwrap();

    let stored = store.block_progress(&header.hash).await.unwrap().unwrap();
    assert_eq!(stored.last_processed_event_index, Some(2));
    assert_eq!(stored.num_processed_events, 3);
    assert!(!stored.is_complete);
    let applied: Vec<u32> = indexer.applied_in(&header.hash).into_iter().map(|(i, _)| i).collect();
    assert_eq!(applied, vec![0, 1, 2]);
}

#[tokio::test]
async fn repeated_ordering_violation_escalates() {
    let store = Arc::new(MemoryStore::new());
    let indexer = Arc::new(MockIndexer::new());
    let header = chain("a", 3, 3, "0xparent").remove(0);
    let events = five_event_block(&header.hash);
    let mut progress = store
        .save_block(&BlockProgress::new(&header, 5), &events)
        .await
        .unwrap();
    let processor = processor(store, indexer, 2);

    let first = processor
        .process_event(&mut progress, events[3].clone())
        .await
        .unwrap_err();
    assert!(first.is_ordering_violation());
    let second = processor
        .process_event(&mut progress, events[3].clone())
        .await
        .unwrap_err();
    assert!(matches!(second, WatcherError::Corruption(_)));
    assert!(!second.is_retryable());
}

#[tokio::test]
async fn completion_invariant_holds_after_block_events() {
    let store = Arc::new(MemoryStore::new());
    let indexer = Arc::new(MockIndexer::new());
    indexer.watch("0xtoken", "erc20");
    let header = chain("a", 1, 1, "0xparent").remove(0);
    let events = five_event_block(&header.hash);
    store
        .save_block(&BlockProgress::new(&header, 5), &events)
        .await
        .unwrap();
    let processor = processor(store.clone(), indexer, 5);

    let progress = processor.process_block_events(&header.hash).await.unwrap().unwrap();
    assert!(progress.is_complete);
    assert_eq!(progress.num_processed_events, progress.num_events);
    assert_eq!(store.block_progress(&header.hash).await.unwrap().unwrap(), progress);
}

#[tokio::test]
async fn pruned_block_resets_violation_count() {
    let store = Arc::new(MemoryStore::new());
    let indexer = Arc::new(MockIndexer::new());
    let header = chain("a", 4, 4, "0xparent").remove(0);
    let events = five_event_block(&header.hash);
    let mut progress = store
        .save_block(&BlockProgress::new(&header, 5), &events)
        .await
        .unwrap();
    let processor = processor(store.clone(), indexer, 2);

    let first = processor
        .process_event(&mut progress, events[3].clone())
        .await
        .unwrap_err();
    assert!(first.is_ordering_violation());

    store.mark_blocks_pruned(&[header.hash.clone()]).await.unwrap();
    assert!(processor.process_block_events(&header.hash).await.unwrap().is_none());

    // the count starts over instead of escalating
    let again = processor
        .process_event(&mut progress, events[3].clone())
        .await
        .unwrap_err();
    assert!(again.is_ordering_violation());
}

// ─── Resuming after a failed event ────────────────────────────────────────────

fn ordered_processor(
    store: Arc<MemoryStore>,
    indexer: Arc<MockIndexer>,
    ordering: EventOrdering,
    batched: bool,
) -> EventProcessor {
    let config = WatcherBuilder::new()
        .event_ordering(ordering)
        .batch_event_updates(batched)
        .build_config()
        .unwrap();
    EventProcessor::new(config, store, indexer, Arc::new(EventCache::new()))
}

/// Runs a five-event block whose third event fails once, then reruns it.
/// Returns the ordinals handed to the indexer.
async fn rerun_after_failure(ordering: EventOrdering, batched: bool) -> Vec<u32> {
    let store = Arc::new(MemoryStore::new());
    let indexer = Arc::new(MockIndexer::new());
    indexer.watch("0xtoken", "erc20");
    let header = chain("a", 5, 5, "0xparent").remove(0);
    store
        .save_block(&BlockProgress::new(&header, 5), &five_event_block(&header.hash))
        .await
        .unwrap();
    indexer.fail_once(&header.hash, 2);
    let processor = ordered_processor(store.clone(), indexer.clone(), ordering, batched);

    let err = processor.process_block_events(&header.hash).await.unwrap_err();
    assert!(err.is_retryable());
    let stored = store.block_progress(&header.hash).await.unwrap().unwrap();
    assert_eq!(stored.last_processed_event_index, Some(1));
    assert_eq!(stored.num_processed_events, 2);

    let progress = processor.process_block_events(&header.hash).await.unwrap().unwrap();
    assert!(progress.is_complete);
    assert_eq!(progress.num_processed_events, 5);
    indexer.applied_in(&header.hash).into_iter().map(|(i, _)| i).collect()
}

#[tokio::test]
async fn per_event_updates_resume_after_failed_event() {
    assert_eq!(rerun_after_failure(EventOrdering::Sequential, false).await, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn batched_updates_resume_after_failed_event() {
    assert_eq!(rerun_after_failure(EventOrdering::Sequential, true).await, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn watched_first_resumes_after_failed_event() {
    assert_eq!(rerun_after_failure(EventOrdering::WatchedFirst, false).await, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn watched_first_does_not_reapply_events_ahead_of_prefix() {
    let store = Arc::new(MemoryStore::new());
    let indexer = Arc::new(MockIndexer::new());
    indexer.watch("0xtoken", "erc20");
    let header = chain("a", 6, 6, "0xparent").remove(0);
    let mut events = five_event_block(&header.hash);
    events[0].contract = "0xother".into();
    store
        .save_block(&BlockProgress::new(&header, 5), &events)
        .await
        .unwrap();
    indexer.fail_once(&header.hash, 3);
    let processor = ordered_processor(store.clone(), indexer.clone(), EventOrdering::WatchedFirst, false);

    processor.process_block_events(&header.hash).await.unwrap_err();
    // 1 and 2 went through but 0 has not, so nothing is recorded yet
    let stored = store.block_progress(&header.hash).await.unwrap().unwrap();
    assert_eq!(stored.last_processed_event_index, None);

    let progress = processor.process_block_events(&header.hash).await.unwrap().unwrap();
    assert!(progress.is_complete);
    let applied: Vec<u32> = indexer.applied_in(&header.hash).into_iter().map(|(i, _)| i).collect();
    assert_eq!(applied, vec![1, 2, 3, 4]);
}

// ─── Reorg-aware reads ────────────────────────────────────────────────────────

fn version(block: &BlockHeader, value: u64) -> EntityVersion {
    EntityVersion {
        entity_type: "Pool".into(),
        entity_id: "0xpool".into(),
        block_hash: block.hash.clone(),
        block_number: block.number,
        data: json!({ "liquidity": value }),
    }
}

#[tokio::test]
async fn prev_version_falls_back_below_frothy_boundary() {
    let store = MemoryStore::new();
    let depth = 3;
    let trunk = chain("a", 0, 10, "0xgenesis");
    let branch = chain("b", 6, 10, &trunk[5].hash);
    insert(&store, &trunk).await;
    insert(&store, &branch).await;

    store.save_entity_version(&version(&trunk[2], 20)).await.unwrap();
    // written on the other branch, inside the region height-wise
    store.save_entity_version(&version(&trunk[8], 80)).await.unwrap();

    let region = store.frothy_region(&branch[4].hash, depth).await.unwrap();
    assert_eq!(region.block_hashes.len(), 4);
    assert_eq!(region.boundary_block_number, 6);
    assert!(!region.contains(&trunk[8].hash));

    let seen = prev_entity_version(&store, "Pool", "0xpool", &branch[4].hash, depth)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.block_hash, trunk[2].hash);
    assert_eq!(seen.data, json!({ "liquidity": 20 }));

    // from the trunk, the branch-local write is visible
    let seen = prev_entity_version(&store, "Pool", "0xpool", &trunk[10].hash, depth)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.block_hash, trunk[8].hash);

    assert!(prev_entity_version(&store, "Pool", "0xother", &trunk[10].hash, depth)
        .await
        .unwrap()
        .is_none());
}
