//! Ordered application of a block's events.
//!
//! Events of a block are applied strictly by ordinal. Events of watched
//! contracts that were fetched before the contract became watched carry the
//! unknown placeholder; they are decoded on first encounter and the decoded
//! name is persisted so it is never derived again.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::config::{EventOrdering, WatcherConfig};
use crate::error::WatcherError;
use crate::store::Store;
use crate::types::{BlockProgress, Event, EventName};
use crate::upstream::{EventCache, Indexer};

pub struct EventProcessor {
    config: WatcherConfig,
    store: Arc<dyn Store>,
    indexer: Arc<dyn Indexer>,
    cache: Arc<EventCache>,
    /// Ordering violations seen per block hash.
    violations: Mutex<HashMap<String, u32>>,
    /// Ordinals applied in watched-first mode beyond the recorded prefix.
    held: Mutex<HashMap<String, BTreeSet<u32>>>,
}

impl EventProcessor {
    pub fn new(
        config: WatcherConfig,
        store: Arc<dyn Store>,
        indexer: Arc<dyn Indexer>,
        cache: Arc<EventCache>,
    ) -> Self {
        Self {
            config,
            store,
            indexer,
            cache,
            violations: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
        }
    }

    fn violations(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.violations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, BTreeSet<u32>>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forget(&self, block_hash: &str) {
        self.violations().remove(block_hash);
        self.held().remove(block_hash);
    }

    /// Apply every outstanding event of `block_hash`.
    ///
    /// Returns the block's progress afterwards, or `None` if the block is
    /// gone (rewound) or pruned.
    pub async fn process_block_events(&self, block_hash: &str) -> Result<Option<BlockProgress>, WatcherError> {
        let Some(mut progress) = self.store.block_progress(block_hash).await? else {
            warn!(block_hash, "block not found, skipping events");
            self.cache.remove(block_hash);
            self.forget(block_hash);
            return Ok(None);
        };
        if progress.is_pruned {
            debug!(block_number = progress.block_number, block_hash, "block pruned, skipping events");
            self.cache.remove(block_hash);
            self.forget(block_hash);
            return Ok(None);
        }
        if progress.is_complete {
            return Ok(Some(progress));
        }

        let events = self.load_events(&progress).await?;
        let pending: Vec<Event> = events
            .into_iter()
            .filter(|e| progress.last_processed_event_index.map_or(true, |last| e.index > last))
            .collect();

        match self.config.event_ordering {
            EventOrdering::Sequential => {
                for event in pending {
                    if let Err(err) = self.process_event(&mut progress, event).await {
                        self.flush_partial(&progress).await;
                        return Err(err);
                    }
                }
            }
            EventOrdering::WatchedFirst => self.process_watched_first(&mut progress, pending).await?,
        }

        if progress.is_complete {
            self.complete(&progress).await?;
        } else if self.config.batch_event_updates {
            self.store.update_block_progress(&progress).await?;
        }
        Ok(Some(progress))
    }

    /// Apply one event to `progress`.
    ///
    /// Fails with an ordering violation unless `event` directly follows the
    /// last processed event. Repeated violations on the same block escalate
    /// to corruption.
    pub async fn process_event(&self, progress: &mut BlockProgress, event: Event) -> Result<(), WatcherError> {
        if let Err(err) = progress.check_next_event(event.index) {
            return Err(self.escalate(progress, err));
        }
        let index = event.index;
        self.apply(event).await?;
        progress.record_processed(index)?;
        if !self.config.batch_event_updates && !progress.is_complete {
            self.store.update_block_progress(progress).await?;
        }
        Ok(())
    }

    async fn process_watched_first(
        &self,
        progress: &mut BlockProgress,
        pending: Vec<Event>,
    ) -> Result<(), WatcherError> {
        let Some(first) = pending.first() else {
            return Ok(());
        };
        if let Err(err) = progress.check_next_event(first.index) {
            return Err(self.escalate(progress, err));
        }

        let watched_at_start: HashSet<String> = pending
            .iter()
            .filter(|e| self.indexer.is_watched_contract(&e.contract).is_some())
            .map(|e| e.contract.clone())
            .collect();
        let (first_pass, deferred): (Vec<Event>, Vec<Event>) = pending
            .into_iter()
            .partition(|e| watched_at_start.contains(&e.contract));
        debug!(
            block_number = progress.block_number,
            watched = first_pass.len(),
            deferred = deferred.len(),
            "applying events of watched contracts first"
        );

        // Ordinals applied by an earlier failed pass are not applied again.
        let mut applied = self.held().remove(&progress.block_hash).unwrap_or_default();
        for event in first_pass.into_iter().chain(deferred) {
            if applied.contains(&event.index) {
                continue;
            }
            let index = event.index;
            if let Err(err) = self.apply(event).await {
                self.hold_applied(progress, applied).await;
                return Err(err);
            }
            applied.insert(index);
        }
        for index in applied {
            progress.record_processed(index)?;
        }
        Ok(())
    }

    /// Record the contiguous prefix of `applied` on `progress` and keep the
    /// rest in memory for the next pass over the block.
    async fn hold_applied(&self, progress: &mut BlockProgress, mut applied: BTreeSet<u32>) {
        let mut next = progress.last_processed_event_index.map_or(0, |last| last + 1);
        let mut advanced = false;
        while applied.remove(&next) {
            if progress.record_processed(next).is_err() {
                break;
            }
            advanced = true;
            next += 1;
        }
        if advanced {
            if let Err(e) = self.store.update_block_progress(progress).await {
                warn!(block_number = progress.block_number, error = %e, "failed to record applied events");
            }
        }
        if !applied.is_empty() {
            debug!(
                block_number = progress.block_number,
                held = applied.len(),
                "holding events applied out of ordinal order"
            );
            self.held().insert(progress.block_hash.clone(), applied);
        }
    }

    /// Persist counters of events applied before a failure when they are
    /// otherwise only written at block completion.
    async fn flush_partial(&self, progress: &BlockProgress) {
        if !self.config.batch_event_updates || progress.num_processed_events == 0 {
            return;
        }
        if let Err(e) = self.store.update_block_progress(progress).await {
            warn!(block_number = progress.block_number, error = %e, "failed to flush event progress");
        }
    }

    /// Decode if needed and hand a watched contract's event to the indexer.
    async fn apply(&self, mut event: Event) -> Result<(), WatcherError> {
        let Some(contract) = self.indexer.is_watched_contract(&event.contract) else {
            return Ok(());
        };
        if event.name.is_unknown() {
            let parsed = self
                .indexer
                .parse_event_name_and_args(&contract.kind, &event.extra_info)?;
            debug!(
                block_hash = %event.block_hash,
                index = event.index,
                contract = %event.contract,
                event_name = %parsed.name,
                "resolved event name"
            );
            event.name = EventName::known(parsed.name, parsed.info);
            if self.config.prefetch_events {
                self.cache.update(&event);
            } else {
                self.store.save_event(&event).await?;
            }
        }
        self.indexer.process_event(&event).await
    }

    fn escalate(&self, progress: &BlockProgress, err: WatcherError) -> WatcherError {
        let attempts = {
            let mut violations = self.violations();
            let count = violations.entry(progress.block_hash.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempts >= self.config.ordering_violation_alert_after {
            error!(
                block_number = progress.block_number,
                block_hash = %progress.block_hash,
                attempts,
                error = %err,
                "events repeatedly out of order"
            );
            WatcherError::Corruption(format!("{err} (after {attempts} attempts)"))
        } else {
            warn!(block_number = progress.block_number, attempts, error = %err, "event out of order");
            err
        }
    }

    /// Events of the block, from the prefetch cache or the store.
    ///
    /// Refetches from the indexer when fewer events are available than the
    /// block recorded, e.g. after a restart lost the prefetch cache.
    async fn load_events(&self, progress: &BlockProgress) -> Result<Vec<Event>, WatcherError> {
        if let Some(events) = self.cache.get(&progress.block_hash) {
            if events.len() == progress.num_events as usize {
                return Ok(events);
            }
        }
        let stored = self.store.block_events(&progress.block_hash, None).await?;
        if stored.len() == progress.num_events as usize {
            return Ok(stored);
        }

        debug!(block_number = progress.block_number, "events missing, refetching");
        let fetched = self.indexer.fetch_block_events(&progress.header()).await?;
        let events = Event::number_all(&progress.block_hash, fetched);
        if events.len() != progress.num_events as usize {
            return Err(WatcherError::Corruption(format!(
                "block {} recorded {} events, upstream returned {}",
                progress.block_hash,
                progress.num_events,
                events.len()
            )));
        }
        if self.config.prefetch_events {
            self.cache.insert(&progress.block_hash, events.clone());
        } else {
            for event in &events {
                self.store.save_event(event).await?;
            }
        }
        Ok(events)
    }

    async fn complete(&self, progress: &BlockProgress) -> Result<(), WatcherError> {
        let events = self.cache.remove(&progress.block_hash).unwrap_or_default();
        self.store.complete_block(progress, &events).await?;
        self.forget(&progress.block_hash);
        info!(
            block_number = progress.block_number,
            block_hash = %progress.block_hash,
            num_events = progress.num_events,
            "block complete"
        );
        Ok(())
    }
}
