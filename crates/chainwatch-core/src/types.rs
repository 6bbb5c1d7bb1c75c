//! Shared types for the watcher pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WatcherError;

/// Placeholder event name stored until the emitting contract becomes watched.
pub const UNKNOWN_EVENT_NAME: &str = "__unknown__";

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// Block metadata as delivered by the upstream chain source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block hash (`0x…`).
    pub hash: String,
    /// Block number.
    pub number: u64,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl BlockHeader {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockHeader) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }

    pub fn pointer(&self) -> BlockPointer {
        BlockPointer::new(&self.hash, self.number)
    }
}

// ─── BlockPointer ─────────────────────────────────────────────────────────────

/// A `(hash, number)` reference to a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPointer {
    pub hash: String,
    pub number: u64,
}

impl BlockPointer {
    pub fn new(hash: impl Into<String>, number: u64) -> Self {
        Self {
            hash: hash.into(),
            number,
        }
    }
}

impl std::fmt::Display for BlockPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

// ─── BlockProgress ────────────────────────────────────────────────────────────

/// Per-block-hash indexing progress record.
///
/// Created once when a block's ancestry is resolved, with `num_events` fixed
/// at creation. `is_complete` holds exactly when every event has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProgress {
    pub block_hash: String,
    pub block_number: u64,
    pub parent_hash: String,
    pub block_timestamp: i64,
    pub num_events: u32,
    pub num_processed_events: u32,
    /// Ordinal of the last applied event; `None` before the first one.
    pub last_processed_event_index: Option<u32>,
    pub is_complete: bool,
    pub is_pruned: bool,
}

impl BlockProgress {
    /// A fresh progress row for `header` carrying `num_events` events.
    pub fn new(header: &BlockHeader, num_events: u32) -> Self {
        Self {
            block_hash: header.hash.clone(),
            block_number: header.number,
            parent_hash: header.parent_hash.clone(),
            block_timestamp: header.timestamp,
            num_events,
            num_processed_events: 0,
            last_processed_event_index: None,
            is_complete: num_events == 0,
            is_pruned: false,
        }
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            hash: self.block_hash.clone(),
            number: self.block_number,
            parent_hash: self.parent_hash.clone(),
            timestamp: self.block_timestamp,
        }
    }

    pub fn pointer(&self) -> BlockPointer {
        BlockPointer::new(&self.block_hash, self.block_number)
    }

    /// Returns `true` if every event has been applied.
    pub fn all_events_processed(&self) -> bool {
        self.num_processed_events >= self.num_events
    }

    /// Check that the event at ordinal `index` is the next one to apply.
    ///
    /// Ordinal 0 may only be applied first; any other ordinal requires its
    /// predecessor to be the last processed event.
    pub fn check_next_event(&self, index: u32) -> Result<(), WatcherError> {
        let in_order = match (index, self.last_processed_event_index) {
            (0, None) => true,
            (0, Some(_)) => false,
            (i, Some(last)) => last == i - 1,
            (_, None) => false,
        };
        if in_order {
            Ok(())
        } else {
            Err(WatcherError::OrderingViolation {
                block_number: self.block_number,
                block_hash: self.block_hash.clone(),
                index,
                last_processed: self.last_processed_event_index,
            })
        }
    }

    /// Advance the counters past the event at ordinal `index`.
    pub fn record_processed(&mut self, index: u32) -> Result<(), WatcherError> {
        if self.is_complete {
            return Ok(());
        }
        self.check_next_event(index)?;
        self.last_processed_event_index = Some(index);
        self.num_processed_events += 1;
        if self.all_events_processed() {
            self.is_complete = true;
        }
        Ok(())
    }
}

// ─── SyncStatus ───────────────────────────────────────────────────────────────

/// One of the three advancing pointers of [`SyncStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPointer {
    ChainHead,
    LatestIndexed,
    LatestCanonical,
}

impl std::fmt::Display for SyncPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChainHead => write!(f, "chain head"),
            Self::LatestIndexed => write!(f, "latest indexed"),
            Self::LatestCanonical => write!(f, "latest canonical"),
        }
    }
}

/// Singleton tracking how far the pipeline has progressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Highest block known upstream.
    pub chain_head: BlockPointer,
    /// Highest block with all events applied.
    pub latest_indexed: BlockPointer,
    /// Highest block resolved as irreversible.
    pub latest_canonical: BlockPointer,
    /// The block the pipeline started from.
    pub initial_indexed: BlockPointer,
}

impl SyncStatus {
    /// Initial status when `block` is the first block ever seen.
    ///
    /// The starting block is taken as canonical so its ancestry is never
    /// resolved; the indexed pointer sits one below it until it completes.
    pub fn bootstrap(block: &BlockPointer) -> Self {
        Self {
            chain_head: block.clone(),
            latest_indexed: BlockPointer::new("", block.number.saturating_sub(1)),
            latest_canonical: block.clone(),
            initial_indexed: block.clone(),
        }
    }

    pub fn get(&self, pointer: SyncPointer) -> &BlockPointer {
        match pointer {
            SyncPointer::ChainHead => &self.chain_head,
            SyncPointer::LatestIndexed => &self.latest_indexed,
            SyncPointer::LatestCanonical => &self.latest_canonical,
        }
    }

    /// Compare-and-advance: accept `block` only if it is not behind the
    /// current value, unless `force` is set. Returns `true` if updated.
    pub fn advance(&mut self, pointer: SyncPointer, block: &BlockPointer, force: bool) -> bool {
        let slot = match pointer {
            SyncPointer::ChainHead => &mut self.chain_head,
            SyncPointer::LatestIndexed => &mut self.latest_indexed,
            SyncPointer::LatestCanonical => &mut self.latest_canonical,
        };
        if force || block.number >= slot.number {
            *slot = block.clone();
            true
        } else {
            false
        }
    }

    /// How far indexing is ahead of pruning.
    pub fn reorg_lag(&self) -> u64 {
        self.latest_indexed
            .number
            .saturating_sub(self.latest_canonical.number)
    }
}

// ─── Events ───────────────────────────────────────────────────────────────────

/// Name and decoded arguments of an event, or the unresolved placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventName {
    /// The emitting contract was not watched when the event was fetched.
    Unknown,
    Known { name: String, info: Value },
}

impl EventName {
    pub fn known(name: impl Into<String>, info: Value) -> Self {
        Self::Known {
            name: name.into(),
            info,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// The name as persisted (`UNKNOWN_EVENT_NAME` for the placeholder).
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unknown => UNKNOWN_EVENT_NAME,
            Self::Known { name, .. } => name,
        }
    }

    pub fn info(&self) -> Option<&Value> {
        match self {
            Self::Unknown => None,
            Self::Known { info, .. } => Some(info),
        }
    }

    /// Rebuild from the persisted `(event_name, event_info)` columns.
    pub fn from_columns(name: String, info: Option<Value>) -> Self {
        if name == UNKNOWN_EVENT_NAME {
            Self::Unknown
        } else {
            Self::Known {
                name,
                info: info.unwrap_or(Value::Null),
            }
        }
    }
}

/// An event as returned by the downstream indexer, before it is numbered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedEvent {
    /// Address of the emitting contract.
    pub contract: String,
    pub name: EventName,
    /// The raw log, kept so the event can be decoded later.
    pub extra_info: Value,
    /// Opaque proof blob, stored and forwarded untouched.
    pub proof: Option<String>,
}

/// An event belonging to exactly one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub block_hash: String,
    /// Ordinal within the block, dense from 0.
    pub index: u32,
    pub contract: String,
    pub name: EventName,
    pub extra_info: Value,
    pub proof: Option<String>,
}

impl Event {
    /// Number fetched events in order for the block `block_hash`.
    pub fn number_all(block_hash: &str, fetched: Vec<FetchedEvent>) -> Vec<Event> {
        fetched
            .into_iter()
            .enumerate()
            .map(|(i, e)| Event {
                block_hash: block_hash.to_string(),
                index: i as u32,
                contract: e.contract,
                name: e.name,
                extra_info: e.extra_info,
                proof: e.proof,
            })
            .collect()
    }
}

/// Result of decoding a raw log for a watched contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub name: String,
    pub info: Value,
}

// ─── Contracts and derived state ──────────────────────────────────────────────

/// A watched contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub address: String,
    /// Contract kind, selects the decoder (e.g. `"factory"`, `"pool"`).
    pub kind: String,
    /// First block at which the contract is watched.
    pub starting_block: u64,
}

impl Contract {
    pub fn new(address: impl Into<String>, kind: impl Into<String>, starting_block: u64) -> Self {
        Self {
            address: address.into(),
            kind: kind.into(),
            starting_block,
        }
    }
}

/// A version of a derived entity written at a specific block.
///
/// Versions are append-only; reads resolve the version visible from a
/// branch by walking that branch's ancestry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVersion {
    pub entity_type: String,
    pub entity_id: String,
    pub block_hash: String,
    pub block_number: u64,
    pub data: Value,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
