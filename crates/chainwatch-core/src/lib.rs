//! chainwatch-core — reorg-aware block and event indexing pipeline.
//!
//! # Architecture
//!
//! ```text
//! ChainSource ──► Watcher (chain head, cold start, resume)
//!                    │ Index
//!                    ▼
//!                 JobQueue ── block-processing ──► BlockProcessor (ancestry, progress, fetch)
//!                    │                         └─► ChainPruner    (one height per pass)
//!                    │
//!                    └────── event-processing ──► EventProcessor (ordered apply, lazy decode)
//!                                                   │ completion
//!                                                   ▼
//!                                     latest indexed, Prune, next height
//!
//! Store (memory / SQLite / Postgres) ◄── frothy region and ancestor queries
//! ```

pub mod admin;
pub mod block_processor;
pub mod builder;
pub mod config;
pub mod error;
pub mod event_processor;
pub mod frothy;
pub mod job;
pub mod memory;
pub mod pruner;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod store;
pub mod types;
pub mod upstream;
pub mod watcher;

pub use admin::reset_to_block;
pub use builder::WatcherBuilder;
pub use config::{EventOrdering, QueueConfig, WatcherConfig};
pub use error::WatcherError;
pub use frothy::{prev_entity_version, FrothyRegion};
pub use job::{Job, JobOutcome, JobPayload, JobStatus, QUEUE_BLOCK_PROCESSING, QUEUE_EVENT_PROCESSING};
pub use memory::MemoryStore;
pub use queue::{CompletionHandler, JobHandler, JobQueue};
pub use store::Store;
pub use types::{
    BlockHeader, BlockPointer, BlockProgress, Contract, EntityVersion, Event, EventName, FetchedEvent,
    ParsedEvent, SyncPointer, SyncStatus, UNKNOWN_EVENT_NAME,
};
pub use upstream::{ChainSource, EventCache, Indexer};
pub use watcher::Watcher;
