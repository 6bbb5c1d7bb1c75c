//! chainwatch-storage — SQL backends for the chainwatch [`Store`] trait.
//!
//! | Backend | Feature | Use case |
//! |---------|---------|----------|
//! | [`sqlite::SqliteStore`] | `sqlite` (default) | single-process deployments, tests |
//! | [`postgres::PostgresStore`] | `postgres` | shared production databases |
//!
//! Both backends answer ancestor and frothy-region queries with a single
//! recursive CTE instead of one round-trip per parent hop.
//!
//! [`Store`]: chainwatch_core::Store

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
use chainwatch_core::SyncPointer;

/// Column prefix of a sync status pointer (`{prefix}_block_hash`, `{prefix}_block_number`).
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn pointer_column(pointer: SyncPointer) -> &'static str {
    match pointer {
        SyncPointer::ChainHead => "chain_head",
        SyncPointer::LatestIndexed => "latest_indexed",
        SyncPointer::LatestCanonical => "latest_canonical",
    }
}
