//! SQLite store for chainwatch.
//!
//! Persists block progress, events, the sync status and entity versions to a
//! single SQLite file. Uses `sqlx` with WAL mode for concurrent reads.
//!
//! # Usage
//! ```rust,no_run
//! use chainwatch_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./watcher.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainwatch_core::error::WatcherError;
use chainwatch_core::frothy::FrothyRegion;
use chainwatch_core::store::Store;
use chainwatch_core::types::{
    BlockPointer, BlockProgress, EntityVersion, Event, EventName, SyncPointer, SyncStatus,
    UNKNOWN_EVENT_NAME,
};

use crate::pointer_column;

const BLOCK_COLUMNS: &str = "block_hash, block_number, parent_hash, block_timestamp, num_events, \
     num_processed_events, last_processed_event_index, is_complete, is_pruned";

const EVENT_COLUMNS: &str =
    "block_hash, \"index\", contract, event_name, event_info, extra_info, proof";

const SYNC_COLUMNS: &str = "chain_head_block_hash, chain_head_block_number, \
     latest_indexed_block_hash, latest_indexed_block_number, \
     latest_canonical_block_hash, latest_canonical_block_number, \
     initial_indexed_block_hash, initial_indexed_block_number";

/// Walks `parent_hash` links from `?1` for at most `?2` hops.
const ANCESTORS_CTE: &str = "WITH RECURSIVE ancestors (block_hash, parent_hash, block_number, depth) AS (
        SELECT block_hash, parent_hash, block_number, 0
        FROM block_progress WHERE block_hash = ?1
        UNION ALL
        SELECT b.block_hash, b.parent_hash, b.block_number, a.depth + 1
        FROM block_progress b JOIN ancestors a ON b.block_hash = a.parent_hash
        WHERE a.depth < ?2
    )";

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./watcher.db"`) or a full
    /// SQLite URL (`"sqlite:./watcher.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, WatcherError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Uses a single connection so every query sees the same database.
    pub async fn in_memory() -> Result<Self, WatcherError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), WatcherError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS block_progress (
                block_hash                 TEXT    PRIMARY KEY,
                block_number               INTEGER NOT NULL,
                parent_hash                TEXT    NOT NULL,
                block_timestamp            INTEGER NOT NULL,
                num_events                 INTEGER NOT NULL,
                num_processed_events       INTEGER NOT NULL,
                last_processed_event_index INTEGER,
                is_complete                BOOLEAN NOT NULL,
                is_pruned                  BOOLEAN NOT NULL DEFAULT 0
            );",
            "CREATE INDEX IF NOT EXISTS idx_block_progress_number ON block_progress (block_number);",
            "CREATE INDEX IF NOT EXISTS idx_block_progress_parent ON block_progress (parent_hash);",
            "CREATE TABLE IF NOT EXISTS sync_status (
                id                            INTEGER PRIMARY KEY CHECK (id = 1),
                chain_head_block_hash         TEXT    NOT NULL,
                chain_head_block_number       INTEGER NOT NULL,
                latest_indexed_block_hash     TEXT    NOT NULL,
                latest_indexed_block_number   INTEGER NOT NULL,
                latest_canonical_block_hash   TEXT    NOT NULL,
                latest_canonical_block_number INTEGER NOT NULL,
                initial_indexed_block_hash    TEXT    NOT NULL,
                initial_indexed_block_number  INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS event (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                block_hash TEXT    NOT NULL REFERENCES block_progress (block_hash),
                \"index\"  INTEGER NOT NULL,
                contract   TEXT    NOT NULL,
                event_name TEXT    NOT NULL,
                event_info TEXT,
                extra_info TEXT    NOT NULL,
                proof      TEXT,
                UNIQUE (block_hash, \"index\")
            );",
            "CREATE INDEX IF NOT EXISTS idx_event_contract ON event (contract);",
            "CREATE TABLE IF NOT EXISTS entity_version (
                entity_type  TEXT    NOT NULL,
                entity_id    TEXT    NOT NULL,
                block_hash   TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                data         TEXT    NOT NULL,
                PRIMARY KEY (entity_type, entity_id, block_hash)
            );",
            "CREATE INDEX IF NOT EXISTS idx_entity_version_number
                ON entity_version (entity_type, entity_id, block_number);",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| WatcherError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}

// ─── Row mapping ──────────────────────────────────────────────────────────────

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, WatcherError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| WatcherError::Storage(format!("column {column}: {e}")))
}

fn block_from_row(row: &SqliteRow) -> Result<BlockProgress, WatcherError> {
    Ok(BlockProgress {
        block_hash: get(row, "block_hash")?,
        block_number: get::<i64>(row, "block_number")? as u64,
        parent_hash: get(row, "parent_hash")?,
        block_timestamp: get(row, "block_timestamp")?,
        num_events: get::<i64>(row, "num_events")? as u32,
        num_processed_events: get::<i64>(row, "num_processed_events")? as u32,
        last_processed_event_index: get::<Option<i64>>(row, "last_processed_event_index")?
            .map(|i| i as u32),
        is_complete: get(row, "is_complete")?,
        is_pruned: get(row, "is_pruned")?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<Event, WatcherError> {
    let info = get::<Option<String>>(row, "event_info")?
        .map(|s| serde_json::from_str::<Value>(&s))
        .transpose()?;
    let extra_info: String = get(row, "extra_info")?;
    Ok(Event {
        block_hash: get(row, "block_hash")?,
        index: get::<i64>(row, "index")? as u32,
        contract: get(row, "contract")?,
        name: EventName::from_columns(get(row, "event_name")?, info),
        extra_info: serde_json::from_str(&extra_info)?,
        proof: get(row, "proof")?,
    })
}

fn pointer_from_row(row: &SqliteRow, prefix: &str) -> Result<BlockPointer, WatcherError> {
    Ok(BlockPointer::new(
        get::<String>(row, &format!("{prefix}_block_hash"))?,
        get::<i64>(row, &format!("{prefix}_block_number"))? as u64,
    ))
}

fn sync_status_from_row(row: &SqliteRow) -> Result<SyncStatus, WatcherError> {
    Ok(SyncStatus {
        chain_head: pointer_from_row(row, "chain_head")?,
        latest_indexed: pointer_from_row(row, "latest_indexed")?,
        latest_canonical: pointer_from_row(row, "latest_canonical")?,
        initial_indexed: pointer_from_row(row, "initial_indexed")?,
    })
}

fn entity_from_row(row: &SqliteRow) -> Result<EntityVersion, WatcherError> {
    let data: String = get(row, "data")?;
    Ok(EntityVersion {
        entity_type: get(row, "entity_type")?,
        entity_id: get(row, "entity_id")?,
        block_hash: get(row, "block_hash")?,
        block_number: get::<i64>(row, "block_number")? as u64,
        data: serde_json::from_str(&data)?,
    })
}

fn event_info_text(event: &Event) -> Result<Option<String>, WatcherError> {
    Ok(event.name.info().map(serde_json::to_string).transpose()?)
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[async_trait]
impl Store for SqliteStore {
    async fn sync_status(&self) -> Result<Option<SyncStatus>, WatcherError> {
        let row = sqlx::query(&format!("SELECT {SYNC_COLUMNS} FROM sync_status WHERE id = 1"))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;
        row.as_ref().map(sync_status_from_row).transpose()
    }

    async fn init_sync_status(&self, block: &BlockPointer) -> Result<SyncStatus, WatcherError> {
        let status = SyncStatus::bootstrap(block);
        let sql = format!(
            "INSERT INTO sync_status (id, {SYNC_COLUMNS}) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO NOTHING"
        );
        let mut query = sqlx::query(&sql);
        for pointer in [
            &status.chain_head,
            &status.latest_indexed,
            &status.latest_canonical,
            &status.initial_indexed,
        ] {
            query = query.bind(pointer.hash.clone()).bind(pointer.number as i64);
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;

        self.sync_status()
            .await?
            .ok_or_else(|| WatcherError::Storage("sync status missing after insert".into()))
    }

    async fn advance_sync_status(
        &self,
        pointer: SyncPointer,
        block: &BlockPointer,
        force: bool,
    ) -> Result<SyncStatus, WatcherError> {
        let column = pointer_column(pointer);
        let result = sqlx::query(&format!(
            "UPDATE sync_status SET {column}_block_hash = ?1, {column}_block_number = ?2
             WHERE id = 1 AND (?3 OR {column}_block_number <= ?2)"
        ))
        .bind(&block.hash)
        .bind(block.number as i64)
        .bind(force)
        .execute(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        if result.rows_affected() > 0 {
            debug!(%pointer, block = %block, "sync status advanced");
        }

        self.sync_status()
            .await?
            .ok_or_else(|| WatcherError::Storage("sync status not initialised".into()))
    }

    async fn block_progress(&self, block_hash: &str) -> Result<Option<BlockProgress>, WatcherError> {
        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM block_progress WHERE block_hash = ?"
        ))
        .bind(block_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn blocks_at_height(
        &self,
        block_number: u64,
        include_pruned: bool,
    ) -> Result<Vec<BlockProgress>, WatcherError> {
        let rows = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM block_progress
             WHERE block_number = ? AND (? OR is_pruned = 0)
             ORDER BY block_hash"
        ))
        .bind(block_number as i64)
        .bind(include_pruned)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        rows.iter().map(block_from_row).collect()
    }

    async fn save_block(
        &self,
        progress: &BlockProgress,
        events: &[Event],
    ) -> Result<BlockProgress, WatcherError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO block_progress ({BLOCK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (block_hash) DO NOTHING"
        ))
        .bind(&progress.block_hash)
        .bind(progress.block_number as i64)
        .bind(&progress.parent_hash)
        .bind(progress.block_timestamp)
        .bind(progress.num_events as i64)
        .bind(progress.num_processed_events as i64)
        .bind(progress.last_processed_event_index.map(i64::from))
        .bind(progress.is_complete)
        .bind(progress.is_pruned)
        .execute(&mut *tx)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?
        .rows_affected();

        if inserted > 0 {
            for event in events {
                sqlx::query(&format!(
                    "INSERT INTO event ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (block_hash, \"index\") DO NOTHING"
                ))
                .bind(&event.block_hash)
                .bind(i64::from(event.index))
                .bind(&event.contract)
                .bind(event.name.as_str())
                .bind(event_info_text(event)?)
                .bind(serde_json::to_string(&event.extra_info)?)
                .bind(&event.proof)
                .execute(&mut *tx)
                .await
                .map_err(|e| WatcherError::Storage(e.to_string()))?;
            }
        }

        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM block_progress WHERE block_hash = ?"
        ))
        .bind(&progress.block_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        let saved = block_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;
        debug!(block = progress.block_number, inserted, events = events.len(), "block progress saved");
        Ok(saved)
    }

    async fn update_block_progress(&self, progress: &BlockProgress) -> Result<(), WatcherError> {
        let result = sqlx::query(
            "UPDATE block_progress
             SET num_processed_events = ?, last_processed_event_index = ?, is_complete = ?, is_pruned = ?
             WHERE block_hash = ?",
        )
        .bind(progress.num_processed_events as i64)
        .bind(progress.last_processed_event_index.map(i64::from))
        .bind(progress.is_complete)
        .bind(progress.is_pruned)
        .bind(&progress.block_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(WatcherError::Storage(format!("block {} not found", progress.block_hash)));
        }
        Ok(())
    }

    async fn complete_block(
        &self,
        progress: &BlockProgress,
        events: &[Event],
    ) -> Result<(), WatcherError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;

        for event in events {
            sqlx::query(&format!(
                "INSERT INTO event ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (block_hash, \"index\")
                 DO UPDATE SET event_name = excluded.event_name, event_info = excluded.event_info"
            ))
            .bind(&event.block_hash)
            .bind(i64::from(event.index))
            .bind(&event.contract)
            .bind(event.name.as_str())
            .bind(event_info_text(event)?)
            .bind(serde_json::to_string(&event.extra_info)?)
            .bind(&event.proof)
            .execute(&mut *tx)
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;
        }

        let result = sqlx::query(
            "UPDATE block_progress
             SET num_processed_events = ?, last_processed_event_index = ?, is_complete = ?
             WHERE block_hash = ?",
        )
        .bind(progress.num_processed_events as i64)
        .bind(progress.last_processed_event_index.map(i64::from))
        .bind(progress.is_complete)
        .bind(&progress.block_hash)
        .execute(&mut *tx)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(WatcherError::Storage(format!("block {} not found", progress.block_hash)));
        }

        tx.commit()
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))
    }

    async fn mark_blocks_pruned(&self, block_hashes: &[String]) -> Result<(), WatcherError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;
        for hash in block_hashes {
            sqlx::query("UPDATE block_progress SET is_pruned = 1 WHERE block_hash = ?")
                .bind(hash)
                .execute(&mut *tx)
                .await
                .map_err(|e| WatcherError::Storage(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))
    }

    async fn incomplete_blocks(&self) -> Result<Vec<BlockProgress>, WatcherError> {
        let rows = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM block_progress
             WHERE is_complete = 0 AND is_pruned = 0
             ORDER BY block_number, block_hash"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        rows.iter().map(block_from_row).collect()
    }

    async fn block_events(
        &self,
        block_hash: &str,
        after_index: Option<u32>,
    ) -> Result<Vec<Event>, WatcherError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM event
             WHERE block_hash = ? AND \"index\" > ?
             ORDER BY \"index\""
        ))
        .bind(block_hash)
        .bind(after_index.map_or(-1, i64::from))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        rows.iter().map(event_from_row).collect()
    }

    async fn save_event(&self, event: &Event) -> Result<(), WatcherError> {
        sqlx::query(&format!(
            "INSERT INTO event ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (block_hash, \"index\")
             DO UPDATE SET event_name = excluded.event_name, event_info = excluded.event_info"
        ))
        .bind(&event.block_hash)
        .bind(i64::from(event.index))
        .bind(&event.contract)
        .bind(event.name.as_str())
        .bind(event_info_text(event)?)
        .bind(serde_json::to_string(&event.extra_info)?)
        .bind(&event.proof)
        .execute(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn remove_unknown_events(&self, block_hash: &str) -> Result<u64, WatcherError> {
        let result = sqlx::query("DELETE FROM event WHERE block_hash = ? AND event_name = ?")
            .bind(block_hash)
            .bind(UNKNOWN_EVENT_NAME)
            .execute(&self.pool)
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn ancestor_at_depth(
        &self,
        block_hash: &str,
        depth: u64,
    ) -> Result<Option<String>, WatcherError> {
        let row = sqlx::query(&format!(
            "{ANCESTORS_CTE} SELECT block_hash FROM ancestors ORDER BY depth DESC LIMIT 1"
        ))
        .bind(block_hash)
        .bind(depth as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        row.as_ref().map(|r| get(r, "block_hash")).transpose()
    }

    async fn frothy_region(
        &self,
        block_hash: &str,
        max_depth: u64,
    ) -> Result<FrothyRegion, WatcherError> {
        let rows = sqlx::query(&format!(
            "{ANCESTORS_CTE} SELECT block_hash, block_number FROM ancestors ORDER BY depth"
        ))
        .bind(block_hash)
        .bind(max_depth as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;

        let oldest = match rows.last() {
            Some(row) => get::<i64>(row, "block_number")? as u64,
            None => return Err(WatcherError::Storage(format!("block {block_hash} not found"))),
        };
        Ok(FrothyRegion {
            block_hashes: rows.iter().map(|r| get(r, "block_hash")).collect::<Result<_, _>>()?,
            boundary_block_number: oldest.saturating_sub(1),
        })
    }

    async fn save_entity_version(&self, version: &EntityVersion) -> Result<(), WatcherError> {
        sqlx::query(
            "INSERT INTO entity_version (entity_type, entity_id, block_hash, block_number, data)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (entity_type, entity_id, block_hash) DO UPDATE SET data = excluded.data",
        )
        .bind(&version.entity_type)
        .bind(&version.entity_id)
        .bind(&version.block_hash)
        .bind(version.block_number as i64)
        .bind(serde_json::to_string(&version.data)?)
        .execute(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn entity_version_at(
        &self,
        entity_type: &str,
        entity_id: &str,
        block_hash: &str,
    ) -> Result<Option<EntityVersion>, WatcherError> {
        let row = sqlx::query(
            "SELECT entity_type, entity_id, block_hash, block_number, data FROM entity_version
             WHERE entity_type = ? AND entity_id = ? AND block_hash = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(block_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn latest_entity_version(
        &self,
        entity_type: &str,
        entity_id: &str,
        max_block_number: u64,
    ) -> Result<Option<EntityVersion>, WatcherError> {
        let row = sqlx::query(
            "SELECT v.entity_type, v.entity_id, v.block_hash, v.block_number, v.data
             FROM entity_version v JOIN block_progress b ON b.block_hash = v.block_hash
             WHERE v.entity_type = ? AND v.entity_id = ? AND v.block_number <= ? AND b.is_pruned = 0
             ORDER BY v.block_number DESC, v.block_hash
             LIMIT 1",
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(max_block_number as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WatcherError::Storage(e.to_string()))?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn rewind_to(&self, block: &BlockPointer) -> Result<(), WatcherError> {
        let number = block.number as i64;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;

        let deletes = [
            "DELETE FROM event WHERE block_hash IN
                (SELECT block_hash FROM block_progress WHERE block_number > ?)",
            "DELETE FROM entity_version WHERE block_number > ?",
            "DELETE FROM block_progress WHERE block_number > ?",
        ];
        for statement in deletes {
            sqlx::query(statement)
                .bind(number)
                .execute(&mut *tx)
                .await
                .map_err(|e| WatcherError::Storage(e.to_string()))?;
        }

        for pointer in [
            SyncPointer::ChainHead,
            SyncPointer::LatestIndexed,
            SyncPointer::LatestCanonical,
        ] {
            let column = pointer_column(pointer);
            sqlx::query(&format!(
                "UPDATE sync_status SET {column}_block_hash = ?1, {column}_block_number = ?2
                 WHERE id = 1 AND {column}_block_number > ?2"
            ))
            .bind(&block.hash)
            .bind(number)
            .execute(&mut *tx)
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| WatcherError::Storage(e.to_string()))?;
        debug!(block = %block, "store rewound");
        Ok(())
    }
}
