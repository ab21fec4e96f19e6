//! SQLite storage backend for the scanner.
//!
//! Persists cursors, block snapshots and unscanned records to a single
//! SQLite file. Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use utxoscan_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./scanner.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use utxoscan_core::cursor::{Cursor, CursorStore};
use utxoscan_core::error::ScanError;
use utxoscan_core::types::Block;
use utxoscan_core::unscan::{UnscanStore, UnscanTask};

fn storage_err(e: impl std::fmt::Display) -> ScanError {
    ScanError::Storage(e.to_string())
}

/// SQLite-backed storage for cursors, block snapshots and unscanned records.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./scanner.db"`) or a full
    /// SQLite URL (`"sqlite:./scanner.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ScanError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, ScanError> {
        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), ScanError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cursors (
                symbol       TEXT    NOT NULL PRIMARY KEY,
                block_height INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // Block snapshots, one per height (fork lookups)
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                symbol       TEXT    NOT NULL,
                block_height INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                block_json   TEXT    NOT NULL,
                PRIMARY KEY (symbol, block_height)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS unscan_tasks (
                symbol       TEXT    NOT NULL,
                id           TEXT    NOT NULL,
                block_height INTEGER NOT NULL,
                txid         TEXT    NOT NULL,
                reason       TEXT    NOT NULL,
                created_at   INTEGER NOT NULL,
                PRIMARY KEY (symbol, id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_unscan_height ON unscan_tasks (symbol, block_height);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Number of pending unscanned records for `symbol`.
    pub async fn unscanned_count(&self, symbol: &str) -> Result<u64, ScanError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM unscan_tasks WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

fn task_from_row(row: &SqliteRow) -> UnscanTask {
    UnscanTask {
        id: row.get("id"),
        symbol: row.get("symbol"),
        block_height: row.get::<i64, _>("block_height") as u64,
        txid: row.get("txid"),
        reason: row.get("reason"),
        created_at: row.get("created_at"),
    }
}

// ─── CursorStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl CursorStore for SqliteStorage {
    async fn get_cursor(&self, symbol: &str) -> Result<Option<Cursor>, ScanError> {
        let row = sqlx::query("SELECT block_height, block_hash FROM cursors WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row.map(|r| {
            Cursor::new(
                r.get::<i64, _>("block_height") as u64,
                r.get::<String, _>("block_hash"),
            )
        }))
    }

    async fn set_cursor(&self, symbol: &str, height: u64, hash: &str) -> Result<(), ScanError> {
        sqlx::query(
            "INSERT OR REPLACE INTO cursors (symbol, block_height, block_hash, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(symbol)
        .bind(height as i64)
        .bind(hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(symbol, height, hash, "cursor saved");
        Ok(())
    }

    async fn get_cached_block(
        &self,
        symbol: &str,
        height: u64,
    ) -> Result<Option<Block>, ScanError> {
        let row = sqlx::query(
            "SELECT block_json FROM blocks WHERE symbol = ? AND block_height = ?",
        )
        .bind(symbol)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(r) => {
                let json: String = r.get("block_json");
                serde_json::from_str(&json).map(Some).map_err(storage_err)
            }
            None => Ok(None),
        }
    }

    async fn put_cached_block(&self, symbol: &str, block: &Block) -> Result<(), ScanError> {
        let json = serde_json::to_string(block).map_err(storage_err)?;

        sqlx::query(
            "INSERT OR REPLACE INTO blocks (symbol, block_height, block_hash, block_json)
             VALUES (?, ?, ?, ?)",
        )
        .bind(symbol)
        .bind(block.height as i64)
        .bind(&block.hash)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn prune_cached_blocks(&self, symbol: &str, height: u64) -> Result<u64, ScanError> {
        let result = sqlx::query("DELETE FROM blocks WHERE symbol = ? AND block_height < ?")
            .bind(symbol)
            .bind(height as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(result.rows_affected())
    }
}

// ─── UnscanStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl UnscanStore for SqliteStorage {
    async fn list_unscanned(&self, symbol: &str) -> Result<Vec<UnscanTask>, ScanError> {
        let rows = sqlx::query(
            "SELECT id, symbol, block_height, txid, reason, created_at
             FROM unscan_tasks WHERE symbol = ? ORDER BY block_height, txid",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows.iter().map(task_from_row).collect())
    }

    async fn insert_unscanned(&self, task: &UnscanTask) -> Result<bool, ScanError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO unscan_tasks
             (symbol, id, block_height, txid, reason, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.symbol)
        .bind(&task.id)
        .bind(task.block_height as i64)
        .bind(&task.txid)
        .bind(&task.reason)
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_unscanned(&self, symbol: &str, id: &str) -> Result<(), ScanError> {
        sqlx::query("DELETE FROM unscan_tasks WHERE symbol = ? AND id = ?")
            .bind(symbol)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    async fn delete_unscanned_at(
        &self,
        symbol: &str,
        block_height: u64,
    ) -> Result<u64, ScanError> {
        let result = sqlx::query("DELETE FROM unscan_tasks WHERE symbol = ? AND block_height = ?")
            .bind(symbol)
            .bind(block_height as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        debug!(symbol, block_height, removed = result.rows_affected(), "unscanned records cleared");
        Ok(result.rows_affected())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
