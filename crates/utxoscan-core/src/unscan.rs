//! Unscanned records — extraction failures kept for a later retry pass.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::record::stable_id;

/// A block or transaction that could not be processed.
///
/// `id` is derived from `(block_height, txid)` only, so recording the same
/// failure twice yields the same task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnscanTask {
    pub id: String,
    pub symbol: String,
    /// `0` for mempool transactions.
    pub block_height: u64,
    /// Empty when the whole block failed.
    pub txid: String,
    pub reason: String,
    /// Unix timestamp of the first failure.
    pub created_at: i64,
}

impl UnscanTask {
    pub fn new(
        symbol: impl Into<String>,
        block_height: u64,
        txid: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let txid = txid.into();
        Self {
            id: Self::id_for(block_height, &txid),
            symbol: symbol.into(),
            block_height,
            txid,
            reason: reason.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// The de-duplication key for `(height, txid)`.
    pub fn id_for(block_height: u64, txid: &str) -> String {
        stable_id(&[&block_height.to_string(), txid])
    }

    /// Returns `true` if the whole block failed rather than one transaction.
    pub fn is_block_level(&self) -> bool {
        self.txid.is_empty()
    }
}

/// Persistence for unscanned tasks, keyed by chain symbol and task id.
#[async_trait]
pub trait UnscanStore: Send + Sync {
    /// All pending tasks for `symbol`.
    async fn list_unscanned(&self, symbol: &str) -> Result<Vec<UnscanTask>, ScanError>;

    /// Insert `task` unless a task with the same id exists.
    ///
    /// Returns `true` if the task was inserted.
    async fn insert_unscanned(&self, task: &UnscanTask) -> Result<bool, ScanError>;

    /// Delete one task by id.
    async fn delete_unscanned(&self, symbol: &str, id: &str) -> Result<(), ScanError>;

    /// Delete every task at `block_height`; returns how many were removed.
    async fn delete_unscanned_at(&self, symbol: &str, block_height: u64)
        -> Result<u64, ScanError>;
}
