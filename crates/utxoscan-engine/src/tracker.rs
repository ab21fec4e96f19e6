//! Unscanned-record tracker — queues extraction failures for a retry pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use utxoscan_core::error::ScanError;
use utxoscan_core::unscan::{UnscanStore, UnscanTask};

/// Records failures for one chain symbol, de-duplicated on `(height, txid)`.
#[derive(Clone)]
pub struct UnscanTracker {
    store: Arc<dyn UnscanStore>,
    symbol: String,
}

impl UnscanTracker {
    pub fn new(store: Arc<dyn UnscanStore>, symbol: impl Into<String>) -> Self {
        Self {
            store,
            symbol: symbol.into(),
        }
    }

    /// Record a failure. A second failure for the same `(height, txid)` is a
    /// no-op; returns `true` if a new task was stored.
    pub async fn record(&self, height: u64, txid: &str, reason: &str) -> Result<bool, ScanError> {
        let task = UnscanTask::new(&self.symbol, height, txid, reason);
        let inserted = self.store.insert_unscanned(&task).await?;
        if inserted {
            tracing::warn!(height, txid, reason, "Queued unscanned record");
        } else {
            tracing::debug!(height, txid, "Unscanned record already queued");
        }
        Ok(inserted)
    }

    /// Every pending task.
    pub async fn pending(&self) -> Result<Vec<UnscanTask>, ScanError> {
        self.store.list_unscanned(&self.symbol).await
    }

    /// Pending tasks grouped by block height, lowest height first.
    pub async fn pending_by_height(&self) -> Result<BTreeMap<u64, Vec<UnscanTask>>, ScanError> {
        let mut groups: BTreeMap<u64, Vec<UnscanTask>> = BTreeMap::new();
        for task in self.pending().await? {
            groups.entry(task.block_height).or_default().push(task);
        }
        Ok(groups)
    }

    /// Delete a task after a successful retry.
    pub async fn resolve(&self, task: &UnscanTask) -> Result<(), ScanError> {
        self.store.delete_unscanned(&self.symbol, &task.id).await?;
        tracing::debug!(height = task.block_height, txid = %task.txid, "Resolved unscanned record");
        Ok(())
    }

    /// Drop every task at `height` (the block there is no longer canonical).
    pub async fn clear_height(&self, height: u64) -> Result<u64, ScanError> {
        self.store.delete_unscanned_at(&self.symbol, height).await
    }

    /// Drop every task whose reason starts with `prefix`, e.g. transactions
    /// the node no longer knows about. Returns how many were removed.
    pub async fn purge_by_reason_prefix(&self, prefix: &str) -> Result<u64, ScanError> {
        let mut removed = 0;
        for task in self
            .pending()
            .await?
            .into_iter()
            .filter(|t| t.reason.starts_with(prefix))
        {
            self.store.delete_unscanned(&self.symbol, &task.id).await?;
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(prefix, removed, "Purged unscanned records");
        }
        Ok(removed)
    }
}
