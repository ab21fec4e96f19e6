//! Per-call timeouts around a `NodeClient`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use utxoscan_core::error::ScanError;
use utxoscan_core::node::NodeClient;
use utxoscan_core::types::{Block, Transaction, Vout};

/// Wraps a node client so that no call can hold an extraction slot forever.
///
/// An elapsed call fails with `ScanError::Timeout`, which is transient.
pub struct TimedNode {
    inner: Arc<dyn NodeClient>,
    timeout: Duration,
}

impl TimedNode {
    pub fn new(inner: Arc<dyn NodeClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn call<T, F>(&self, method: &str, fut: F) -> Result<T, ScanError>
    where
        F: Future<Output = Result<T, ScanError>> + Send,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| {
                tracing::warn!(method, ms = self.timeout.as_millis() as u64, "Node call timed out");
                ScanError::Timeout {
                    method: method.to_string(),
                    ms: self.timeout.as_millis() as u64,
                }
            })?
    }
}

#[async_trait]
impl NodeClient for TimedNode {
    async fn get_block_count(&self) -> Result<u64, ScanError> {
        self.call("getblockcount", self.inner.get_block_count()).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, ScanError> {
        self.call("getblockhash", self.inner.get_block_hash(height))
            .await
    }

    async fn get_block(&self, hash: &str) -> Result<Block, ScanError> {
        self.call("getblock", self.inner.get_block(hash)).await
    }

    async fn get_block_by_height(&self, height: u64) -> Result<Block, ScanError> {
        self.call("getblock", self.inner.get_block_by_height(height))
            .await
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Transaction, ScanError> {
        self.call("getrawtransaction", self.inner.get_raw_transaction(txid))
            .await
    }

    async fn get_tx_out(&self, txid: &str, vout: u64) -> Result<Vout, ScanError> {
        self.call("gettxout", self.inner.get_tx_out(txid, vout))
            .await
    }

    async fn get_raw_mempool_ids(&self) -> Result<Vec<String>, ScanError> {
        self.call("getrawmempool", self.inner.get_raw_mempool_ids())
            .await
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<String, ScanError> {
        self.call("sendrawtransaction", self.inner.send_raw_transaction(hex))
            .await
    }
}
