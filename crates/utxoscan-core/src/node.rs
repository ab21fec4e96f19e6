//! The remote-node capability consumed by the scanner.
//!
//! Only the logical method surface is fixed here; the transport (JSON-RPC over
//! HTTP, REST, a test double) is up to the implementor.

use async_trait::async_trait;

use crate::error::ScanError;
use crate::types::{Block, Transaction, Vout};

/// Read access to a UTXO chain node, plus transaction broadcast.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; the extraction pipeline calls
/// `get_raw_transaction` from several tasks at once.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Current chain height.
    async fn get_block_count(&self) -> Result<u64, ScanError>;

    /// Hash of the canonical block at `height`.
    async fn get_block_hash(&self, height: u64) -> Result<String, ScanError>;

    /// Block by hash.
    async fn get_block(&self, hash: &str) -> Result<Block, ScanError>;

    /// Block by height. The default resolves the hash first.
    async fn get_block_by_height(&self, height: u64) -> Result<Block, ScanError> {
        let hash = self.get_block_hash(height).await?;
        self.get_block(&hash).await
    }

    /// Decoded transaction by id.
    async fn get_raw_transaction(&self, txid: &str) -> Result<Transaction, ScanError>;

    /// A single output of a transaction.
    async fn get_tx_out(&self, txid: &str, vout: u64) -> Result<Vout, ScanError>;

    /// Ids of the transactions waiting in the mempool.
    async fn get_raw_mempool_ids(&self) -> Result<Vec<String>, ScanError>;

    /// Broadcast a signed transaction; returns its id.
    async fn send_raw_transaction(&self, hex: &str) -> Result<String, ScanError>;
}
