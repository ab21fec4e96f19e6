//! Scan cursor: the last block known to be fully processed. The store
//! persists it alongside per-height block snapshots.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::types::Block;

/// The scanner's position in the chain.
///
/// At the moment it was recorded, the block identified by the cursor was
/// believed to be on the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Height of the last fully processed block.
    pub height: u64,
    /// Hash of the last fully processed block.
    pub hash: String,
}

impl Cursor {
    pub fn new(height: u64, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// Move the cursor to a newly processed block.
    pub fn advance(&mut self, height: u64, hash: impl Into<String>) {
        self.height = height;
        self.hash = hash.into();
    }

    /// The next height to scan (cursor + 1).
    pub fn next_height(&self) -> u64 {
        self.height + 1
    }

    /// Returns `true` once the cursor sits right below `head`, i.e. every
    /// block the scanner processes (up to `head - 1`) has been processed.
    pub fn is_caught_up(&self, head: u64) -> bool {
        self.height >= head.saturating_sub(1)
    }
}

/// Persistence for the cursor and the block cache, keyed by chain symbol.
///
/// Implementations: `InMemoryStorage` and `SqliteStorage` in `utxoscan-storage`.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the cursor for `symbol` (`None` if the chain was never scanned).
    async fn get_cursor(&self, symbol: &str) -> Result<Option<Cursor>, ScanError>;

    /// Save (upsert) the cursor for `symbol`.
    async fn set_cursor(&self, symbol: &str, height: u64, hash: &str) -> Result<(), ScanError>;

    /// Load the snapshot of the block previously processed at `height`.
    async fn get_cached_block(&self, symbol: &str, height: u64)
        -> Result<Option<Block>, ScanError>;

    /// Save (upsert) a block snapshot, keyed by its height.
    async fn put_cached_block(&self, symbol: &str, block: &Block) -> Result<(), ScanError>;

    /// Delete snapshots below `height`. Returns how many were removed.
    async fn prune_cached_blocks(&self, symbol: &str, height: u64) -> Result<u64, ScanError>;
}
