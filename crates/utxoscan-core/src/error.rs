//! Error types for the scanning pipeline.

use thiserror::Error;

/// Errors that can occur while scanning and extracting.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC call '{method}' timed out after {ms}ms")]
    Timeout { method: String, ms: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Observer error in '{observer}': {reason}")]
    Observer { observer: String, reason: String },

    #[error("Extraction of {txid} failed: {reason}")]
    Extraction { txid: String, reason: String },

    #[error("Invalid block height {0}")]
    InvalidHeight(u64),

    #[error("{0}")]
    Other(String),
}

impl ScanError {
    /// Returns `true` if the error comes from the remote node and a later
    /// attempt may succeed (unreachable node, timeout, height not yet produced).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_) | Self::Timeout { .. } | Self::NotFound(_)
        )
    }

    /// Returns `true` if the local store failed.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
