//! Per-owner output of the transaction extractor.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `parts` joined with `_`.
///
/// Used for every deterministic identity in the crate (unscan task ids,
/// input/output sids, transaction wx-ids).
pub fn stable_id(parts: &[&str]) -> String {
    hex::encode(Sha256::digest(parts.join("_").as_bytes()))
}

/// Confirmation status of an extracted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Included in a block.
    Success,
    /// Seen in the mempool only.
    Pending,
}

/// An input spending from an owned address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub sid: String,
    /// The spending transaction.
    pub txid: String,
    pub source_txid: String,
    pub source_index: u64,
    /// Position of the input in the spending transaction.
    pub index: u64,
    pub address: String,
    pub amount: Decimal,
    pub symbol: String,
    pub block_height: u64,
    pub block_hash: String,
}

impl TxInput {
    pub fn sid_for(symbol: &str, txid: &str, index: u64) -> String {
        stable_id(&["input", symbol, txid, &index.to_string()])
    }
}

/// An output paying an owned address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub sid: String,
    pub txid: String,
    pub index: u64,
    pub address: String,
    pub amount: Decimal,
    pub symbol: String,
    pub script_pubkey: String,
    pub block_height: u64,
    pub block_hash: String,
    pub confirmations: u64,
}

impl TxOutput {
    pub fn sid_for(symbol: &str, txid: &str, index: u64) -> String {
        stable_id(&["output", symbol, txid, &index.to_string()])
    }
}

/// Owner-independent summary of a transaction.
///
/// `from`/`to` hold `address:amount` strings for every input and every
/// non-data output, owned or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSummary {
    pub wx_id: String,
    pub txid: String,
    pub symbol: String,
    pub from: Vec<String>,
    pub to: Vec<String>,
    /// Σ inputs − Σ outputs, rounded to `decimals`. Always zero for a
    /// coinbase transaction, whose outputs are minted rather than funded by
    /// inputs.
    pub fees: Decimal,
    pub decimals: u32,
    pub block_hash: String,
    pub block_height: u64,
    pub confirm_time: i64,
    pub status: TxStatus,
}

impl TxSummary {
    /// Deterministic identity derived from the summary's own fields.
    pub fn compute_wx_id(&self) -> String {
        let fees = self.fees.to_string();
        let height = self.block_height.to_string();
        let from = self.from.join(",");
        let to = self.to.join(",");
        stable_id(&[
            &self.symbol,
            &self.txid,
            &self.block_hash,
            &height,
            &fees,
            &from,
            &to,
        ])
    }
}

/// Everything one transaction means for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    /// Owner key reported by the ownership oracle.
    pub owner: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub transaction: TxSummary,
}

impl ExtractionRecord {
    pub fn txid(&self) -> &str {
        &self.transaction.txid
    }

    /// Σ owned outputs − Σ owned inputs.
    pub fn net_amount(&self) -> Decimal {
        let received: Decimal = self.outputs.iter().map(|o| o.amount).sum();
        let spent: Decimal = self.inputs.iter().map(|i| i.amount).sum();
        received - spent
    }
}
