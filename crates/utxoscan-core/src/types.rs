//! Chain data model shared by the scanner, the node adapter and the stores.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// Header delivered to observers for every new (or forked) block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
    pub previous_hash: String,
    pub merkle_root: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub time: u64,
    /// Chain symbol (e.g. `"VAS"`).
    pub symbol: String,
    /// Set only on reorg notifications: this block is no longer canonical.
    pub fork: bool,
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block as returned by the node.
///
/// Non-verbose nodes return only `tx_ids`; verbose nodes also return the full
/// transactions in `tx_details`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub previous_hash: String,
    pub merkle_root: String,
    pub time: u64,
    pub confirmations: u64,
    pub version: u64,
    pub tx_ids: Vec<String>,
    #[serde(default)]
    pub tx_details: Vec<Transaction>,
}

impl Block {
    /// Returns `true` if `hash` is this block's parent.
    pub fn extends(&self, hash: &str) -> bool {
        self.previous_hash == hash
    }

    /// Returns `true` if the node returned inline transaction details.
    pub fn is_verbose(&self) -> bool {
        !self.tx_details.is_empty()
    }

    /// Number of transactions in the block.
    pub fn tx_count(&self) -> usize {
        if self.is_verbose() {
            self.tx_details.len()
        } else {
            self.tx_ids.len()
        }
    }

    /// Header for a new-block notification.
    pub fn header(&self, symbol: &str) -> BlockHeader {
        BlockHeader {
            height: self.height,
            hash: self.hash.clone(),
            previous_hash: self.previous_hash.clone(),
            merkle_root: self.merkle_root.clone(),
            time: self.time,
            symbol: symbol.to_string(),
            fork: false,
        }
    }

    /// Header for a fork notification.
    pub fn fork_header(&self, symbol: &str) -> BlockHeader {
        BlockHeader {
            fork: true,
            ..self.header(symbol)
        }
    }

    /// The block's transactions as extraction jobs.
    ///
    /// Inline details are used when present, with their block position
    /// backfilled from this block.
    pub fn tx_refs(&self) -> Vec<TxRef> {
        if !self.is_verbose() {
            return self.tx_ids.iter().cloned().map(TxRef::Id).collect();
        }
        self.tx_details
            .iter()
            .cloned()
            .map(|mut tx| {
                if tx.block_height == 0 {
                    tx.block_height = self.height;
                    tx.block_hash = self.hash.clone();
                }
                if tx.block_time == 0 {
                    tx.block_time = self.time as i64;
                }
                TxRef::Detail(Box::new(tx))
            })
            .collect()
    }
}

// ─── TxRef ────────────────────────────────────────────────────────────────────

/// One unit of work for the extraction pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TxRef {
    /// Only the id is known; the extractor fetches the transaction.
    Id(String),
    /// The transaction was delivered inline with its block.
    Detail(Box<Transaction>),
}

impl TxRef {
    pub fn txid(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Detail(tx) => &tx.txid,
        }
    }
}

impl From<String> for TxRef {
    fn from(txid: String) -> Self {
        Self::Id(txid)
    }
}

impl From<&str> for TxRef {
    fn from(txid: &str) -> Self {
        Self::Id(txid.to_string())
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// A decoded transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    pub block_hash: String,
    /// `0` for unconfirmed transactions.
    pub block_height: u64,
    pub confirmations: u64,
    pub block_time: i64,
    pub vins: Vec<Vin>,
    pub vouts: Vec<Vout>,
    /// Fee as reported by the node, if it reports one. Only used to
    /// cross-check the fee derived from inputs and outputs.
    #[serde(default)]
    pub fees: Option<Decimal>,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.vins.iter().any(|vin| vin.coinbase)
    }
}

/// A transaction input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vin {
    /// Id of the transaction whose output this input spends.
    pub source_txid: String,
    /// Index of the spent output in the source transaction.
    pub source_index: u64,
    /// Position of this input in the spending transaction.
    pub n: u64,
    /// May be empty; backfilled from the spent output during extraction.
    pub address: String,
    pub amount: Decimal,
    pub coinbase: bool,
}

/// A transaction output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vout {
    pub n: u64,
    /// Empty for non-payment scripts.
    pub address: String,
    pub amount: Decimal,
    /// Locking script, hex encoded.
    pub script_pubkey: String,
    /// Script type as reported by the node (`"pubkeyhash"`, `"nulldata"`, ...).
    pub script_type: String,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
