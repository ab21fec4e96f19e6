//! Scripted chain fixture for scan scenarios.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use utxoscan_core::{
    Block, BlockHeader, ExtractionRecord, NodeClient, ScanError, ScanObserver, Transaction, Vin,
    Vout,
};
use utxoscan_engine::{Scanner, ScannerBuilder};
use utxoscan_storage::InMemoryStorage;

pub fn amount(s: &str) -> Decimal {
    s.parse().unwrap()
}

#[derive(Default)]
struct Chain {
    head: u64,
    blocks: HashMap<u64, Block>,
    txs: HashMap<String, Transaction>,
    unavailable: HashSet<String>,
    fetches: HashMap<String, u32>,
}

/// A node whose chain is edited by the test.
#[derive(Default)]
pub struct ScriptedNode {
    chain: Mutex<Chain>,
}

impl ScriptedNode {
    pub fn set_head(&self, head: u64) {
        self.chain.lock().unwrap().head = head;
    }

    pub fn put_block(&self, height: u64, hash: &str, prev: &str, txids: &[&str]) {
        let block = Block {
            height,
            hash: hash.into(),
            previous_hash: prev.into(),
            time: 1_573_722_270 + height,
            tx_ids: txids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        self.chain.lock().unwrap().blocks.insert(height, block);
    }

    /// Canonical blocks `from..=to` hashed `{prefix}{height}`, parent of
    /// `from` is `parent`.
    pub fn extend(&self, from: u64, to: u64, prefix: &str, parent: &str) {
        for h in from..=to {
            let prev = if h == from {
                parent.to_string()
            } else {
                format!("{prefix}{}", h - 1)
            };
            self.put_block(h, &format!("{prefix}{h}"), &prev, &[]);
        }
    }

    pub fn put_tx(&self, txid: &str, vins: Vec<Vin>, vouts: Vec<(&str, &str)>) {
        let tx = Transaction {
            txid: txid.into(),
            vins,
            vouts: vouts
                .into_iter()
                .enumerate()
                .map(|(n, (address, value))| Vout {
                    n: n as u64,
                    address: address.into(),
                    amount: amount(value),
                    script_pubkey: String::new(),
                    script_type: "pubkeyhash".into(),
                })
                .collect(),
            ..Default::default()
        };
        self.chain.lock().unwrap().txs.insert(txid.into(), tx);
    }

    pub fn set_unavailable(&self, txid: &str, unavailable: bool) {
        let mut chain = self.chain.lock().unwrap();
        if unavailable {
            chain.unavailable.insert(txid.into());
        } else {
            chain.unavailable.remove(txid);
        }
    }

    pub fn fetches(&self, txid: &str) -> u32 {
        self.chain.lock().unwrap().fetches.get(txid).copied().unwrap_or(0)
    }
}

pub fn spend(source_txid: &str, index: u64) -> Vin {
    Vin {
        source_txid: source_txid.into(),
        source_index: index,
        ..Default::default()
    }
}

#[async_trait]
impl NodeClient for ScriptedNode {
    async fn get_block_count(&self) -> Result<u64, ScanError> {
        Ok(self.chain.lock().unwrap().head)
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, ScanError> {
        self.chain
            .lock()
            .unwrap()
            .blocks
            .get(&height)
            .map(|b| b.hash.clone())
            .ok_or_else(|| ScanError::NotFound(format!("block {height}")))
    }

    async fn get_block(&self, hash: &str) -> Result<Block, ScanError> {
        self.chain
            .lock()
            .unwrap()
            .blocks
            .values()
            .find(|b| b.hash == hash)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(format!("block {hash}")))
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Transaction, ScanError> {
        let mut chain = self.chain.lock().unwrap();
        *chain.fetches.entry(txid.into()).or_default() += 1;
        if chain.unavailable.contains(txid) {
            return Err(ScanError::Rpc(format!("transaction {txid} unavailable")));
        }
        chain
            .txs
            .get(txid)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(format!("transaction {txid}")))
    }

    async fn get_tx_out(&self, txid: &str, vout: u64) -> Result<Vout, ScanError> {
        let tx = self.get_raw_transaction(txid).await?;
        tx.vouts
            .into_iter()
            .find(|o| o.n == vout)
            .ok_or_else(|| ScanError::NotFound(format!("{txid}:{vout}")))
    }

    async fn get_raw_mempool_ids(&self) -> Result<Vec<String>, ScanError> {
        Ok(Vec::new())
    }

    async fn send_raw_transaction(&self, _hex: &str) -> Result<String, ScanError> {
        Err(ScanError::Rpc("read-only node".into()))
    }
}

/// Collects every notification.
#[derive(Default)]
pub struct Inbox {
    pub records: Mutex<Vec<ExtractionRecord>>,
    pub blocks: Mutex<Vec<BlockHeader>>,
}

impl Inbox {
    pub fn records(&self) -> Vec<ExtractionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn blocks(&self) -> Vec<BlockHeader> {
        self.blocks.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScanObserver for Inbox {
    fn name(&self) -> &str {
        "inbox"
    }

    async fn on_extraction(&self, _owner: &str, record: &ExtractionRecord) -> Result<(), ScanError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn on_new_block(&self, header: &BlockHeader) {
        self.blocks.lock().unwrap().push(header.clone());
    }
}

pub struct World {
    pub node: Arc<ScriptedNode>,
    pub store: Arc<InMemoryStorage>,
    pub inbox: Arc<Inbox>,
    pub scanner: Scanner,
}

/// A scanner tracking `owned` (`address → owner`) over a scripted node.
pub fn world(owned: &[(&str, &str)]) -> World {
    let node = Arc::new(ScriptedNode::default());
    let store = Arc::new(InMemoryStorage::new());
    let inbox = Arc::new(Inbox::default());
    let book: utxoscan_core::AddressBook = owned.iter().copied().collect();
    let scanner = ScannerBuilder::new()
        .symbol("VAS")
        .node(node.clone())
        .store(store.clone())
        .oracle(Arc::new(book))
        .observer(inbox.clone())
        .build()
        .unwrap();
    World {
        node,
        store,
        inbox,
        scanner,
    }
}
