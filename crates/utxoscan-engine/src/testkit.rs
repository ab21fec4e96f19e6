//! Scripted node and observers shared by the engine's unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use utxoscan_core::error::ScanError;
use utxoscan_core::node::NodeClient;
use utxoscan_core::observer::ScanObserver;
use utxoscan_core::record::ExtractionRecord;
use utxoscan_core::types::{Block, BlockHeader, Transaction, Vin, Vout};

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn tx(txid: &str, vins: Vec<Vin>, vouts: Vec<Vout>) -> Transaction {
    Transaction {
        txid: txid.into(),
        vins,
        vouts,
        ..Default::default()
    }
}

/// An input that carries no address and must be resolved.
pub fn vin_ref(source_txid: &str, source_index: u64) -> Vin {
    Vin {
        source_txid: source_txid.into(),
        source_index,
        ..Default::default()
    }
}

pub fn vout(n: u64, address: &str, amount: &str) -> Vout {
    Vout {
        n,
        address: address.into(),
        amount: dec(amount),
        script_pubkey: format!("76a914{address}88ac"),
        script_type: "pubkeyhash".into(),
    }
}

pub fn block(height: u64, hash: &str, prev: &str, txids: &[&str]) -> Block {
    Block {
        height,
        hash: hash.into(),
        previous_hash: prev.into(),
        time: 1_573_722_270 + height,
        tx_ids: txids.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

// ─── MockNode ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct NodeState {
    head: u64,
    blocks: BTreeMap<u64, Block>,
    by_hash: HashMap<String, Block>,
    txs: HashMap<String, Transaction>,
    mempool: Vec<String>,
    failing_txs: HashSet<String>,
    panicking_txs: HashSet<String>,
    failing_blocks: HashSet<u64>,
    stall: Option<Duration>,
    tx_delay: Option<Duration>,
    tx_calls: HashMap<String, u32>,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory node whose chain and faults are scripted by the test.
#[derive(Default)]
pub struct MockNode {
    state: Mutex<NodeState>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Make `block` canonical at its height, replacing whatever was there.
    pub fn add_block(&self, block: Block) {
        let mut s = self.state.lock().unwrap();
        for detail in &block.tx_details {
            s.txs.insert(detail.txid.clone(), detail.clone());
        }
        s.by_hash.insert(block.hash.clone(), block.clone());
        s.blocks.insert(block.height, block);
    }

    pub fn add_tx(&self, tx: Transaction) {
        self.state.lock().unwrap().txs.insert(tx.txid.clone(), tx);
    }

    pub fn set_mempool(&self, txids: &[&str]) {
        self.state.lock().unwrap().mempool = txids.iter().map(|s| s.to_string()).collect();
    }

    pub fn fail_tx(&self, txid: &str) {
        self.state.lock().unwrap().failing_txs.insert(txid.into());
    }

    pub fn heal_tx(&self, txid: &str) {
        self.state.lock().unwrap().failing_txs.remove(txid);
    }

    pub fn panic_on_tx(&self, txid: &str) {
        self.state.lock().unwrap().panicking_txs.insert(txid.into());
    }

    pub fn fail_block(&self, height: u64) {
        self.state.lock().unwrap().failing_blocks.insert(height);
    }

    pub fn heal_block(&self, height: u64) {
        self.state.lock().unwrap().failing_blocks.remove(&height);
    }

    /// Delay every call by `d`.
    pub fn stall_for(&self, d: Duration) {
        self.state.lock().unwrap().stall = Some(d);
    }

    /// Delay `get_raw_transaction` by `d`.
    pub fn tx_delay(&self, d: Duration) {
        self.state.lock().unwrap().tx_delay = Some(d);
    }

    pub fn tx_calls(&self, txid: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .tx_calls
            .get(txid)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    async fn stall(&self) {
        let stall = self.state.lock().unwrap().stall;
        if let Some(d) = stall {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn get_block_count(&self) -> Result<u64, ScanError> {
        self.stall().await;
        Ok(self.state.lock().unwrap().head)
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, ScanError> {
        self.stall().await;
        let s = self.state.lock().unwrap();
        s.blocks
            .get(&height)
            .map(|b| b.hash.clone())
            .ok_or_else(|| ScanError::NotFound(format!("block {height}")))
    }

    async fn get_block(&self, hash: &str) -> Result<Block, ScanError> {
        self.stall().await;
        let s = self.state.lock().unwrap();
        match s.by_hash.get(hash) {
            Some(b) if s.failing_blocks.contains(&b.height) => {
                Err(ScanError::Rpc(format!("block {} unavailable", b.height)))
            }
            Some(b) => Ok(b.clone()),
            None => Err(ScanError::NotFound(format!("block {hash}"))),
        }
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Transaction, ScanError> {
        self.stall().await;
        let delay = {
            let mut s = self.state.lock().unwrap();
            *s.tx_calls.entry(txid.to_string()).or_default() += 1;
            if s.panicking_txs.contains(txid) {
                drop(s);
                panic!("injected panic for {txid}");
            }
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            s.tx_delay
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let mut s = self.state.lock().unwrap();
        s.in_flight -= 1;
        if s.failing_txs.contains(txid) {
            return Err(ScanError::Rpc(format!(
                "[-5]No information available about transaction {txid}"
            )));
        }
        s.txs
            .get(txid)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(format!("transaction {txid}")))
    }

    async fn get_tx_out(&self, txid: &str, vout: u64) -> Result<Vout, ScanError> {
        let tx = self.get_raw_transaction(txid).await?;
        tx.vouts
            .into_iter()
            .find(|o| o.n == vout)
            .ok_or_else(|| ScanError::NotFound(format!("output {txid}:{vout}")))
    }

    async fn get_raw_mempool_ids(&self) -> Result<Vec<String>, ScanError> {
        self.stall().await;
        Ok(self.state.lock().unwrap().mempool.clone())
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<String, ScanError> {
        Err(ScanError::Rpc(format!("broadcast disabled ({} bytes)", hex.len() / 2)))
    }
}

// ─── Observers ────────────────────────────────────────────────────────────────

/// Keeps every notification it receives.
#[derive(Default)]
pub struct RecordingObserver {
    records: Mutex<Vec<(String, ExtractionRecord)>>,
    blocks: Mutex<Vec<BlockHeader>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, ExtractionRecord)> {
        self.records.lock().unwrap().clone()
    }

    pub fn txids(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .map(|(_, r)| r.transaction.txid)
            .collect()
    }

    pub fn blocks(&self) -> Vec<BlockHeader> {
        self.blocks.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScanObserver for RecordingObserver {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_extraction(&self, owner: &str, record: &ExtractionRecord) -> Result<(), ScanError> {
        self.records
            .lock()
            .unwrap()
            .push((owner.to_string(), record.clone()));
        Ok(())
    }

    async fn on_new_block(&self, header: &BlockHeader) {
        self.blocks.lock().unwrap().push(header.clone());
    }
}

/// Refuses every extraction record until healed.
pub struct FailingObserver {
    failing: Mutex<bool>,
}

impl FailingObserver {
    pub fn new() -> Self {
        Self {
            failing: Mutex::new(true),
        }
    }

    pub fn heal(&self) {
        *self.failing.lock().unwrap() = false;
    }
}

#[async_trait]
impl ScanObserver for FailingObserver {
    fn name(&self) -> &str {
        "failing"
    }

    async fn on_extraction(&self, _owner: &str, _record: &ExtractionRecord) -> Result<(), ScanError> {
        if *self.failing.lock().unwrap() {
            return Err(ScanError::Other("sink unavailable".into()));
        }
        Ok(())
    }

    async fn on_new_block(&self, _header: &BlockHeader) {}
}
