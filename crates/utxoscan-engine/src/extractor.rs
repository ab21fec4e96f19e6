//! Transaction extractor.
//!
//! Turns one transaction into zero or more per-owner `ExtractionRecord`s:
//!
//! 1. fetch the transaction (skipped when the block delivered it inline)
//! 2. resolve inputs that carry no address from the spent output
//! 3. classify inputs and payment outputs against the ownership oracle
//! 4. attach the summary (from/to lists, fee) to every owner's record
//!
//! Extraction is a pure function of the node's answers and the oracle, so
//! running it twice for the same transaction yields the same records.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use utxoscan_core::config::ScannerConfig;
use utxoscan_core::error::ScanError;
use utxoscan_core::node::NodeClient;
use utxoscan_core::oracle::OwnershipOracle;
use utxoscan_core::record::{ExtractionRecord, TxInput, TxOutput, TxStatus, TxSummary};
use utxoscan_core::types::{Transaction, TxRef};

/// Owned inputs and outputs collected for one owner.
#[derive(Default)]
struct OwnerBundle {
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
}

pub struct TransactionExtractor {
    node: Arc<dyn NodeClient>,
    oracle: Arc<dyn OwnershipOracle>,
    config: Arc<ScannerConfig>,
}

impl TransactionExtractor {
    pub fn new(
        node: Arc<dyn NodeClient>,
        oracle: Arc<dyn OwnershipOracle>,
        config: Arc<ScannerConfig>,
    ) -> Self {
        Self {
            node,
            oracle,
            config,
        }
    }

    /// Extract `job` against the configured oracle.
    ///
    /// `height`/`block_hash` are the caller's view of the containing block
    /// (`0`/`""` for mempool transactions).
    pub async fn extract(
        &self,
        height: u64,
        block_hash: &str,
        job: TxRef,
    ) -> Result<Vec<ExtractionRecord>, ScanError> {
        self.extract_with(self.oracle.as_ref(), height, block_hash, job)
            .await
    }

    /// Extract `job` against a caller-supplied oracle.
    pub async fn extract_with(
        &self,
        oracle: &dyn OwnershipOracle,
        height: u64,
        block_hash: &str,
        job: TxRef,
    ) -> Result<Vec<ExtractionRecord>, ScanError> {
        let mut tx = match job {
            TxRef::Id(txid) => self.node.get_raw_transaction(&txid).await?,
            TxRef::Detail(tx) => *tx,
        };
        if height > 0 && tx.block_height == 0 {
            tx.block_height = height;
            tx.block_hash = block_hash.to_string();
        }

        self.resolve_inputs(&mut tx).await?;
        let records = self.classify(oracle, &tx);

        tracing::debug!(
            txid = %tx.txid,
            height = tx.block_height,
            owners = records.len(),
            "Extracted transaction"
        );
        Ok(records)
    }

    /// Backfill address and amount of every non-coinbase input that carries
    /// no address, from the output it spends.
    async fn resolve_inputs(&self, tx: &mut Transaction) -> Result<(), ScanError> {
        for vin in tx.vins.iter_mut() {
            if vin.coinbase || !vin.address.is_empty() {
                continue;
            }
            let prev = self
                .node
                .get_raw_transaction(&vin.source_txid)
                .await
                .map_err(|e| ScanError::Extraction {
                    txid: tx.txid.clone(),
                    reason: format!("input {} lookup of {} failed: {e}", vin.n, vin.source_txid),
                })?;
            let spent = usize::try_from(vin.source_index)
                .ok()
                .and_then(|i| prev.vouts.get(i))
                .ok_or_else(|| ScanError::Extraction {
                    txid: tx.txid.clone(),
                    reason: format!(
                        "input {} spends missing output {}:{}",
                        vin.n, vin.source_txid, vin.source_index
                    ),
                })?;
            vin.address = spent.address.clone();
            vin.amount = spent.amount;
        }
        Ok(())
    }

    fn classify(&self, oracle: &dyn OwnershipOracle, tx: &Transaction) -> Vec<ExtractionRecord> {
        let symbol = &self.config.symbol;
        let mut owners: BTreeMap<String, OwnerBundle> = BTreeMap::new();
        let mut from = Vec::new();
        let mut to = Vec::new();
        let mut total_in = Decimal::ZERO;
        let mut total_out = Decimal::ZERO;

        for vin in tx.vins.iter().filter(|vin| !vin.coinbase) {
            total_in += vin.amount;
            from.push(format!("{}:{}", vin.address, vin.amount));
            if let Some(owner) = oracle.resolve(&vin.address) {
                owners.entry(owner).or_default().inputs.push(TxInput {
                    sid: TxInput::sid_for(symbol, &tx.txid, vin.n),
                    txid: tx.txid.clone(),
                    source_txid: vin.source_txid.clone(),
                    source_index: vin.source_index,
                    index: vin.n,
                    address: vin.address.clone(),
                    amount: vin.amount,
                    symbol: symbol.clone(),
                    block_height: tx.block_height,
                    block_hash: tx.block_hash.clone(),
                });
            }
        }

        for vout in &tx.vouts {
            if self.config.is_data_marker(&vout.script_type) {
                continue;
            }
            total_out += vout.amount;
            to.push(format!("{}:{}", vout.address, vout.amount));
            if let Some(owner) = oracle.resolve(&vout.address) {
                owners.entry(owner).or_default().outputs.push(TxOutput {
                    sid: TxOutput::sid_for(symbol, &tx.txid, vout.n),
                    txid: tx.txid.clone(),
                    index: vout.n,
                    address: vout.address.clone(),
                    amount: vout.amount,
                    symbol: symbol.clone(),
                    script_pubkey: vout.script_pubkey.clone(),
                    block_height: tx.block_height,
                    block_hash: tx.block_hash.clone(),
                    confirmations: tx.confirmations,
                });
            }
        }

        if owners.is_empty() {
            return Vec::new();
        }

        // coinbase outputs are minted, not paid for
        let fees = if tx.is_coinbase() {
            Decimal::ZERO
        } else {
            (total_in - total_out).round_dp(self.config.decimals)
        };
        if let Some(reported) = tx.fees {
            if reported.round_dp(self.config.decimals) != fees {
                tracing::warn!(
                    txid = %tx.txid,
                    derived = %fees,
                    reported = %reported,
                    "Node-reported fee disagrees with inputs minus outputs"
                );
            }
        }
        let status = if tx.block_height == 0 {
            TxStatus::Pending
        } else {
            TxStatus::Success
        };
        let mut summary = TxSummary {
            wx_id: String::new(),
            txid: tx.txid.clone(),
            symbol: symbol.clone(),
            from,
            to,
            fees,
            decimals: self.config.decimals,
            block_hash: tx.block_hash.clone(),
            block_height: tx.block_height,
            confirm_time: tx.block_time,
            status,
        };
        summary.wx_id = summary.compute_wx_id();

        owners
            .into_iter()
            .map(|(owner, bundle)| ExtractionRecord {
                owner,
                inputs: bundle.inputs,
                outputs: bundle.outputs,
                transaction: summary.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{dec, tx, vin_ref, vout, MockNode};
    use utxoscan_core::oracle::AddressBook;
    use utxoscan_core::types::Vin;

    fn extractor(node: Arc<MockNode>, book: AddressBook) -> TransactionExtractor {
        TransactionExtractor::new(node, Arc::new(book), Arc::new(ScannerConfig::default()))
    }

    fn node_with_prev() -> Arc<MockNode> {
        let node = Arc::new(MockNode::new());
        node.add_tx(tx("P0", vec![], vec![vout(0, "X", "1.5"), vout(1, "A", "10.0")]));
        node
    }

    #[tokio::test]
    async fn resolves_input_from_spent_output() {
        let node = node_with_prev();
        node.add_tx(tx("T1", vec![vin_ref("P0", 1)], vec![vout(0, "B", "9.9")]));
        let ex = extractor(node, [("A", "alice")].into_iter().collect());

        let records = ex.extract(100, "H100", "T1".into()).await.unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.owner, "alice");
        assert_eq!(rec.inputs.len(), 1);
        assert_eq!(rec.inputs[0].address, "A");
        assert_eq!(rec.inputs[0].amount, dec("10.0"));
        assert!(rec.outputs.is_empty());
        assert_eq!(rec.transaction.fees, dec("0.1"));
        assert_eq!(rec.transaction.from, vec!["A:10.0"]);
        assert_eq!(rec.transaction.to, vec!["B:9.9"]);
        assert_eq!(rec.transaction.block_height, 100);
        assert_eq!(rec.transaction.block_hash, "H100");
        assert_eq!(rec.transaction.status, TxStatus::Success);
    }

    #[tokio::test]
    async fn one_record_per_owner() {
        let node = node_with_prev();
        node.add_tx(tx(
            "T1",
            vec![vin_ref("P0", 1)],
            vec![vout(0, "B", "4"), vout(1, "C", "5.9")],
        ));
        let ex = extractor(node, [("A", "alice"), ("B", "bob"), ("C", "bob")].into_iter().collect());

        let records = ex.extract(100, "H100", "T1".into()).await.unwrap();
        assert_eq!(records.len(), 2);
        let bob = records.iter().find(|r| r.owner == "bob").unwrap();
        assert_eq!(bob.outputs.len(), 2);
        assert!(bob.inputs.is_empty());
        assert_eq!(bob.net_amount(), dec("9.9"));
        // every record carries the same summary
        assert_eq!(records[0].transaction, records[1].transaction);
    }

    #[tokio::test]
    async fn untracked_transaction_yields_nothing() {
        let node = node_with_prev();
        node.add_tx(tx("T1", vec![vin_ref("P0", 0)], vec![vout(0, "B", "1.4")]));
        let ex = extractor(node, AddressBook::new());
        assert!(ex.extract(100, "H100", "T1".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_spent_output_fails_extraction() {
        let node = node_with_prev();
        node.add_tx(tx("T1", vec![vin_ref("P0", 7)], vec![vout(0, "B", "1")]));
        let ex = extractor(node, [("B", "bob")].into_iter().collect());

        let err = ex.extract(100, "H100", "T1".into()).await.unwrap_err();
        assert!(matches!(err, ScanError::Extraction { ref txid, .. } if txid == "T1"));
    }

    #[tokio::test]
    async fn failed_previous_lookup_fails_extraction() {
        let node = Arc::new(MockNode::new());
        node.add_tx(tx("T1", vec![vin_ref("GONE", 0)], vec![vout(0, "B", "1")]));
        let ex = extractor(node, [("B", "bob")].into_iter().collect());
        assert!(ex.extract(100, "H100", "T1".into()).await.is_err());
    }

    #[tokio::test]
    async fn data_outputs_are_skipped() {
        let node = node_with_prev();
        let mut marker = vout(1, "", "0");
        marker.script_type = "nulldata".into();
        node.add_tx(tx("T1", vec![vin_ref("P0", 1)], vec![vout(0, "A", "9.5"), marker]));
        let ex = extractor(node, [("A", "alice")].into_iter().collect());

        let records = ex.extract(100, "H100", "T1".into()).await.unwrap();
        assert_eq!(records[0].transaction.to, vec!["A:9.5"]);
        assert_eq!(records[0].transaction.fees, dec("0.5"));
    }

    #[tokio::test]
    async fn coinbase_needs_no_lookup() {
        let node = Arc::new(MockNode::new());
        let coinbase = Vin {
            coinbase: true,
            ..Default::default()
        };
        node.add_tx(tx("CB", vec![coinbase], vec![vout(0, "M", "50")]));
        let ex = extractor(node.clone(), [("M", "miner")].into_iter().collect());

        let records = ex.extract(5, "H5", "CB".into()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].transaction.from.is_empty());
        assert_eq!(records[0].transaction.fees, Decimal::ZERO);
        assert_eq!(node.tx_calls("CB"), 1);
    }

    #[tokio::test]
    async fn derived_fee_wins_over_reported_fee() {
        let node = node_with_prev();
        let mut t1 = tx("T1", vec![vin_ref("P0", 1)], vec![vout(0, "B", "9.9")]);
        t1.fees = Some(dec("0.3"));
        node.add_tx(t1);
        let ex = extractor(node, [("A", "alice")].into_iter().collect());

        let records = ex.extract(100, "H100", "T1".into()).await.unwrap();
        assert_eq!(records[0].transaction.fees, dec("0.1"));
    }

    #[tokio::test]
    async fn mempool_transactions_are_pending() {
        let node = node_with_prev();
        node.add_tx(tx("T1", vec![vin_ref("P0", 1)], vec![vout(0, "B", "9.9")]));
        let ex = extractor(node, [("A", "alice")].into_iter().collect());

        let records = ex.extract(0, "", "T1".into()).await.unwrap();
        assert_eq!(records[0].transaction.status, TxStatus::Pending);
        assert_eq!(records[0].transaction.block_height, 0);
    }

    #[tokio::test]
    async fn inline_details_skip_the_fetch() {
        let node = node_with_prev();
        let inline = tx("T9", vec![vin_ref("P0", 1)], vec![vout(0, "B", "9.9")]);
        let ex = extractor(node.clone(), [("A", "alice")].into_iter().collect());

        let records = ex
            .extract(100, "H100", TxRef::Detail(Box::new(inline)))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(node.tx_calls("T9"), 0);
    }

    #[tokio::test]
    async fn extraction_is_idempotent() {
        let node = node_with_prev();
        node.add_tx(tx("T1", vec![vin_ref("P0", 1)], vec![vout(0, "A", "2"), vout(1, "B", "7.9")]));
        let ex = extractor(node, [("A", "alice")].into_iter().collect());

        let first = ex.extract(100, "H100", "T1".into()).await.unwrap();
        let second = ex.extract(100, "H100", "T1".into()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].transaction.wx_id, first[0].transaction.compute_wx_id());
    }

    #[tokio::test]
    async fn caller_supplied_oracle_overrides_default() {
        let node = node_with_prev();
        node.add_tx(tx("T1", vec![vin_ref("P0", 1)], vec![vout(0, "B", "9.9")]));
        let ex = extractor(node, AddressBook::new());
        let oracle = |addr: &str| (addr == "B").then(|| "bob".to_string());

        let records = ex.extract_with(&oracle, 0, "", "T1".into()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].owner, "bob");
    }
}
