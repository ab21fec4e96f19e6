//! The scan loop. Advances the cursor block by block and repairs forks;
//! once caught up it retries unscanned records.
//!
//! # One pass
//! ```text
//! Idle ─► Advancing ─┬─ cursor == head-1 ──────────────► RetryingFailed ─► Idle
//!                    ├─ parent mismatch ─► Rewinding ─► Advancing
//!                    ├─ node unreachable ─────────────► RetryingFailed
//!                    └─ stop flag ────────────────────► Stopped
//! ```
//!
//! Each advanced block runs through the extraction pipeline, then the cursor
//! and block snapshot are saved, then observers hear about the block. Failed
//! extractions never hold the cursor back; they wait in the unscanned-record
//! queue for the retry phase.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use utxoscan_core::config::{ScannerConfig, ScannerState};
use utxoscan_core::cursor::{Cursor, CursorStore};
use utxoscan_core::error::ScanError;
use utxoscan_core::fork::{ForkDetector, ForkEvent};
use utxoscan_core::node::NodeClient;
use utxoscan_core::observer::ObserverRegistry;
use utxoscan_core::oracle::OwnershipOracle;
use utxoscan_core::record::ExtractionRecord;
use utxoscan_core::types::{Block, BlockHeader, TxRef};
use utxoscan_core::unscan::UnscanTask;

use crate::extractor::TransactionExtractor;
use crate::pipeline::{BatchOutcome, ExtractionPipeline};
use crate::stop::StopHandle;
use crate::tracker::UnscanTracker;

/// What one scan pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Blocks advanced past (cursor moves).
    pub blocks_scanned: u64,
    /// Forks detected and rewound.
    pub forks: u64,
    /// Unscanned records resolved by the retry phase.
    pub resolved: u64,
    /// The stop flag ended the pass before the retry phase.
    pub stopped: bool,
}

/// The scanner. Build one with [`crate::ScannerBuilder`].
pub struct Scanner {
    pub(crate) config: Arc<ScannerConfig>,
    pub(crate) node: Arc<dyn NodeClient>,
    pub(crate) cursors: Arc<dyn CursorStore>,
    pub(crate) tracker: UnscanTracker,
    pub(crate) extractor: Arc<TransactionExtractor>,
    pub(crate) pipeline: ExtractionPipeline,
    pub(crate) observers: ObserverRegistry,
    pub(crate) forks: ForkDetector,
    pub(crate) stop: StopHandle,
    pub(crate) state: Mutex<ScannerState>,
    /// Serializes everything that moves the cursor.
    pub(crate) pass: tokio::sync::Mutex<()>,
}

impl Scanner {
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn state(&self) -> ScannerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ScannerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Handle that stops [`Scanner::run`] and in-progress passes at the next
    /// block boundary.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn tracker(&self) -> &UnscanTracker {
        &self.tracker
    }

    fn symbol(&self) -> &str {
        &self.config.symbol
    }

    // ─── Scan loop ────────────────────────────────────────────────────────────

    /// Run one pass: advance to `head - 1`, then retry unscanned records.
    pub async fn scan_pass(&self) -> Result<ScanReport, ScanError> {
        let _pass = self.pass.lock().await;
        let mut report = ScanReport::default();

        self.set_state(ScannerState::Advancing);
        if let Err(e) = self.advance_to_head(&mut report).await {
            self.set_state(ScannerState::Idle);
            return Err(e);
        }
        if report.stopped {
            self.set_state(ScannerState::Stopped);
            return Ok(report);
        }

        self.set_state(ScannerState::RetryingFailed);
        let retried = self.retry_failed().await;
        self.set_state(ScannerState::Idle);
        report.resolved = retried?;
        Ok(report)
    }

    async fn advance_to_head(&self, report: &mut ScanReport) -> Result<(), ScanError> {
        let mut cursor = match self.load_or_bootstrap_cursor().await {
            Ok(cursor) => cursor,
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "Cannot determine scan start; skipping to retry phase");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        loop {
            if self.stop.is_stopped() {
                tracing::info!(height = cursor.height, "Stop requested; scan loop exiting");
                report.stopped = true;
                return Ok(());
            }

            let head = match self.node.get_block_count().await {
                Ok(head) => head,
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "Cannot fetch chain height");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if cursor.is_caught_up(head) {
                tracing::debug!(height = cursor.height, head, "Caught up");
                return Ok(());
            }

            let next = cursor.next_height();
            let block = match self.node.get_block_by_height(next).await {
                Ok(block) => block,
                Err(e) if e.is_transient() => {
                    tracing::warn!(height = next, error = %e, "Cannot fetch block");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if let Some(event) = self.forks.check(&cursor, &block) {
                self.set_state(ScannerState::Rewinding);
                match self.rewind(event).await {
                    Ok(rewound) => cursor = rewound,
                    Err(e) if e.is_transient() => {
                        tracing::warn!(error = %e, "Rewind interrupted");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
                report.forks += 1;
                self.set_state(ScannerState::Advancing);
                continue;
            }

            self.advance(&block).await?;
            cursor.advance(block.height, block.hash.as_str());
            report.blocks_scanned += 1;
        }
    }

    /// The stored cursor, or one right below `head - 1` on first run.
    async fn load_or_bootstrap_cursor(&self) -> Result<Cursor, ScanError> {
        if let Some(cursor) = self.cursors.get_cursor(self.symbol()).await? {
            return Ok(cursor);
        }
        let head = self.node.get_block_count().await?;
        let start = self.node.get_block_by_height(head.saturating_sub(1)).await?;
        let cursor = Cursor::new(start.height.saturating_sub(1), start.previous_hash);
        tracing::info!(
            head,
            height = cursor.height,
            hash = %cursor.hash,
            "No cursor stored; starting near chain head"
        );
        Ok(cursor)
    }

    /// Extract `block`, then save the cursor and snapshot, then notify.
    async fn advance(&self, block: &Block) -> Result<BatchOutcome, ScanError> {
        let outcome = self
            .pipeline
            .run(block.height, &block.hash, block.tx_refs())
            .await?;
        self.cursors
            .set_cursor(self.symbol(), block.height, &block.hash)
            .await?;
        self.cursors.put_cached_block(self.symbol(), block).await?;
        if let Some(floor) = block.height.checked_sub(self.config.snapshot_window()) {
            self.cursors.prune_cached_blocks(self.symbol(), floor).await?;
        }
        self.observers.notify_block(&block.header(self.symbol())).await;

        tracing::info!(
            height = block.height,
            hash = %block.hash,
            txs = outcome.total,
            failed = outcome.failed.len(),
            "Block scanned"
        );
        Ok(outcome)
    }

    /// Step the cursor back below a fork and tell observers about the blocks
    /// that dropped out of the chain.
    ///
    /// The new cursor hash always comes from the node. While the snapshot at
    /// the rewind target disagrees with the node, the fork is deeper and the
    /// rewind continues from there.
    async fn rewind(&self, event: ForkEvent) -> Result<Cursor, ScanError> {
        let symbol = self.symbol();
        let mut dropped = vec![match self
            .cursors
            .get_cached_block(symbol, event.forked_height)
            .await?
        {
            Some(block) if block.hash == event.local_hash => block.fork_header(symbol),
            _ => BlockHeader {
                height: event.forked_height,
                hash: event.local_hash.clone(),
                previous_hash: String::new(),
                merkle_root: String::new(),
                time: 0,
                symbol: symbol.to_string(),
                fork: true,
            },
        }];

        let mut target = event.rewind_to;
        let hash = loop {
            let canonical = self.node.get_block_hash(target).await?;
            match self.cursors.get_cached_block(symbol, target).await? {
                Some(stale) if stale.hash != canonical && target > 0 => {
                    dropped.push(stale.fork_header(symbol));
                    target = self.forks.rewind_height(target);
                }
                _ => break canonical,
            }
        };

        let mut cleared = 0;
        for height in target + 1..=event.forked_height {
            cleared += self.tracker.clear_height(height).await?;
        }
        self.cursors.set_cursor(symbol, target, &hash).await?;
        for header in &dropped {
            self.observers.notify_block(header).await;
        }

        tracing::info!(
            forked_height = event.forked_height,
            rewind_to = target,
            hash = %hash,
            dropped = dropped.len(),
            cleared,
            "Cursor rewound after fork"
        );
        Ok(Cursor::new(target, hash))
    }

    // ─── Retry phase ──────────────────────────────────────────────────────────

    /// Retry every unscanned record now. Returns how many were resolved.
    pub async fn rescan_failed_records(&self) -> Result<u64, ScanError> {
        let _pass = self.pass.lock().await;
        self.retry_failed().await
    }

    async fn retry_failed(&self) -> Result<u64, ScanError> {
        let groups: BTreeMap<u64, Vec<UnscanTask>> = self.tracker.pending_by_height().await?;
        if groups.is_empty() {
            return Ok(0);
        }
        tracing::info!(heights = groups.len(), "Retrying unscanned records");

        let mut resolved = 0;
        for (height, tasks) in groups {
            if self.stop.is_stopped() {
                break;
            }
            resolved += self.retry_height(height, tasks).await?;
        }
        Ok(resolved)
    }

    async fn retry_height(&self, height: u64, tasks: Vec<UnscanTask>) -> Result<u64, ScanError> {
        if height > 0 {
            return self.retry_block(height, tasks).await;
        }

        // height 0 holds mempool transactions and, rarely, a failed genesis block
        let (block_tasks, tx_tasks): (Vec<UnscanTask>, Vec<UnscanTask>) =
            tasks.into_iter().partition(UnscanTask::is_block_level);
        let mut resolved = 0;
        if !tx_tasks.is_empty() {
            let jobs = tx_tasks
                .iter()
                .map(|t| TxRef::from(t.txid.as_str()))
                .collect();
            let outcome = self.pipeline.run(0, "", jobs).await?;
            resolved += self.resolve_tasks(&tx_tasks, &outcome, false).await?;
        }
        if !block_tasks.is_empty() {
            resolved += self.retry_block(0, block_tasks).await?;
        }
        Ok(resolved)
    }

    async fn retry_block(&self, height: u64, tasks: Vec<UnscanTask>) -> Result<u64, ScanError> {
        let block = match self.node.get_block_by_height(height).await {
            Ok(block) => block,
            Err(e) if e.is_transient() => {
                tracing::warn!(height, error = %e, "Retry skipped; block unavailable");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let whole_block = tasks.iter().any(UnscanTask::is_block_level);
        let jobs = if whole_block {
            block.tx_refs()
        } else {
            let mut inline: HashMap<String, TxRef> = block
                .tx_refs()
                .into_iter()
                .map(|r| (r.txid().to_string(), r))
                .collect();
            tasks
                .iter()
                .map(|t| {
                    inline
                        .remove(&t.txid)
                        .unwrap_or_else(|| TxRef::from(t.txid.as_str()))
                })
                .collect()
        };

        let outcome = self.pipeline.run(block.height, &block.hash, jobs).await?;
        if whole_block {
            self.observers.notify_block(&block.header(self.symbol())).await;
        }
        self.resolve_tasks(&tasks, &outcome, whole_block).await
    }

    /// Delete tasks whose transaction now succeeded, and the block-level task
    /// once its block was run.
    async fn resolve_tasks(
        &self,
        tasks: &[UnscanTask],
        outcome: &BatchOutcome,
        block_ran: bool,
    ) -> Result<u64, ScanError> {
        let mut resolved = 0;
        for task in tasks {
            let done = if task.is_block_level() {
                block_ran
            } else {
                outcome.succeeded.iter().any(|id| id == &task.txid)
            };
            if done {
                self.tracker.resolve(task).await?;
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    // ─── On-demand operations ─────────────────────────────────────────────────

    /// Extract one block without moving the cursor.
    ///
    /// If the block cannot be fetched, a block-level unscanned record is
    /// queued and the fetch error is returned.
    pub async fn scan_block(&self, height: u64) -> Result<BatchOutcome, ScanError> {
        let block = match self.node.get_block_by_height(height).await {
            Ok(block) => block,
            Err(e) => {
                self.tracker
                    .record(height, "", &format!("block fetch failed: {e}"))
                    .await?;
                return Err(e);
            }
        };
        let outcome = self.pipeline.run(block.height, &block.hash, block.tx_refs()).await?;
        self.observers.notify_block(&block.header(self.symbol())).await;
        Ok(outcome)
    }

    /// Extract every transaction currently in the node's mempool.
    pub async fn scan_mempool(&self) -> Result<BatchOutcome, ScanError> {
        let ids = self.node.get_raw_mempool_ids().await?;
        tracing::debug!(count = ids.len(), "Scanning mempool");
        self.pipeline
            .run(0, "", ids.into_iter().map(TxRef::Id).collect())
            .await
    }

    /// Restart scanning at `height`: the cursor moves to `height - 1`.
    pub async fn set_rescan_height(&self, height: u64) -> Result<(), ScanError> {
        if height == 0 {
            return Err(ScanError::InvalidHeight(height));
        }
        let _pass = self.pass.lock().await;
        let target = height - 1;
        let hash = self.node.get_block_hash(target).await?;
        self.cursors.set_cursor(self.symbol(), target, &hash).await?;
        tracing::info!(height = target, hash = %hash, "Cursor moved for rescan");
        Ok(())
    }

    /// Header of the last scanned block; `head - 1` if nothing was scanned yet.
    pub async fn scanned_block_header(&self) -> Result<BlockHeader, ScanError> {
        let symbol = self.symbol();
        let cursor = match self.cursors.get_cursor(symbol).await? {
            Some(cursor) => cursor,
            None => {
                let height = self.node.get_block_count().await?.saturating_sub(1);
                let hash = self.node.get_block_hash(height).await?;
                Cursor::new(height, hash)
            }
        };
        if let Some(block) = self.cursors.get_cached_block(symbol, cursor.height).await? {
            if block.hash == cursor.hash {
                return Ok(block.header(symbol));
            }
        }
        Ok(BlockHeader {
            height: cursor.height,
            hash: cursor.hash,
            previous_hash: String::new(),
            merkle_root: String::new(),
            time: 0,
            symbol: symbol.to_string(),
            fork: false,
        })
    }

    /// Header of the node's current head block.
    pub async fn current_block_header(&self) -> Result<BlockHeader, ScanError> {
        let head = self.node.get_block_count().await?;
        let block = self.node.get_block_by_height(head).await?;
        Ok(block.header(self.symbol()))
    }

    /// The node's current chain height.
    pub async fn global_max_block_height(&self) -> Result<u64, ScanError> {
        self.node.get_block_count().await
    }

    /// Extract one transaction against `oracle`, grouped by owner.
    ///
    /// Nothing is notified or queued; a failure is returned to the caller.
    pub async fn extract_transaction_data(
        &self,
        txid: &str,
        oracle: &dyn OwnershipOracle,
    ) -> Result<BTreeMap<String, Vec<ExtractionRecord>>, ScanError> {
        let records = self
            .extractor
            .extract_with(oracle, 0, "", TxRef::from(txid))
            .await?;
        let mut by_owner: BTreeMap<String, Vec<ExtractionRecord>> = BTreeMap::new();
        for record in records {
            by_owner.entry(record.owner.clone()).or_default().push(record);
        }
        Ok(by_owner)
    }

    /// Drop unscanned records whose reason starts with `prefix`.
    pub async fn purge_unscanned(&self, prefix: &str) -> Result<u64, ScanError> {
        self.tracker.purge_by_reason_prefix(prefix).await
    }

    // ─── Runner ───────────────────────────────────────────────────────────────

    /// Scan until stopped: a pass, then the mempool, then a pause.
    ///
    /// Node failures are logged and retried on the next pass; storage
    /// failures end the runner.
    pub async fn run(&self) -> Result<(), ScanError> {
        let pause = Duration::from_millis(self.config.poll_interval_ms);
        tracing::info!(symbol = %self.symbol(), "Scanner started");

        while !self.stop.is_stopped() {
            match self.scan_pass().await {
                Ok(report) if report.stopped => break,
                Ok(report) => tracing::debug!(
                    blocks = report.blocks_scanned,
                    forks = report.forks,
                    resolved = report.resolved,
                    "Scan pass complete"
                ),
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => tracing::warn!(error = %e, "Scan pass failed"),
            }

            if self.config.scan_mempool && !self.stop.is_stopped() {
                match self.scan_mempool().await {
                    Ok(_) => {}
                    Err(e) if e.is_storage() => return Err(e),
                    Err(e) => tracing::warn!(error = %e, "Mempool scan failed"),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.stop.stopped() => {}
            }
        }

        self.set_state(ScannerState::Stopped);
        tracing::info!(symbol = %self.symbol(), "Scanner stopped");
        Ok(())
    }
}
