//! Extraction pipeline — bounded fan-out over a batch of transactions, fan-in
//! through a single aggregator.
//!
//! ```text
//! run(batch) ──► [slot 1..N] extract ──┐
//!                                      ├──► results (bounded mpsc) ──► aggregator
//!                [slot 1..N] extract ──┘        success → ObserverRegistry
//!                                               failure → UnscanTracker
//!                                               done == total → oneshot
//! ```
//!
//! A worker keeps its slot until its result is in the channel, so a full
//! channel stalls dispatch instead of growing memory. The aggregator is the
//! only consumer; results are handled one at a time in completion order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Semaphore};
use utxoscan_core::error::ScanError;
use utxoscan_core::observer::ObserverRegistry;
use utxoscan_core::record::ExtractionRecord;
use utxoscan_core::types::TxRef;

use crate::extractor::TransactionExtractor;
use crate::tracker::UnscanTracker;

/// Result of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Number of transactions in the batch.
    pub total: usize,
    /// Transactions extracted and delivered to every observer.
    pub succeeded: Vec<String>,
    /// Transactions queued for retry.
    pub failed: Vec<String>,
}

impl BatchOutcome {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// One worker's answer.
struct Extracted {
    txid: String,
    result: Result<Vec<ExtractionRecord>, String>,
}

pub struct ExtractionPipeline {
    extractor: Arc<TransactionExtractor>,
    observers: ObserverRegistry,
    tracker: UnscanTracker,
    max_extracting: usize,
    result_buffer: usize,
}

impl ExtractionPipeline {
    pub fn new(
        extractor: Arc<TransactionExtractor>,
        observers: ObserverRegistry,
        tracker: UnscanTracker,
        max_extracting: usize,
        result_buffer: usize,
    ) -> Self {
        Self {
            extractor,
            observers,
            tracker,
            max_extracting: max_extracting.max(1),
            result_buffer: result_buffer.max(1),
        }
    }

    /// Extract every job of one batch and wait for all of them.
    ///
    /// Failed extractions (and records an observer refused) are queued as
    /// unscanned records at `height`; they do not fail the batch. The batch
    /// fails only if a failure could not be queued, or results were lost.
    pub async fn run(
        &self,
        height: u64,
        block_hash: &str,
        jobs: Vec<TxRef>,
    ) -> Result<BatchOutcome, ScanError> {
        let total = jobs.len();
        if total == 0 {
            return Ok(BatchOutcome::default());
        }

        let (results_tx, results_rx) = mpsc::channel(self.result_buffer);
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(aggregate(
            results_rx,
            total,
            height,
            self.observers.clone(),
            self.tracker.clone(),
            done_tx,
        ));

        let slots = Arc::new(Semaphore::new(self.max_extracting));
        for job in jobs {
            let permit = slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ScanError::Other("extraction slots closed".into()))?;
            let extractor = self.extractor.clone();
            let results = results_tx.clone();
            let hash = block_hash.to_string();

            tokio::spawn(async move {
                let txid = job.txid().to_string();
                let result = match AssertUnwindSafe(extractor.extract(height, &hash, job))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(records)) => Ok(records),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("extraction panicked".to_string()),
                };
                if results.send(Extracted { txid, result }).await.is_err() {
                    tracing::error!(height, "Aggregator gone; extraction result dropped");
                }
                drop(permit);
            });
        }
        drop(results_tx);

        let outcome = done_rx
            .await
            .map_err(|_| ScanError::Other("extraction aggregator stopped".into()))??;

        tracing::info!(
            height,
            total = outcome.total,
            failed = outcome.failed.len(),
            "Batch extracted"
        );
        Ok(outcome)
    }
}

/// Single consumer of the results channel. Completes `done` exactly once.
async fn aggregate(
    mut results: mpsc::Receiver<Extracted>,
    total: usize,
    height: u64,
    observers: ObserverRegistry,
    tracker: UnscanTracker,
    done: oneshot::Sender<Result<BatchOutcome, ScanError>>,
) {
    let mut outcome = BatchOutcome {
        total,
        ..Default::default()
    };
    let mut queue_error = None;
    let mut completed = 0;

    while completed < total {
        let Some(Extracted { txid, result }) = results.recv().await else {
            break;
        };
        completed += 1;

        let failure = match result {
            Ok(records) => match observers.notify_extraction(&records).await {
                Ok(()) => None,
                Err(e) => Some(format!("extraction notify failed: {e}")),
            },
            Err(reason) => Some(reason),
        };

        match failure {
            None => outcome.succeeded.push(txid),
            Some(reason) => {
                tracing::warn!(height, txid = %txid, reason = %reason, "Extraction failed");
                if let Err(e) = tracker.record(height, &txid, &reason).await {
                    tracing::error!(height, txid = %txid, error = %e, "Could not queue failed extraction");
                    queue_error.get_or_insert(e);
                }
                outcome.failed.push(txid);
            }
        }
    }

    let result = if completed < total {
        Err(ScanError::Other(format!(
            "{} of {total} extraction results lost at height {height}",
            total - completed
        )))
    } else if let Some(e) = queue_error {
        Err(e)
    } else {
        Ok(outcome)
    };
    // the caller may have been dropped; nothing is left to report to
    let _ = done.send(result);
}
