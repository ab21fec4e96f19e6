//! Observer trait + the notification fan-out registry.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ScanError;
use crate::record::ExtractionRecord;
use crate::types::BlockHeader;

/// Trait for subscribers of scan results.
///
/// Implement this to persist or forward extraction records and block heads.
#[async_trait]
pub trait ScanObserver: Send + Sync {
    /// Name used in logs and in `ScanError::Observer`.
    fn name(&self) -> &str;

    /// Called once per `(owner, record)` produced by a successful extraction.
    ///
    /// An error here does not abort the batch; the transaction is queued for
    /// a later retry pass instead, so implementations must tolerate seeing
    /// the same record again.
    async fn on_extraction(&self, owner: &str, record: &ExtractionRecord)
        -> Result<(), ScanError>;

    /// Called once per new block (or forked block, with `fork = true`) after
    /// the cursor has been saved.
    async fn on_new_block(&self, header: &BlockHeader);
}

/// Registry of observers. Every notification goes to every observer.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn ScanObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn register(&mut self, observer: Arc<dyn ScanObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver every record of one transaction to every observer.
    ///
    /// A failing observer does not stop delivery to the others. Returns the
    /// first failure, if any.
    pub async fn notify_extraction(&self, records: &[ExtractionRecord]) -> Result<(), ScanError> {
        let mut first_err = None;
        for observer in &self.observers {
            for record in records {
                if let Err(e) = observer.on_extraction(&record.owner, record).await {
                    tracing::warn!(
                        observer = observer.name(),
                        owner = %record.owner,
                        txid = %record.txid(),
                        error = %e,
                        "Observer failed to accept extraction record"
                    );
                    first_err.get_or_insert(ScanError::Observer {
                        observer: observer.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Deliver a block header to every observer.
    pub async fn notify_block(&self, header: &BlockHeader) {
        for observer in &self.observers {
            observer.on_new_block(header).await;
        }
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.observers.iter().map(|o| o.name()).collect();
        f.debug_struct("ObserverRegistry")
            .field("observers", &names)
            .finish()
    }
}
