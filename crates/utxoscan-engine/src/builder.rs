//! Fluent builder API for creating scanners.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use utxoscan_core::{AddressBook, NodeClient};
//! # use utxoscan_engine::ScannerBuilder;
//! # use utxoscan_storage::InMemoryStorage;
//! # async fn example(node: Arc<dyn NodeClient>) -> Result<(), utxoscan_core::ScanError> {
//! let book: AddressBook = [("VcXv5GCKuJDaxBm8uSRpYp2J6cdQtXnXvRr", "acct-1")]
//!     .into_iter()
//!     .collect();
//! let scanner = ScannerBuilder::new()
//!     .symbol("VAS")
//!     .max_extracting(8)
//!     .rewind_depth(3)
//!     .node(node)
//!     .store(Arc::new(InMemoryStorage::new()))
//!     .oracle(Arc::new(book))
//!     .build()?;
//! scanner.scan_pass().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use utxoscan_core::config::{ScannerConfig, ScannerState};
use utxoscan_core::cursor::CursorStore;
use utxoscan_core::error::ScanError;
use utxoscan_core::fork::ForkDetector;
use utxoscan_core::node::NodeClient;
use utxoscan_core::observer::{ObserverRegistry, ScanObserver};
use utxoscan_core::oracle::OwnershipOracle;
use utxoscan_core::unscan::UnscanStore;

use crate::extractor::TransactionExtractor;
use crate::node::TimedNode;
use crate::pipeline::ExtractionPipeline;
use crate::scanner::Scanner;
use crate::stop::StopHandle;
use crate::tracker::UnscanTracker;

/// Fluent builder for [`Scanner`]: configuration plus injected collaborators.
#[derive(Default)]
pub struct ScannerBuilder {
    config: ScannerConfig,
    node: Option<Arc<dyn NodeClient>>,
    cursors: Option<Arc<dyn CursorStore>>,
    unscan: Option<Arc<dyn UnscanStore>>,
    oracle: Option<Arc<dyn OwnershipOracle>>,
    observers: ObserverRegistry,
    stop: Option<StopHandle>,
}

impl ScannerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration (e.g. one loaded from a file).
    pub fn config(mut self, config: ScannerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the chain symbol (storage key).
    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.config.symbol = symbol.into();
        self
    }

    /// Set the decimal places fees are rounded to.
    pub fn decimals(mut self, decimals: u32) -> Self {
        self.config.decimals = decimals;
        self
    }

    /// Set how many transactions are extracted concurrently.
    pub fn max_extracting(mut self, slots: usize) -> Self {
        self.config.max_extracting = slots;
        self
    }

    /// Set the capacity of the pipeline's result channel.
    pub fn result_buffer(mut self, capacity: usize) -> Self {
        self.config.result_buffer = capacity;
        self
    }

    /// Set how far the cursor steps back from a fork point.
    pub fn rewind_depth(mut self, depth: u64) -> Self {
        self.config.rewind_depth = depth;
        self
    }

    /// Set how many block snapshots below the cursor are kept.
    pub fn block_cache_depth(mut self, depth: u64) -> Self {
        self.config.block_cache_depth = depth;
        self
    }

    /// Set the per-call node timeout in milliseconds.
    pub fn rpc_timeout_ms(mut self, ms: u64) -> Self {
        self.config.rpc_timeout_ms = ms;
        self
    }

    /// Set the pause between runner passes in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn scan_mempool(mut self, enabled: bool) -> Self {
        self.config.scan_mempool = enabled;
        self
    }

    /// Set the output script types skipped as data carriers.
    pub fn data_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.data_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    pub fn node(mut self, node: Arc<dyn NodeClient>) -> Self {
        self.node = Some(node);
        self
    }

    /// Use one backend for both the cursor and the unscanned records.
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: CursorStore + UnscanStore + 'static,
    {
        self.cursors = Some(store.clone());
        self.unscan = Some(store);
        self
    }

    pub fn cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.cursors = Some(store);
        self
    }

    pub fn unscan_store(mut self, store: Arc<dyn UnscanStore>) -> Self {
        self.unscan = Some(store);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn OwnershipOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Register an observer. May be called repeatedly.
    pub fn observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.observers.register(observer);
        self
    }

    /// Share an existing stop handle with the scanner.
    pub fn stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Build the `ScannerConfig` only.
    pub fn build_config(self) -> ScannerConfig {
        self.config
    }

    /// Wire up the scanner.
    ///
    /// Fails if a collaborator is missing or the configuration is unusable.
    pub fn build(self) -> Result<Scanner, ScanError> {
        let config = self.config;
        if config.symbol.is_empty() {
            return Err(ScanError::Other("symbol must not be empty".into()));
        }
        if config.max_extracting == 0 {
            return Err(ScanError::Other("max_extracting must be at least 1".into()));
        }
        if config.result_buffer == 0 {
            return Err(ScanError::Other("result_buffer must be at least 1".into()));
        }
        if config.rpc_timeout_ms == 0 {
            return Err(ScanError::Other("rpc_timeout_ms must be at least 1".into()));
        }
        let node = self
            .node
            .ok_or_else(|| ScanError::Other("no node client configured".into()))?;
        let cursors = self
            .cursors
            .ok_or_else(|| ScanError::Other("no cursor store configured".into()))?;
        let unscan = self
            .unscan
            .ok_or_else(|| ScanError::Other("no unscanned-record store configured".into()))?;
        let oracle = self
            .oracle
            .ok_or_else(|| ScanError::Other("no ownership oracle configured".into()))?;

        let config = Arc::new(config);
        let node: Arc<dyn NodeClient> = Arc::new(TimedNode::new(
            node,
            Duration::from_millis(config.rpc_timeout_ms),
        ));
        let tracker = UnscanTracker::new(unscan, config.symbol.clone());
        let extractor = Arc::new(TransactionExtractor::new(
            node.clone(),
            oracle,
            config.clone(),
        ));
        let pipeline = ExtractionPipeline::new(
            extractor.clone(),
            self.observers.clone(),
            tracker.clone(),
            config.max_extracting,
            config.result_buffer,
        );

        tracing::debug!(
            symbol = %config.symbol,
            slots = config.max_extracting,
            observers = self.observers.len(),
            "Scanner built"
        );

        Ok(Scanner {
            forks: ForkDetector::new(config.rewind_depth),
            config,
            node,
            cursors,
            tracker,
            extractor,
            pipeline,
            observers: self.observers,
            stop: self.stop.unwrap_or_default(),
            state: Mutex::new(ScannerState::Idle),
            pass: tokio::sync::Mutex::new(()),
        })
    }
}
