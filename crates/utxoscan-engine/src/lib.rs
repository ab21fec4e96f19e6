//! utxoscan-engine — the scan loop, fork rewind, bounded extraction pipeline
//! and unscanned-record retry for UTXO chains.

pub mod builder;
pub mod extractor;
pub mod node;
pub mod pipeline;
pub mod scanner;
pub mod stop;
pub mod tracker;

#[cfg(test)]
mod testkit;

pub use builder::ScannerBuilder;
pub use extractor::TransactionExtractor;
pub use node::TimedNode;
pub use pipeline::{BatchOutcome, ExtractionPipeline};
pub use scanner::{ScanReport, Scanner};
pub use stop::StopHandle;
pub use tracker::UnscanTracker;
