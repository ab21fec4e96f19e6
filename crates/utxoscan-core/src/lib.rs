//! utxoscan-core — data model and collaborator traits for the UTXO block scanner.
//!
//! # Architecture
//!
//! ```text
//! ScannerBuilder → Scanner (scan loop, utxoscan-engine)
//!                      ├── NodeClient        (remote node, wrapped with timeouts)
//!                      ├── ForkDetector      (parent-hash check + rewind)
//!                      ├── ExtractionPipeline (bounded fan-out / fan-in)
//!                      │     └── OwnershipOracle (address → owner)
//!                      ├── ObserverRegistry  (notification fan-out)
//!                      └── CursorStore + UnscanStore (memory / SQLite)
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod fork;
pub mod node;
pub mod observer;
pub mod oracle;
pub mod record;
pub mod types;
pub mod unscan;

pub use config::{ScannerConfig, ScannerState};
pub use cursor::{Cursor, CursorStore};
pub use error::ScanError;
pub use fork::{ForkDetector, ForkEvent};
pub use node::NodeClient;
pub use observer::{ObserverRegistry, ScanObserver};
pub use oracle::{AddressBook, OwnershipOracle};
pub use record::{stable_id, ExtractionRecord, TxInput, TxOutput, TxStatus, TxSummary};
pub use types::{Block, BlockHeader, Transaction, TxRef, Vin, Vout};
pub use unscan::{UnscanStore, UnscanTask};
