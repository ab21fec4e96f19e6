//! Scanner configuration and state types.

use serde::{Deserialize, Serialize};

/// Configuration for a scanner instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Chain symbol (used as the storage key, e.g. `"VAS"`).
    pub symbol: String,
    /// Decimal places the fee is rounded to.
    pub decimals: u32,
    /// Extraction slots: how many transactions are extracted concurrently.
    pub max_extracting: usize,
    /// Capacity of the pipeline's result channel. Workers wait when it is full.
    pub result_buffer: usize,
    /// How many blocks to step back from a fork point.
    pub rewind_depth: u64,
    /// How many block snapshots below the cursor are kept for fork checks.
    /// Never fewer than `rewind_depth + 1`.
    pub block_cache_depth: u64,
    /// Timeout applied to every node call (milliseconds).
    pub rpc_timeout_ms: u64,
    /// Pause between scan passes of the periodic runner (milliseconds).
    pub poll_interval_ms: u64,
    /// Also scan the mempool on every pass of the periodic runner.
    pub scan_mempool: bool,
    /// Output script types that carry data, not payments. Such outputs are
    /// skipped entirely.
    pub data_markers: Vec<String>,
}

impl ScannerConfig {
    /// Snapshots kept below the newest one.
    pub fn snapshot_window(&self) -> u64 {
        self.block_cache_depth.max(self.rewind_depth + 1)
    }

    /// Returns `true` if outputs with `script_type` are excluded from extraction.
    pub fn is_data_marker(&self, script_type: &str) -> bool {
        self.data_markers
            .iter()
            .any(|m| m.eq_ignore_ascii_case(script_type))
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            symbol: "VAS".into(),
            decimals: 8,
            max_extracting: 6,
            result_buffer: 256,
            rewind_depth: 2,
            block_cache_depth: 100,
            rpc_timeout_ms: 30_000,
            poll_interval_ms: 5_000,
            scan_mempool: true,
            data_markers: vec!["OP_RETURN".into(), "nulldata".into()],
        }
    }
}

/// Runtime state of the scan loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerState {
    /// Not yet started, or between passes.
    Idle,
    /// Moving the cursor forward block by block.
    Advancing,
    /// A fork was detected; the cursor is being rewound.
    Rewinding,
    /// Caught up (or blocked); retrying unscanned records.
    RetryingFailed,
    /// The stop flag was observed.
    Stopped,
}

impl std::fmt::Display for ScannerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Advancing => write!(f, "advancing"),
            Self::Rewinding => write!(f, "rewinding"),
            Self::RetryingFailed => write!(f, "retrying-failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
