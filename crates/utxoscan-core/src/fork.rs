//! Fork detection and rewind arithmetic.
//!
//! A fork is detected when the next block's `previous_hash` differs from the
//! hash recorded in the cursor. Recovery steps the cursor back
//! `rewind_depth` blocks so the blocks around the fork point are reprocessed.
//! The target is clamped to height 1, except that a fork at height 1 or 0
//! rewinds to genesis.

use crate::cursor::Cursor;
use crate::types::Block;

/// Describes a detected chain reorganization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkEvent {
    /// Height of the locally recorded block that is no longer canonical.
    pub forked_height: u64,
    /// Hash the cursor recorded at `forked_height`.
    pub local_hash: String,
    /// Parent hash the node reports for `forked_height + 1`.
    pub remote_hash: String,
    /// Height the cursor is rewound to.
    pub rewind_to: u64,
}

/// Detects forks against the cursor and computes the rewind target.
#[derive(Debug, Clone, Copy)]
pub struct ForkDetector {
    rewind_depth: u64,
}

impl ForkDetector {
    /// `rewind_depth` below 1 is raised to 1; a zero rewind would refetch the
    /// same mismatching block forever.
    pub fn new(rewind_depth: u64) -> Self {
        Self {
            rewind_depth: rewind_depth.max(1),
        }
    }

    pub fn rewind_depth(&self) -> u64 {
        self.rewind_depth
    }

    /// Check whether `candidate` (at `cursor.height + 1`) extends the cursor.
    ///
    /// Returns `Some(ForkEvent)` on a parent-hash mismatch.
    pub fn check(&self, cursor: &Cursor, candidate: &Block) -> Option<ForkEvent> {
        if candidate.extends(&cursor.hash) {
            return None;
        }
        let event = ForkEvent {
            forked_height: cursor.height,
            local_hash: cursor.hash.clone(),
            remote_hash: candidate.previous_hash.clone(),
            rewind_to: self.rewind_height(cursor.height),
        };
        tracing::warn!(
            height = event.forked_height,
            local = %event.local_hash,
            remote = %event.remote_hash,
            rewind_to = event.rewind_to,
            "Fork detected"
        );
        Some(event)
    }

    /// The height to rewind to from `forked_height`.
    ///
    /// Always below `forked_height` (or `0` for a fork at genesis), and not
    /// below 1 unless the fork is at height 1.
    pub fn rewind_height(&self, forked_height: u64) -> u64 {
        if forked_height <= 1 {
            return 0;
        }
        forked_height.saturating_sub(self.rewind_depth).max(1)
    }
}

impl Default for ForkDetector {
    fn default() -> Self {
        Self::new(2)
    }
}
