//! In-memory storage backend.
//!
//! Stores cursors, block snapshots and unscanned records in RAM.
//! Useful for testing and short-lived scanners that don't need persistence.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use utxoscan_core::cursor::{Cursor, CursorStore};
use utxoscan_core::error::ScanError;
use utxoscan_core::types::Block;
use utxoscan_core::unscan::{UnscanStore, UnscanTask};

/// In-memory scanner storage, keyed by chain symbol.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    cursors: Mutex<HashMap<String, Cursor>>,
    blocks: Mutex<HashMap<String, BTreeMap<u64, Block>>>,
    unscanned: Mutex<HashMap<String, BTreeMap<String, UnscanTask>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached block snapshots for `symbol`.
    pub fn cached_block_count(&self, symbol: &str) -> usize {
        lock(&self.blocks).get(symbol).map_or(0, BTreeMap::len)
    }

    /// Number of pending unscanned records for `symbol`.
    pub fn unscanned_count(&self, symbol: &str) -> usize {
        lock(&self.unscanned).get(symbol).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl CursorStore for InMemoryStorage {
    async fn get_cursor(&self, symbol: &str) -> Result<Option<Cursor>, ScanError> {
        Ok(lock(&self.cursors).get(symbol).cloned())
    }

    async fn set_cursor(&self, symbol: &str, height: u64, hash: &str) -> Result<(), ScanError> {
        lock(&self.cursors).insert(symbol.to_string(), Cursor::new(height, hash));
        Ok(())
    }

    async fn get_cached_block(
        &self,
        symbol: &str,
        height: u64,
    ) -> Result<Option<Block>, ScanError> {
        Ok(lock(&self.blocks)
            .get(symbol)
            .and_then(|blocks| blocks.get(&height))
            .cloned())
    }

    async fn put_cached_block(&self, symbol: &str, block: &Block) -> Result<(), ScanError> {
        lock(&self.blocks)
            .entry(symbol.to_string())
            .or_default()
            .insert(block.height, block.clone());
        Ok(())
    }

    async fn prune_cached_blocks(&self, symbol: &str, height: u64) -> Result<u64, ScanError> {
        let mut blocks = lock(&self.blocks);
        let Some(cached) = blocks.get_mut(symbol) else {
            return Ok(0);
        };
        let kept = cached.split_off(&height);
        let removed = cached.len() as u64;
        *cached = kept;
        Ok(removed)
    }
}

#[async_trait]
impl UnscanStore for InMemoryStorage {
    async fn list_unscanned(&self, symbol: &str) -> Result<Vec<UnscanTask>, ScanError> {
        let mut tasks: Vec<UnscanTask> = lock(&self.unscanned)
            .get(symbol)
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default();
        tasks.sort_by(|a, b| (a.block_height, &a.txid).cmp(&(b.block_height, &b.txid)));
        Ok(tasks)
    }

    async fn insert_unscanned(&self, task: &UnscanTask) -> Result<bool, ScanError> {
        let mut unscanned = lock(&self.unscanned);
        let tasks = unscanned.entry(task.symbol.clone()).or_default();
        if tasks.contains_key(&task.id) {
            return Ok(false);
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(true)
    }

    async fn delete_unscanned(&self, symbol: &str, id: &str) -> Result<(), ScanError> {
        if let Some(tasks) = lock(&self.unscanned).get_mut(symbol) {
            tasks.remove(id);
        }
        Ok(())
    }

    async fn delete_unscanned_at(
        &self,
        symbol: &str,
        block_height: u64,
    ) -> Result<u64, ScanError> {
        let mut unscanned = lock(&self.unscanned);
        let Some(tasks) = unscanned.get_mut(symbol) else {
            return Ok(0);
        };
        let before = tasks.len();
        tasks.retain(|_, t| t.block_height != block_height);
        Ok((before - tasks.len()) as u64)
    }
}
