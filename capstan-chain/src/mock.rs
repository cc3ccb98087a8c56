//! Programmable in-memory chain for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use capstan_core::{BlockData, BlockInfo, Error, Result, TxData};

use crate::client::ChainClient;

/// A mock upstream chain.
///
/// Tests stage blocks and loose transactions, then point the engine at
/// it. `replace_from` simulates a reorg by swapping out a suffix of the
/// chain; `fail_block_fetches` wedges `block()` to exercise tick-abort
/// paths.
#[derive(Default)]
pub struct MockChain {
    blocks: RwLock<BTreeMap<u64, BlockData>>,
    transactions: RwLock<HashMap<String, TxData>>,
    fail_block_fetches: AtomicBool,
    fail_block_fetch_at: RwLock<Option<u64>>,
    raw_transaction_calls: AtomicU64,
}

impl MockChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append or overwrite a block; its transactions become fetchable
    /// via `raw_transaction` as well.
    pub fn add_block(&self, block: BlockData) {
        let mut transactions = self.transactions.write();
        for tx in &block.transactions {
            transactions.insert(tx.txid.clone(), tx.clone());
        }
        drop(transactions);
        self.blocks.write().insert(block.height, block);
    }

    /// Register a loose transaction (e.g. a funding transaction spent
    /// by a staged block) for `raw_transaction` lookups.
    pub fn add_raw_transaction(&self, tx: TxData) {
        self.transactions.write().insert(tx.txid.clone(), tx);
    }

    /// Simulate a reorg: drop every block at or above `height`, then
    /// stage the replacements.
    pub fn replace_from(&self, height: u64, replacements: Vec<BlockData>) {
        self.blocks.write().retain(|&h, _| h < height);
        for block in replacements {
            self.add_block(block);
        }
    }

    /// Make subsequent `block()` calls fail with a retryable error.
    pub fn fail_block_fetches(&self, fail: bool) {
        self.fail_block_fetches.store(fail, Ordering::SeqCst);
    }

    /// Make the next `block()` call for `height` fail once, simulating
    /// a crash mid-tick.
    pub fn fail_block_fetch_once_at(&self, height: u64) {
        *self.fail_block_fetch_at.write() = Some(height);
    }

    /// How many `raw_transaction` lookups have been served.
    pub fn raw_transaction_call_count(&self) -> u64 {
        self.raw_transaction_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn tip_height(&self) -> Result<u64> {
        self.blocks
            .read()
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| Error::NotFound("mock chain has no blocks".into()))
    }

    async fn block_hash(&self, height: u64) -> Result<String> {
        self.blocks
            .read()
            .get(&height)
            .map(|b| b.hash.clone())
            .ok_or_else(|| Error::NotFound(format!("no block at height {}", height)))
    }

    async fn block(&self, height: u64) -> Result<BlockData> {
        if self.fail_block_fetches.load(Ordering::SeqCst) {
            return Err(Error::Upstream("mock block fetch failure".into()));
        }
        {
            let mut fail_at = self.fail_block_fetch_at.write();
            if *fail_at == Some(height) {
                *fail_at = None;
                return Err(Error::Upstream(format!(
                    "mock block fetch failure at height {}",
                    height
                )));
            }
        }
        self.blocks
            .read()
            .get(&height)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no block at height {}", height)))
    }

    async fn raw_transaction(&self, txid: &str) -> Result<TxData> {
        self.raw_transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.transactions
            .read()
            .get(txid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no transaction {}", txid)))
    }

    async fn block_info_by_hash(&self, hash: &str) -> Result<BlockInfo> {
        self.blocks
            .read()
            .values()
            .find(|b| b.hash == hash)
            .map(|b| BlockInfo {
                height: b.height,
                hash: b.hash.clone(),
            })
            .ok_or_else(|| Error::NotFound(format!("no block with hash {}", hash)))
    }
}
