//! The chain client contract.

use async_trait::async_trait;

use capstan_core::{BlockData, BlockInfo, Result, TxData};

/// Abstract view of the upstream chain.
///
/// Implementations must distinguish retryable transport trouble
/// (`Error::UpstreamTimeout`, `Error::Upstream`) from everything else;
/// height/hash lookups past the tip return `Error::NotFound`.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Height of the current chain tip.
    async fn tip_height(&self) -> Result<u64>;

    /// Hash of the block at `height`. `NotFound` past the tip.
    async fn block_hash(&self, height: u64) -> Result<String>;

    /// The full block at `height`, with all transactions.
    async fn block(&self, height: u64) -> Result<BlockData>;

    /// A transaction by id, wherever it is on the chain. Used for
    /// inputs-of-inputs fee computation.
    async fn raw_transaction(&self, txid: &str) -> Result<TxData>;

    /// Height and canonical hash of the block with the given hash.
    async fn block_info_by_hash(&self, hash: &str) -> Result<BlockInfo>;
}
