//! The abstract chain data model and anchor records.
//!
//! These types are the contract between the chain client and the rest
//! of the system: the client translates whatever its RPC transport
//! returns into this model, and everything downstream (extraction, fee
//! computation, the log) is expressed against it.

use serde::{Deserialize, Serialize};

/// A block as seen by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    /// Block height.
    pub height: u64,
    /// Block hash, lowercase hex.
    pub hash: String,
    /// All transactions in block order.
    pub transactions: Vec<TxData>,
}

/// A transaction with enough detail for anchor extraction and fee math.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxData {
    /// Transaction id, lowercase hex.
    pub txid: String,
    /// Whether this is the block's coinbase transaction.
    pub is_coinbase: bool,
    /// Inputs in order.
    pub inputs: Vec<TxInput>,
    /// Outputs in order.
    pub outputs: Vec<TxOutput>,
}

impl TxData {
    /// Sum of output values in satoshis.
    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value_satoshis).sum()
    }
}

/// A transaction input, identified by the output it spends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction that created the spent output.
    pub prev_txid: String,
    /// Index of the spent output within that transaction.
    pub prev_vout: u32,
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Value in satoshis.
    pub value_satoshis: u64,
    /// Raw script bytes.
    pub script_pubkey: Vec<u8>,
}

/// Height and hash of a block, as returned by time queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block height.
    pub height: u64,
    /// Block hash, lowercase hex.
    pub hash: String,
}

/// One discovered anchor: an OP_RETURN output carrying the configured
/// prefix, persisted in the transaction log.
///
/// Records are immutable once written; rollback deletes them wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    /// Composite order key, see [`crate::txnum`].
    pub transaction_number: u64,
    /// Height of the carrying block.
    pub block_height: u64,
    /// Hash of the carrying block, lowercase hex.
    pub block_hash: String,
    /// OP_RETURN data with the anchor prefix stripped.
    pub anchor_payload: Vec<u8>,
    /// Fee paid by the carrying transaction, in satoshis.
    pub fee_paid: u64,
}
