//! Storage traits.

use capstan_core::{AnchorRecord, Result};
use serde::{Deserialize, Serialize};

/// One persisted batch of quantile state.
///
/// Snapshots form a contiguous run of batch ids; the frequency vector
/// is the batch's own fee histogram (sparse `(bucket, count)` pairs),
/// kept so the sliding window can be rebuilt and the oldest batch
/// subtracted on eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantileSnapshot {
    /// Batch id (`block_height / batch_size_in_blocks`).
    pub batch_id: u64,
    /// The window quantile as of this batch, in satoshis.
    pub quantile_value_satoshis: u64,
    /// This batch's fee histogram as sorted `(bucket, count)` pairs.
    pub frequencies: Vec<(u64, u64)>,
}

/// Ordered, persistent store of anchor records.
///
/// `append` and `remove_later_than` must be durable before returning.
pub trait TransactionLog: Send + Sync {
    /// Store a record. Re-appending a byte-identical record is a no-op;
    /// a different record under an existing number is an invariant
    /// violation.
    fn append(&self, record: &AnchorRecord) -> Result<()>;

    /// The record with the greatest transaction number, if any.
    fn last(&self) -> Result<Option<AnchorRecord>>;

    /// Up to `limit` records with transaction number strictly greater
    /// than `transaction_number`, ascending. `None` starts from the
    /// beginning.
    fn later_than(
        &self,
        transaction_number: Option<u64>,
        limit: u32,
    ) -> Result<Vec<AnchorRecord>>;

    /// Total number of stored records.
    fn count(&self) -> Result<u64>;

    /// Records at offsets 0, 1, 2, 4, 8, ... from the tail (newest
    /// first), one per offset that exists. Used by fork recovery to
    /// probe history with O(log n) upstream queries.
    fn exponentially_spaced(&self) -> Result<Vec<AnchorRecord>>;

    /// Delete every record with transaction number strictly greater
    /// than `transaction_number`; `None` deletes everything.
    fn remove_later_than(&self, transaction_number: Option<u64>) -> Result<()>;
}

/// Persistent store of quantile snapshots.
pub trait QuantileStore: Send + Sync {
    /// Persist a snapshot durably.
    fn put_snapshot(&self, snapshot: &QuantileSnapshot) -> Result<()>;

    /// Fetch the snapshot for `batch_id`, if present.
    fn get_snapshot(&self, batch_id: u64) -> Result<Option<QuantileSnapshot>>;

    /// The snapshot with the greatest batch id, if any.
    fn last_snapshot(&self) -> Result<Option<QuantileSnapshot>>;

    /// The newest `count` snapshots in ascending batch-id order.
    fn snapshots_back_from_tail(&self, count: usize) -> Result<Vec<QuantileSnapshot>>;

    /// Delete every snapshot with batch id >= `batch_id`.
    fn remove_snapshots_ge(&self, batch_id: u64) -> Result<()>;

    /// Delete every snapshot with batch id < `batch_id`. Used to evict
    /// the head once the sliding window overflows.
    fn remove_snapshots_lt(&self, batch_id: u64) -> Result<()>;
}
