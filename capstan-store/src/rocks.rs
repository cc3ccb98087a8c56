//! RocksDB storage implementation.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB,
};
use tracing::{debug, info};

use capstan_core::{AnchorRecord, Error, Result};

use crate::traits::{QuantileSnapshot, QuantileStore, TransactionLog};

/// Column family names.
mod cf {
    pub const TRANSACTIONS: &str = "transactions";
    pub const QUANTILE_SNAPSHOTS: &str = "quantile_snapshots";
    pub const META: &str = "meta";
}

/// Metadata keys.
mod meta {
    pub const TRANSACTION_COUNT: &[u8] = b"transaction_count";
}

/// RocksDB-backed storage for anchor records and quantile snapshots.
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("opening RocksDB at {:?}", path);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_names = [cf::TRANSACTIONS, cf::QUANTILE_SNAPSHOTS, cf::META];
        let cf_descriptors: Vec<_> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(Error::persistence)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Open with a temporary directory (for testing).
    pub fn open_temp() -> Result<Self> {
        let dir = tempfile::tempdir().map_err(Error::persistence)?;
        let path = dir.path().to_path_buf();
        // Keep the temp dir alive for the life of the process.
        std::mem::forget(dir);
        Self::open(path)
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Persistence(format!("missing column family: {}", name)))
    }

    /// Write a batch with the fsync barrier the log contract requires.
    fn write_durable(&self, batch: WriteBatch) -> Result<()> {
        let mut wo = WriteOptions::default();
        wo.set_sync(true);
        self.db.write_opt(batch, &wo).map_err(Error::persistence)
    }

    fn get_count(&self) -> Result<u64> {
        match self
            .db
            .get_cf(self.cf(cf::META)?, meta::TRANSACTION_COUNT)
            .map_err(Error::persistence)?
        {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Persistence("invalid count encoding".into()))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    fn decode_record(bytes: &[u8]) -> Result<AnchorRecord> {
        bincode::deserialize(bytes).map_err(Error::persistence)
    }

    fn decode_snapshot(bytes: &[u8]) -> Result<QuantileSnapshot> {
        bincode::deserialize(bytes).map_err(Error::persistence)
    }
}

impl Clone for RocksStore {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}

impl TransactionLog for RocksStore {
    fn append(&self, record: &AnchorRecord) -> Result<()> {
        let key = record.transaction_number.to_be_bytes();
        let txs = self.cf(cf::TRANSACTIONS)?;

        if let Some(existing) = self.db.get_cf(txs, key).map_err(Error::persistence)? {
            let existing = Self::decode_record(&existing)?;
            if existing == *record {
                debug!(
                    transaction_number = record.transaction_number,
                    "record already stored, append is a no-op"
                );
                return Ok(());
            }
            return Err(Error::invariant(format!(
                "conflicting record for transaction number {}",
                record.transaction_number
            )));
        }

        let bytes = bincode::serialize(record).map_err(Error::persistence)?;
        let count = self.get_count()?;

        let mut batch = WriteBatch::default();
        batch.put_cf(txs, key, bytes);
        batch.put_cf(
            self.cf(cf::META)?,
            meta::TRANSACTION_COUNT,
            (count + 1).to_be_bytes(),
        );
        self.write_durable(batch)
    }

    fn last(&self) -> Result<Option<AnchorRecord>> {
        let txs = self.cf(cf::TRANSACTIONS)?;
        match self.db.iterator_cf(txs, IteratorMode::End).next() {
            Some(entry) => {
                let (_, value) = entry.map_err(Error::persistence)?;
                Ok(Some(Self::decode_record(&value)?))
            }
            None => Ok(None),
        }
    }

    fn later_than(
        &self,
        transaction_number: Option<u64>,
        limit: u32,
    ) -> Result<Vec<AnchorRecord>> {
        let txs = self.cf(cf::TRANSACTIONS)?;

        let start_key;
        let mode = match transaction_number {
            None => IteratorMode::Start,
            Some(u64::MAX) => return Ok(Vec::new()),
            Some(n) => {
                start_key = (n + 1).to_be_bytes();
                IteratorMode::From(&start_key, Direction::Forward)
            }
        };

        let mut records = Vec::new();
        for entry in self.db.iterator_cf(txs, mode) {
            if records.len() as u32 >= limit {
                break;
            }
            let (_, value) = entry.map_err(Error::persistence)?;
            records.push(Self::decode_record(&value)?);
        }
        Ok(records)
    }

    fn count(&self) -> Result<u64> {
        self.get_count()
    }

    fn exponentially_spaced(&self) -> Result<Vec<AnchorRecord>> {
        let txs = self.cf(cf::TRANSACTIONS)?;
        let mut probes = Vec::new();
        let mut next_offset: u64 = 0;

        for (offset, entry) in self.db.iterator_cf(txs, IteratorMode::End).enumerate() {
            let (_, value) = entry.map_err(Error::persistence)?;
            if offset as u64 == next_offset {
                probes.push(Self::decode_record(&value)?);
                next_offset = if next_offset == 0 { 1 } else { next_offset * 2 };
            }
        }
        Ok(probes)
    }

    fn remove_later_than(&self, transaction_number: Option<u64>) -> Result<()> {
        let txs = self.cf(cf::TRANSACTIONS)?;

        let start_key;
        let mode = match transaction_number {
            None => IteratorMode::Start,
            Some(u64::MAX) => return Ok(()),
            Some(n) => {
                start_key = (n + 1).to_be_bytes();
                IteratorMode::From(&start_key, Direction::Forward)
            }
        };

        let mut keys = Vec::new();
        for entry in self.db.iterator_cf(txs, mode) {
            let (key, _) = entry.map_err(Error::persistence)?;
            keys.push(key);
        }
        if keys.is_empty() {
            return Ok(());
        }

        let removed = keys.len() as u64;
        let count = self.get_count()?;
        let mut batch = WriteBatch::default();
        for key in keys {
            batch.delete_cf(txs, key);
        }
        batch.put_cf(
            self.cf(cf::META)?,
            meta::TRANSACTION_COUNT,
            count.saturating_sub(removed).to_be_bytes(),
        );
        self.write_durable(batch)?;

        debug!(removed, "truncated transaction log tail");
        Ok(())
    }
}

impl QuantileStore for RocksStore {
    fn put_snapshot(&self, snapshot: &QuantileSnapshot) -> Result<()> {
        let bytes = bincode::serialize(snapshot).map_err(Error::persistence)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(cf::QUANTILE_SNAPSHOTS)?,
            snapshot.batch_id.to_be_bytes(),
            bytes,
        );
        self.write_durable(batch)
    }

    fn get_snapshot(&self, batch_id: u64) -> Result<Option<QuantileSnapshot>> {
        match self
            .db
            .get_cf(self.cf(cf::QUANTILE_SNAPSHOTS)?, batch_id.to_be_bytes())
            .map_err(Error::persistence)?
        {
            Some(bytes) => Ok(Some(Self::decode_snapshot(&bytes)?)),
            None => Ok(None),
        }
    }

    fn last_snapshot(&self) -> Result<Option<QuantileSnapshot>> {
        let snaps = self.cf(cf::QUANTILE_SNAPSHOTS)?;
        match self.db.iterator_cf(snaps, IteratorMode::End).next() {
            Some(entry) => {
                let (_, value) = entry.map_err(Error::persistence)?;
                Ok(Some(Self::decode_snapshot(&value)?))
            }
            None => Ok(None),
        }
    }

    fn snapshots_back_from_tail(&self, count: usize) -> Result<Vec<QuantileSnapshot>> {
        let snaps = self.cf(cf::QUANTILE_SNAPSHOTS)?;
        let mut result = Vec::new();
        for entry in self.db.iterator_cf(snaps, IteratorMode::End).take(count) {
            let (_, value) = entry.map_err(Error::persistence)?;
            result.push(Self::decode_snapshot(&value)?);
        }
        result.reverse();
        Ok(result)
    }

    fn remove_snapshots_ge(&self, batch_id: u64) -> Result<()> {
        let snaps = self.cf(cf::QUANTILE_SNAPSHOTS)?;
        let start_key = batch_id.to_be_bytes();

        let mut keys = Vec::new();
        for entry in self
            .db
            .iterator_cf(snaps, IteratorMode::From(&start_key, Direction::Forward))
        {
            let (key, _) = entry.map_err(Error::persistence)?;
            keys.push(key);
        }
        if keys.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::default();
        for key in keys {
            batch.delete_cf(snaps, key);
        }
        self.write_durable(batch)
    }

    fn remove_snapshots_lt(&self, batch_id: u64) -> Result<()> {
        let snaps = self.cf(cf::QUANTILE_SNAPSHOTS)?;
        let bound = batch_id.to_be_bytes();

        let mut keys = Vec::new();
        for entry in self.db.iterator_cf(snaps, IteratorMode::Start) {
            let (key, _) = entry.map_err(Error::persistence)?;
            if key.as_ref() >= &bound[..] {
                break;
            }
            keys.push(key);
        }
        if keys.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::default();
        for key in keys {
            batch.delete_cf(snaps, key);
        }
        self.write_durable(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(height: u64, index: u32) -> AnchorRecord {
        AnchorRecord {
            transaction_number: capstan_core::txnum::construct(height, index).unwrap(),
            block_height: height,
            block_hash: format!("hash_{:08x}", height),
            anchor_payload: format!("payload_{}_{}", height, index).into_bytes(),
            fee_paid: 100 * height,
        }
    }

    #[test]
    fn test_append_and_last() {
        let store = RocksStore::open_temp().unwrap();
        assert!(store.last().unwrap().is_none());

        store.append(&record(100, 0)).unwrap();
        store.append(&record(100, 3)).unwrap();
        store.append(&record(101, 1)).unwrap();

        let last = store.last().unwrap().unwrap();
        assert_eq!(last.block_height, 101);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_append_idempotent_but_conflict_rejected() {
        let store = RocksStore::open_temp().unwrap();
        let r = record(100, 0);
        store.append(&r).unwrap();

        // Same bytes: no-op, count unchanged.
        store.append(&r).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        // Same number, different content: invariant violation.
        let mut conflicting = r.clone();
        conflicting.fee_paid += 1;
        assert!(matches!(
            store.append(&conflicting),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn test_later_than_pagination() {
        let store = RocksStore::open_temp().unwrap();
        for i in 0..5u32 {
            store.append(&record(100, i)).unwrap();
        }

        let first = store.later_than(None, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].transaction_number, record(100, 0).transaction_number);

        let next = store
            .later_than(Some(first[1].transaction_number), 2)
            .unwrap();
        assert_eq!(next[0].transaction_number, record(100, 2).transaction_number);

        let rest = store
            .later_than(Some(next[1].transaction_number), 10)
            .unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_exponentially_spaced_offsets() {
        let store = RocksStore::open_temp().unwrap();
        for h in 0..20u64 {
            store.append(&record(h, 0)).unwrap();
        }

        let probes = store.exponentially_spaced().unwrap();
        // Offsets 0, 1, 2, 4, 8, 16 from the tail (height 19).
        let heights: Vec<u64> = probes.iter().map(|r| r.block_height).collect();
        assert_eq!(heights, vec![19, 18, 17, 15, 11, 3]);
    }

    #[test]
    fn test_remove_later_than() {
        let store = RocksStore::open_temp().unwrap();
        for h in 100..110u64 {
            store.append(&record(h, 0)).unwrap();
        }

        let bound = capstan_core::txnum::construct(105, 0).unwrap();
        store.remove_later_than(Some(bound)).unwrap();

        assert_eq!(store.count().unwrap(), 6);
        assert_eq!(store.last().unwrap().unwrap().block_height, 105);

        store.remove_later_than(None).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.last().unwrap().is_none());
    }

    #[test]
    fn test_quantile_snapshots() {
        let store = RocksStore::open_temp().unwrap();
        for id in 0..4u64 {
            store
                .put_snapshot(&QuantileSnapshot {
                    batch_id: id,
                    quantile_value_satoshis: id * 10,
                    frequencies: vec![(id, 1)],
                })
                .unwrap();
        }

        assert_eq!(
            store.get_snapshot(2).unwrap().unwrap().quantile_value_satoshis,
            20
        );
        assert_eq!(store.last_snapshot().unwrap().unwrap().batch_id, 3);

        let tail = store.snapshots_back_from_tail(2).unwrap();
        assert_eq!(
            tail.iter().map(|s| s.batch_id).collect::<Vec<_>>(),
            vec![2, 3]
        );

        store.remove_snapshots_ge(2).unwrap();
        assert!(store.get_snapshot(2).unwrap().is_none());
        assert_eq!(store.last_snapshot().unwrap().unwrap().batch_id, 1);

        store.remove_snapshots_lt(1).unwrap();
        assert!(store.get_snapshot(0).unwrap().is_none());
        assert!(store.get_snapshot(1).unwrap().is_some());
    }
}
