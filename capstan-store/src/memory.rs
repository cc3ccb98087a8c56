//! In-memory storage implementation for tests and development.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use capstan_core::{AnchorRecord, Error, Result};

use crate::traits::{QuantileSnapshot, QuantileStore, TransactionLog};

/// In-memory store implementing the same contracts as [`crate::RocksStore`].
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<u64, AnchorRecord>>,
    snapshots: RwLock<BTreeMap<u64, QuantileSnapshot>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionLog for MemoryStore {
    fn append(&self, record: &AnchorRecord) -> Result<()> {
        let mut records = self.records.write();
        if let Some(existing) = records.get(&record.transaction_number) {
            if existing == record {
                return Ok(());
            }
            return Err(Error::invariant(format!(
                "conflicting record for transaction number {}",
                record.transaction_number
            )));
        }
        records.insert(record.transaction_number, record.clone());
        Ok(())
    }

    fn last(&self) -> Result<Option<AnchorRecord>> {
        Ok(self.records.read().values().next_back().cloned())
    }

    fn later_than(
        &self,
        transaction_number: Option<u64>,
        limit: u32,
    ) -> Result<Vec<AnchorRecord>> {
        let records = self.records.read();
        let iter: Box<dyn Iterator<Item = &AnchorRecord>> = match transaction_number {
            None => Box::new(records.values()),
            Some(n) => Box::new(
                records
                    .range((std::ops::Bound::Excluded(n), std::ops::Bound::Unbounded))
                    .map(|(_, r)| r),
            ),
        };
        Ok(iter.take(limit as usize).cloned().collect())
    }

    fn count(&self) -> Result<u64> {
        Ok(self.records.read().len() as u64)
    }

    fn exponentially_spaced(&self) -> Result<Vec<AnchorRecord>> {
        let records = self.records.read();
        let mut probes = Vec::new();
        let mut next_offset: u64 = 0;
        for (offset, record) in records.values().rev().enumerate() {
            if offset as u64 == next_offset {
                probes.push(record.clone());
                next_offset = if next_offset == 0 { 1 } else { next_offset * 2 };
            }
        }
        Ok(probes)
    }

    fn remove_later_than(&self, transaction_number: Option<u64>) -> Result<()> {
        let mut records = self.records.write();
        match transaction_number {
            None => records.clear(),
            Some(n) => {
                records.retain(|&k, _| k <= n);
            }
        }
        Ok(())
    }
}

impl QuantileStore for MemoryStore {
    fn put_snapshot(&self, snapshot: &QuantileSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .insert(snapshot.batch_id, snapshot.clone());
        Ok(())
    }

    fn get_snapshot(&self, batch_id: u64) -> Result<Option<QuantileSnapshot>> {
        Ok(self.snapshots.read().get(&batch_id).cloned())
    }

    fn last_snapshot(&self) -> Result<Option<QuantileSnapshot>> {
        Ok(self.snapshots.read().values().next_back().cloned())
    }

    fn snapshots_back_from_tail(&self, count: usize) -> Result<Vec<QuantileSnapshot>> {
        let snapshots = self.snapshots.read();
        let mut result: Vec<_> = snapshots.values().rev().take(count).cloned().collect();
        result.reverse();
        Ok(result)
    }

    fn remove_snapshots_ge(&self, batch_id: u64) -> Result<()> {
        self.snapshots.write().retain(|&k, _| k < batch_id);
        Ok(())
    }

    fn remove_snapshots_lt(&self, batch_id: u64) -> Result<()> {
        self.snapshots.write().retain(|&k, _| k >= batch_id);
        Ok(())
    }
}
