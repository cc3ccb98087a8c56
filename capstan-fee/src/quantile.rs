//! Sliding-window quantile maintenance.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use capstan_core::config::QuantileWindowConfig;
use capstan_core::{Error, Result};
use capstan_store::{QuantileSnapshot, QuantileStore};

use crate::histogram::Histogram;

/// Maintains the last `window_size_in_batches` batch histograms and a
/// rolling sum over them, persisting one snapshot per batch.
///
/// Batches must arrive in order: each `add` carries `last_batch_id + 1`
/// (replaying the last batch with identical fees is a no-op, so a crash
/// between persisting a snapshot and advancing the sync cursor is
/// harmless). Rollback truncates the snapshot tail and rebuilds the
/// in-memory window from what remains.
pub struct QuantileCalculator {
    store: Arc<dyn QuantileStore>,
    config: QuantileWindowConfig,
    window: VecDeque<(u64, Histogram)>,
    rolling: Histogram,
}

impl QuantileCalculator {
    /// Open a calculator over a snapshot store, rebuilding the window
    /// from persisted state.
    pub fn open(store: Arc<dyn QuantileStore>, config: QuantileWindowConfig) -> Result<Self> {
        let mut calculator = Self {
            store,
            config,
            window: VecDeque::new(),
            rolling: Histogram::new(),
        };
        calculator.reload()?;
        Ok(calculator)
    }

    /// The most recently added batch id, if any.
    pub fn last_batch_id(&self) -> Option<u64> {
        self.window.back().map(|(id, _)| *id)
    }

    /// Ingest one batch of sampled fees and persist its snapshot.
    pub fn add(&mut self, batch_id: u64, fees: &[u64]) -> Result<()> {
        let histogram = Histogram::from_fees(fees, self.config.fee_approximation_satoshis);

        match self.last_batch_id() {
            Some(last) if batch_id == last => {
                // Crash replay: accept iff the recomputed histogram
                // matches what we already persisted.
                let stored = self.store.get_snapshot(batch_id)?.ok_or_else(|| {
                    Error::invariant(format!("window holds batch {} but store does not", batch_id))
                })?;
                if stored.frequencies == histogram.to_pairs() {
                    debug!(batch_id, "batch already processed, add is a no-op");
                    return Ok(());
                }
                return Err(Error::invariant(format!(
                    "batch {} re-added with different fees",
                    batch_id
                )));
            }
            Some(last) if batch_id != last + 1 => {
                return Err(Error::invariant(format!(
                    "batch {} out of sequence, expected {}",
                    batch_id,
                    last + 1
                )));
            }
            _ => {}
        }

        self.window.push_back((batch_id, histogram.clone()));
        self.rolling.merge(&histogram);
        let mut evicted_head = None;
        if self.window.len() > self.config.window_size_in_batches {
            if let Some((evicted_id, evicted)) = self.window.pop_front() {
                self.rolling.subtract(&evicted)?;
                evicted_head = Some(evicted_id);
            }
        }

        let quantile_value_satoshis = self
            .rolling
            .quantile(self.config.quantile, self.config.fee_approximation_satoshis)
            .unwrap_or(0);

        let snapshot = QuantileSnapshot {
            batch_id,
            quantile_value_satoshis,
            frequencies: histogram.to_pairs(),
        };
        if let Err(e) = self.store.put_snapshot(&snapshot) {
            // Leave memory matching the store so a retried add is clean.
            warn!(batch_id, error = %e, "snapshot persist failed, reloading window");
            self.reload()?;
            return Err(e);
        }
        if let Some(evicted_id) = evicted_head {
            // Persisted snapshots mirror the window: evict the head too.
            self.store.remove_snapshots_lt(evicted_id + 1)?;
            debug!(batch_id = evicted_id, "evicted batch from quantile window");
        }

        debug!(
            batch_id,
            quantile_value_satoshis,
            samples = fees.len(),
            "persisted quantile snapshot"
        );
        Ok(())
    }

    /// The persisted quantile value for `batch_id`, if present.
    pub fn quantile(&self, batch_id: u64) -> Result<Option<u64>> {
        Ok(self
            .store
            .get_snapshot(batch_id)?
            .map(|s| s.quantile_value_satoshis))
    }

    /// Drop all snapshots with id >= `batch_id` and rebuild the window
    /// from the remainder. Invoked by rollback.
    pub fn remove_batches_ge(&mut self, batch_id: u64) -> Result<()> {
        self.store.remove_snapshots_ge(batch_id)?;
        self.reload()
    }

    fn reload(&mut self) -> Result<()> {
        let snapshots = self
            .store
            .snapshots_back_from_tail(self.config.window_size_in_batches)?;

        for pair in snapshots.windows(2) {
            if pair[1].batch_id != pair[0].batch_id + 1 {
                return Err(Error::invariant(format!(
                    "quantile snapshots not contiguous: {} then {}",
                    pair[0].batch_id, pair[1].batch_id
                )));
            }
        }

        self.window.clear();
        self.rolling = Histogram::new();
        for snapshot in snapshots {
            let histogram = Histogram::from_pairs(&snapshot.frequencies);
            self.rolling.merge(&histogram);
            self.window.push_back((snapshot.batch_id, histogram));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_store::MemoryStore;

    fn config(window: usize) -> QuantileWindowConfig {
        QuantileWindowConfig {
            batch_size_in_blocks: 4,
            window_size_in_batches: window,
            sample_size: 3,
            quantile: 0.5,
            fee_approximation_satoshis: 1,
        }
    }

    fn calculator(window: usize) -> (Arc<MemoryStore>, QuantileCalculator) {
        let store = Arc::new(MemoryStore::new());
        let calc = QuantileCalculator::open(store.clone(), config(window)).unwrap();
        (store, calc)
    }

    #[test]
    fn test_single_batch_median() {
        let (_, mut calc) = calculator(2);
        calc.add(0, &[10, 20, 30]).unwrap();
        assert_eq!(calc.quantile(0).unwrap(), Some(20));
    }

    #[test]
    fn test_window_accumulates() {
        let (_, mut calc) = calculator(2);
        calc.add(0, &[10, 20, 30]).unwrap();
        calc.add(1, &[100, 200, 300]).unwrap();
        // Window multiset {10,20,30,100,200,300}: smallest value with
        // cumulative count exceeding 3 is 100.
        assert_eq!(calc.quantile(1).unwrap(), Some(100));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let (_, mut calc) = calculator(2);
        calc.add(0, &[1, 1, 1]).unwrap();
        calc.add(1, &[100, 200, 300]).unwrap();
        calc.add(2, &[100, 200, 300]).unwrap();
        // Batch 0 evicted; window is six values from {100,200,300}.
        assert_eq!(calc.quantile(2).unwrap(), Some(200));
    }

    #[test]
    fn test_out_of_sequence_rejected() {
        let (_, mut calc) = calculator(2);
        calc.add(0, &[1]).unwrap();
        assert!(matches!(calc.add(2, &[1]), Err(Error::Invariant(_))));
    }

    #[test]
    fn test_replay_is_noop_only_for_same_fees() {
        let (_, mut calc) = calculator(2);
        calc.add(0, &[10, 20]).unwrap();
        calc.add(0, &[10, 20]).unwrap();
        assert!(matches!(calc.add(0, &[10, 30]), Err(Error::Invariant(_))));
        assert_eq!(calc.last_batch_id(), Some(0));
    }

    #[test]
    fn test_remove_batches_ge_rebuilds() {
        let (_, mut calc) = calculator(3);
        calc.add(0, &[10, 20, 30]).unwrap();
        calc.add(1, &[100, 200, 300]).unwrap();
        calc.add(2, &[1000, 2000, 3000]).unwrap();

        calc.remove_batches_ge(1).unwrap();
        assert_eq!(calc.last_batch_id(), Some(0));
        assert_eq!(calc.quantile(1).unwrap(), None);
        assert_eq!(calc.quantile(2).unwrap(), None);

        // Re-adding batch 1 continues the sequence cleanly.
        calc.add(1, &[40, 50, 60]).unwrap();
        assert_eq!(calc.quantile(1).unwrap(), Some(40));
    }

    #[test]
    fn test_reopen_restores_window() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut calc = QuantileCalculator::open(store.clone(), config(2)).unwrap();
            calc.add(0, &[10, 20, 30]).unwrap();
            calc.add(1, &[100, 200, 300]).unwrap();
        }
        let mut calc = QuantileCalculator::open(store.clone(), config(2)).unwrap();
        assert_eq!(calc.last_batch_id(), Some(1));
        calc.add(2, &[100, 200, 300]).unwrap();
        // Batch 0 evicted on this add, same as an unbroken run.
        assert_eq!(calc.quantile(2).unwrap(), Some(200));
    }

    #[test]
    fn test_snapshot_sequence_stays_contiguous_and_bounded() {
        let (store, mut calc) = calculator(2);
        for id in 0..5u64 {
            calc.add(id, &[id * 10 + 1]).unwrap();
        }
        // Persisted snapshots mirror the window: contiguous, length <= 2.
        let remaining: Vec<u64> = (0..5)
            .filter_map(|id| store.get_snapshot(id).unwrap())
            .map(|s| s.batch_id)
            .collect();
        assert_eq!(remaining, vec![3, 4]);
        assert_eq!(calc.window.len(), 2);
    }
}
