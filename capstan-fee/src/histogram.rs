//! Sparse fee histograms.

use std::collections::BTreeMap;

use capstan_core::{Error, Result};

/// A sparse histogram of fees quantized to fixed-size buckets.
///
/// Bucket `b` covers fees in `[b * resolution, (b + 1) * resolution)`;
/// a bucket's representative value is its left edge, consistent with
/// the left-continuous quantile tie-break.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    buckets: BTreeMap<u64, u64>,
    total: u64,
}

impl Histogram {
    /// An empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Quantize a fee vector.
    pub fn from_fees(fees: &[u64], resolution: u64) -> Self {
        let mut histogram = Self::new();
        for &fee in fees {
            histogram.record(fee / resolution);
        }
        histogram
    }

    /// Count one occurrence of `bucket`.
    pub fn record(&mut self, bucket: u64) {
        *self.buckets.entry(bucket).or_insert(0) += 1;
        self.total += 1;
    }

    /// Total observation count.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Add another histogram's counts into this one.
    pub fn merge(&mut self, other: &Histogram) {
        for (&bucket, &count) in &other.buckets {
            *self.buckets.entry(bucket).or_insert(0) += count;
        }
        self.total += other.total;
    }

    /// Remove another histogram's counts from this one. Fails if any
    /// bucket would go negative.
    pub fn subtract(&mut self, other: &Histogram) -> Result<()> {
        for (&bucket, &count) in &other.buckets {
            let entry = self.buckets.get_mut(&bucket).ok_or_else(|| {
                Error::invariant(format!("subtracting unknown histogram bucket {}", bucket))
            })?;
            *entry = entry.checked_sub(count).ok_or_else(|| {
                Error::invariant(format!("histogram bucket {} count underflow", bucket))
            })?;
            if *entry == 0 {
                self.buckets.remove(&bucket);
            }
        }
        self.total = self.total.checked_sub(other.total).ok_or_else(|| {
            Error::invariant("histogram total underflow".to_string())
        })?;
        Ok(())
    }

    /// The `q`-quantile over the recorded multiset: the smallest bucket
    /// value whose cumulative frequency exceeds `q * total`. `None` on
    /// an empty histogram.
    pub fn quantile(&self, q: f64, resolution: u64) -> Option<u64> {
        if self.total == 0 {
            return None;
        }
        let target = q * self.total as f64;
        let mut cumulative = 0u64;
        for (&bucket, &count) in &self.buckets {
            cumulative += count;
            if cumulative as f64 > target {
                return Some(bucket * resolution);
            }
        }
        // q < 1 guarantees the loop returns; guard anyway.
        self.buckets.keys().next_back().map(|&b| b * resolution)
    }

    /// Sorted `(bucket, count)` pairs, for persistence.
    pub fn to_pairs(&self) -> Vec<(u64, u64)> {
        self.buckets.iter().map(|(&b, &c)| (b, c)).collect()
    }

    /// Rebuild from persisted pairs.
    pub fn from_pairs(pairs: &[(u64, u64)]) -> Self {
        let mut buckets = BTreeMap::new();
        let mut total = 0;
        for &(bucket, count) in pairs {
            *buckets.entry(bucket).or_insert(0) += count;
            total += count;
        }
        Self { buckets, total }
    }
}
