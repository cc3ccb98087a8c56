//! Proof-of-fee engine for Capstan.
//!
//! Downstream consumers use a *normalized fee* per block as a
//! spam-resistance gate. This crate produces it:
//!
//! - [`ReservoirSampler`] keeps a fixed-size uniform sample of
//!   non-anchor transactions per batch, seeded deterministically from
//!   block hashes so any observer can reproduce the sample.
//! - [`QuantileCalculator`] maintains a sliding window of per-batch fee
//!   histograms and persists one quantile snapshot per batch, in
//!   lock-step with the transaction log so rollback can truncate both.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod batch;
mod histogram;
mod quantile;
mod rng;
mod sampler;

pub use batch::{batch_id, batch_start, is_batch_boundary};
pub use histogram::Histogram;
pub use quantile::QuantileCalculator;
pub use rng::DeterministicRng;
pub use sampler::ReservoirSampler;
