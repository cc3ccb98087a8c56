//! The Capstan sync engine.
//!
//! Keeps a local projection of the anchor log consistent with an
//! authoritative but reorg-prone upstream chain:
//!
//! - [`extract_anchors`] pulls prefixed OP_RETURN anchors out of a
//!   block (pure, deterministic).
//! - [`transaction_fee`] computes a transaction's fee from its inputs'
//!   previous outputs.
//! - [`SyncEngine`] owns the poll loop: process new blocks forward,
//!   detect forks against the cached view, roll the transaction log
//!   and the quantile state back in lock-step, resume.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod engine;
mod extractor;
mod fees;

pub use engine::{EngineState, StatusHandle, SyncEngine, SyncStatus};
pub use extractor::{extract_anchors, ExtractedAnchor, Extraction};
pub use fees::transaction_fee;
