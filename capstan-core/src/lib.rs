//! Capstan Core - fundamental types for the Capstan anchor indexer.
//!
//! This crate provides the building blocks shared by every other
//! Capstan crate:
//!
//! - [`error`] - The workspace-wide error taxonomy
//! - [`txnum`] - The composite 64-bit transaction order key
//! - [`types`] - The abstract chain data model and anchor records
//! - [`config`] - The full configuration tree
//!
//! # Example
//!
//! ```rust
//! use capstan_core::txnum;
//!
//! // An anchor found at index 2 of block 101.
//! let number = txnum::construct(101, 2).unwrap();
//! assert_eq!(txnum::block_of(number), 101);
//! assert_eq!(txnum::index_of(number), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod txnum;
pub mod types;

pub use config::{BitcoinConfig, Config, Network, ProofOfFeeConfig, QuantileWindowConfig};
pub use error::{Error, Result};
pub use types::{AnchorRecord, BlockData, BlockInfo, TxData, TxInput, TxOutput};
