//! Capstan configuration.
//!
//! The whole tree is plain serde data so the node binary can load it
//! from a JSON file; libraries receive it by value at construction.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Bitcoin network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Bitcoin mainnet.
    #[default]
    Mainnet,
    /// Bitcoin testnet.
    Testnet,
    /// Bitcoin signet.
    Signet,
    /// Bitcoin regtest (local development).
    Regtest,
}

impl Network {
    /// Get the network name.
    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
        }
    }
}

/// Connection settings for the upstream Bitcoin Core node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinConfig {
    /// RPC endpoint URL.
    pub rpc_url: String,
    /// RPC username (optional).
    pub rpc_user: Option<String>,
    /// RPC password (optional).
    pub rpc_password: Option<String>,
    /// Bitcoin network.
    pub network: Network,
    /// Wallet name (optional, for multi-wallet nodes).
    pub wallet: Option<String>,
}

impl BitcoinConfig {
    /// Create a new configuration.
    pub fn new(rpc_url: impl Into<String>, network: Network) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            rpc_user: None,
            rpc_password: None,
            network,
            wallet: None,
        }
    }

    /// Create configuration for regtest.
    pub fn regtest(rpc_url: impl Into<String>) -> Self {
        Self::new(rpc_url, Network::Regtest)
    }

    /// Set RPC authentication.
    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.rpc_user = Some(user.into());
        self.rpc_password = Some(password.into());
        self
    }

    /// Set wallet name.
    pub fn with_wallet(mut self, wallet: impl Into<String>) -> Self {
        self.wallet = Some(wallet.into());
        self
    }
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8332", Network::Mainnet)
    }
}

/// Sliding-window quantile parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantileWindowConfig {
    /// Blocks per batch.
    pub batch_size_in_blocks: u64,
    /// Batches kept in the sliding window.
    pub window_size_in_batches: usize,
    /// Reservoir capacity per batch.
    pub sample_size: usize,
    /// Quantile to compute, in (0, 1).
    pub quantile: f64,
    /// Histogram resolution: satoshis per bucket.
    pub fee_approximation_satoshis: u64,
}

impl Default for QuantileWindowConfig {
    fn default() -> Self {
        Self {
            batch_size_in_blocks: 100,
            window_size_in_batches: 100,
            sample_size: 100,
            quantile: 0.5,
            fee_approximation_satoshis: 1,
        }
    }
}

/// Proof-of-fee parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofOfFeeConfig {
    /// How far behind the queried block the fee lookup reaches.
    pub historical_offset_in_blocks: u64,
    /// Multiplier applied to the quantile at the read boundary.
    pub quantile_scale: f64,
    /// Fee reported for blocks earlier than the quantile history.
    pub initial_normalized_fee_satoshis: u64,
    /// Sliding-window quantile parameters.
    pub transaction_fee_quantile: QuantileWindowConfig,
}

impl Default for ProofOfFeeConfig {
    fn default() -> Self {
        Self {
            historical_offset_in_blocks: 1,
            quantile_scale: 1.0,
            initial_normalized_fee_satoshis: 10_000,
            transaction_fee_quantile: QuantileWindowConfig::default(),
        }
    }
}

/// Top-level Capstan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upstream node connection.
    pub bitcoin: BitcoinConfig,
    /// Anchor marker written before every payload, e.g. `"sidetree:"`.
    pub anchor_prefix: String,
    /// First block to scan.
    pub genesis_block_number: u64,
    /// Cap on records returned per `transactions` page.
    pub transaction_fetch_page_size: u32,
    /// Per-attempt upstream timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Maximum upstream retries after the first attempt.
    pub request_max_retries: u32,
    /// Seconds between sync ticks.
    pub transaction_poll_period_seconds: u64,
    /// Transactions with more inputs than this are excluded from fee
    /// sampling (their fee costs O(inputs) upstream calls to compute).
    pub max_transaction_input_count: usize,
    /// Proof-of-fee parameters.
    pub proof_of_fee: ProofOfFeeConfig,
    /// Where the transaction log and quantile snapshots live.
    pub db_path: PathBuf,
    /// Address the read API listens on.
    pub api_listen_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bitcoin: BitcoinConfig::default(),
            anchor_prefix: "sidetree:".to_string(),
            genesis_block_number: 0,
            transaction_fetch_page_size: 100,
            request_timeout_ms: 30_000,
            request_max_retries: 3,
            transaction_poll_period_seconds: 60,
            max_transaction_input_count: 50,
            proof_of_fee: ProofOfFeeConfig::default(),
            db_path: PathBuf::from("./capstan-db"),
            api_listen_addr: "0.0.0.0:3009".parse().expect("valid literal addr"),
        }
    }
}

impl Config {
    /// Set the anchor prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.anchor_prefix = prefix.into();
        self
    }

    /// Set the first block to scan.
    pub fn with_genesis(mut self, height: u64) -> Self {
        self.genesis_block_number = height;
        self
    }

    /// Set the poll period.
    pub fn with_poll_period(mut self, seconds: u64) -> Self {
        self.transaction_poll_period_seconds = seconds;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.bitcoin.rpc_url.is_empty() {
            return Err(Error::Config("bitcoin.rpc_url is required".into()));
        }
        if self.anchor_prefix.is_empty() {
            return Err(Error::Config("anchor_prefix must not be empty".into()));
        }
        if self.transaction_fetch_page_size == 0 {
            return Err(Error::Config(
                "transaction_fetch_page_size must be positive".into(),
            ));
        }
        let q = &self.proof_of_fee.transaction_fee_quantile;
        if q.batch_size_in_blocks == 0 {
            return Err(Error::Config("batch_size_in_blocks must be positive".into()));
        }
        if q.window_size_in_batches == 0 {
            return Err(Error::Config(
                "window_size_in_batches must be positive".into(),
            ));
        }
        if q.sample_size == 0 {
            return Err(Error::Config("sample_size must be positive".into()));
        }
        if !(q.quantile > 0.0 && q.quantile < 1.0) {
            return Err(Error::Config("quantile must lie in (0, 1)".into()));
        }
        if q.fee_approximation_satoshis == 0 {
            return Err(Error::Config(
                "fee_approximation_satoshis must be positive".into(),
            ));
        }
        if self.proof_of_fee.quantile_scale <= 0.0 {
            return Err(Error::Config("quantile_scale must be positive".into()));
        }
        Ok(())
    }
}
