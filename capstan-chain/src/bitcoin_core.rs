//! Bitcoin Core RPC client.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{BlockHash, Transaction, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use tracing::info;

use capstan_core::config::{BitcoinConfig, Network};
use capstan_core::{BlockData, BlockInfo, Error, Result, TxData, TxInput, TxOutput};

use crate::client::ChainClient;

/// [`ChainClient`] over Bitcoin Core's JSON-RPC interface.
///
/// `bitcoincore-rpc` is a blocking client; every call is moved off the
/// async runtime with `spawn_blocking`.
pub struct BitcoinCoreClient {
    client: Arc<Client>,
    network: Network,
}

fn to_rpc_network(network: Network) -> bitcoin::Network {
    match network {
        Network::Mainnet => bitcoin::Network::Bitcoin,
        Network::Testnet => bitcoin::Network::Testnet,
        Network::Signet => bitcoin::Network::Signet,
        Network::Regtest => bitcoin::Network::Regtest,
    }
}

/// Classify an RPC failure into the retryability taxonomy.
fn map_rpc_error(e: bitcoincore_rpc::Error) -> Error {
    match &e {
        bitcoincore_rpc::Error::JsonRpc(bitcoincore_rpc::jsonrpc::Error::Rpc(rpc)) => {
            // -5: unknown tx/block, -8: parameter (height) out of range.
            if rpc.code == -5 || rpc.code == -8 {
                Error::NotFound(rpc.message.clone())
            } else {
                Error::Upstream(e.to_string())
            }
        }
        bitcoincore_rpc::Error::JsonRpc(bitcoincore_rpc::jsonrpc::Error::Transport(_)) => {
            Error::UpstreamTimeout(e.to_string())
        }
        _ => Error::Upstream(e.to_string()),
    }
}

fn convert_transaction(tx: &Transaction) -> TxData {
    TxData {
        txid: tx.compute_txid().to_string(),
        is_coinbase: tx.is_coinbase(),
        inputs: tx
            .input
            .iter()
            .map(|input| TxInput {
                prev_txid: input.previous_output.txid.to_string(),
                prev_vout: input.previous_output.vout,
            })
            .collect(),
        outputs: tx
            .output
            .iter()
            .map(|output| TxOutput {
                value_satoshis: output.value.to_sat(),
                script_pubkey: output.script_pubkey.to_bytes(),
            })
            .collect(),
    }
}

impl BitcoinCoreClient {
    /// Create a client from configuration without probing the node.
    pub fn new(config: &BitcoinConfig) -> Result<Self> {
        let auth = match (&config.rpc_user, &config.rpc_password) {
            (Some(user), Some(pass)) => Auth::UserPass(user.clone(), pass.clone()),
            _ => Auth::None,
        };

        let url = if let Some(ref wallet) = config.wallet {
            format!("{}/wallet/{}", config.rpc_url, wallet)
        } else {
            config.rpc_url.clone()
        };

        let client = Client::new(&url, auth)
            .map_err(|e| Error::Config(format!("RPC connection failed: {}", e)))?;

        Ok(Self {
            client: Arc::new(client),
            network: config.network,
        })
    }

    /// Create a client and verify the node is reachable and on the
    /// configured network.
    pub fn connect(config: &BitcoinConfig) -> Result<Self> {
        let provider = Self::new(config)?;
        provider.test_connection()?;
        info!(
            network = provider.network.name(),
            url = %config.rpc_url,
            "connected to bitcoin node"
        );
        Ok(provider)
    }

    /// Verify connectivity and network match. Blocking.
    pub fn test_connection(&self) -> Result<()> {
        let blockchain_info = self
            .client
            .get_blockchain_info()
            .map_err(map_rpc_error)?;

        let expected = to_rpc_network(self.network);
        if blockchain_info.chain != expected {
            return Err(Error::Config(format!(
                "network mismatch: expected {:?}, node reports {:?}",
                expected, blockchain_info.chain
            )));
        }
        Ok(())
    }

    async fn blocking<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> std::result::Result<T, bitcoincore_rpc::Error> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || call(&client).map_err(map_rpc_error))
            .await
            .map_err(|e| Error::Upstream(format!("RPC task aborted: {}", e)))?
    }
}

#[async_trait]
impl ChainClient for BitcoinCoreClient {
    async fn tip_height(&self) -> Result<u64> {
        self.blocking(|client| client.get_block_count()).await
    }

    async fn block_hash(&self, height: u64) -> Result<String> {
        self.blocking(move |client| client.get_block_hash(height))
            .await
            .map(|hash| hash.to_string())
    }

    async fn block(&self, height: u64) -> Result<BlockData> {
        let block = self
            .blocking(move |client| {
                let hash = client.get_block_hash(height)?;
                client.get_block(&hash)
            })
            .await?;

        Ok(BlockData {
            height,
            hash: block.block_hash().to_string(),
            transactions: block.txdata.iter().map(convert_transaction).collect(),
        })
    }

    async fn raw_transaction(&self, txid: &str) -> Result<TxData> {
        let parsed = Txid::from_str(txid)
            .map_err(|e| Error::UpstreamMalformed(format!("invalid txid {}: {}", txid, e)))?;

        let tx = self
            .blocking(move |client| client.get_raw_transaction(&parsed, None))
            .await?;
        Ok(convert_transaction(&tx))
    }

    async fn block_info_by_hash(&self, hash: &str) -> Result<BlockInfo> {
        let parsed = BlockHash::from_str(hash)
            .map_err(|e| Error::BadRequest(format!("invalid block hash {}: {}", hash, e)))?;

        let header = self
            .blocking(move |client| client.get_block_header_info(&parsed))
            .await?;

        Ok(BlockInfo {
            height: header.height as u64,
            hash: header.hash.to_string(),
        })
    }
}
