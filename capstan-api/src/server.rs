//! API server state and lifecycle.

use std::sync::Arc;

use axum::http::header::CONTENT_TYPE;
use axum::http::Method;
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use capstan_chain::ChainClient;
use capstan_core::{txnum, Config, Error};
use capstan_fee::batch_id;
use capstan_store::{QuantileStore, TransactionLog};
use capstan_sync::{EngineState, StatusHandle};

use crate::rest::{
    ApiError, FeeResponse, StatusResponse, TimeResponse, TransactionDto, TransactionsResponse,
};

/// Shared state behind every handler. Reads go straight to the stores;
/// the sync engine is the only writer.
pub struct ApiState {
    client: Arc<dyn ChainClient>,
    log: Arc<dyn TransactionLog>,
    quantile_store: Arc<dyn QuantileStore>,
    engine_status: StatusHandle,
    config: Config,
}

impl ApiState {
    /// Create the shared state.
    pub fn new(
        client: Arc<dyn ChainClient>,
        log: Arc<dyn TransactionLog>,
        quantile_store: Arc<dyn QuantileStore>,
        engine_status: StatusHandle,
        config: Config,
    ) -> Self {
        Self {
            client,
            log,
            quantile_store,
            engine_status,
            config,
        }
    }

    /// Current tip, or the height of a specific block hash.
    pub async fn time(&self, hash: Option<&str>) -> Result<TimeResponse, ApiError> {
        match hash {
            None => {
                let time = self.client.tip_height().await?;
                let hash = self.client.block_hash(time).await?;
                Ok(TimeResponse { time, hash })
            }
            Some(hash) => {
                let info = self.client.block_info_by_hash(hash).await?;
                Ok(TimeResponse {
                    time: info.height,
                    hash: info.hash,
                })
            }
        }
    }

    /// A page of anchor records after `since`.
    ///
    /// `since` and `hash` come together or not at all; when present,
    /// the hash must still name the block `since` points into,
    /// otherwise the caller is paging from a stale fork.
    pub async fn transactions(
        &self,
        since: Option<u64>,
        hash: Option<&str>,
    ) -> Result<TransactionsResponse, ApiError> {
        let since = match (since, hash) {
            (None, None) => None,
            (Some(since), Some(hash)) => {
                let height = txnum::block_of(since);
                let on_chain = match self.client.block_hash(height).await {
                    Ok(current) => current == hash,
                    Err(Error::NotFound(_)) => false,
                    Err(e) => return Err(e.into()),
                };
                if !on_chain {
                    return Err(ApiError::BadRequest(
                        "the given transaction-time-hash is no longer on the chain".into(),
                    ));
                }
                Some(since)
            }
            _ => {
                return Err(ApiError::BadRequest(
                    "since and transaction-time-hash must be given together".into(),
                ));
            }
        };

        let page_size = self.config.transaction_fetch_page_size;
        let records = self.log.later_than(since, page_size)?;
        Ok(TransactionsResponse {
            more_transactions: records.len() as u32 == page_size,
            transactions: records.iter().map(TransactionDto::from).collect(),
        })
    }

    /// The first candidate whose `(height, hash)` still matches the
    /// upstream chain.
    pub async fn first_valid(
        &self,
        candidates: &[TransactionDto],
    ) -> Result<Option<TransactionDto>, ApiError> {
        for candidate in candidates {
            match self.client.block_hash(candidate.transaction_time).await {
                Ok(hash) if hash == candidate.transaction_time_hash => {
                    return Ok(Some(candidate.clone()));
                }
                Ok(_) | Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// The normalized fee for `block`: the sliding-window quantile of
    /// the batch `historical_offset` blocks back, scaled once at this
    /// boundary.
    ///
    /// Blocks whose lookup target predates the quantile history get the
    /// configured initial fee; targets before genesis have no answer.
    pub async fn normalized_fee(&self, block: u64) -> Result<FeeResponse, ApiError> {
        let proof_of_fee = &self.config.proof_of_fee;
        let quantile_config = &proof_of_fee.transaction_fee_quantile;

        let target = block.saturating_sub(proof_of_fee.historical_offset_in_blocks);
        let genesis = self.config.genesis_block_number;
        if target < genesis {
            return Err(ApiError::NotFound(format!(
                "no fee history for block {}",
                block
            )));
        }

        let lookback =
            quantile_config.batch_size_in_blocks * quantile_config.window_size_in_batches as u64;
        if target < genesis + lookback {
            return Ok(FeeResponse {
                normalized_transaction_fee: proof_of_fee.initial_normalized_fee_satoshis,
            });
        }

        let batch = batch_id(target, quantile_config.batch_size_in_blocks);
        let snapshot = self
            .quantile_store
            .get_snapshot(batch)
            .map_err(ApiError::from)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("no quantile snapshot yet for block {}", block))
            })?;

        let scaled =
            (snapshot.quantile_value_satoshis as f64 * proof_of_fee.quantile_scale).round();
        Ok(FeeResponse {
            normalized_transaction_fee: scaled as u64,
        })
    }

    /// Service status snapshot.
    pub fn status(&self) -> StatusResponse {
        let engine = self.engine_status.read().clone();
        let state = match engine.state {
            EngineState::Idle => "idle",
            EngineState::Syncing { .. } => "syncing",
            EngineState::Reverting => "reverting",
            EngineState::Halted => "halted",
        };
        StatusResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            network: self.config.bitcoin.network.name().to_string(),
            state: state.to_string(),
            last_seen_height: engine.last_seen.as_ref().map(|b| b.height),
            last_seen_hash: engine.last_seen.map(|b| b.hash),
        }
    }
}

/// The API server.
pub struct ApiServer {
    state: Arc<ApiState>,
    config: Config,
}

impl ApiServer {
    /// Create a server over shared state.
    pub fn new(state: Arc<ApiState>, config: Config) -> Self {
        Self { state, config }
    }

    /// Build the router with middleware.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([CONTENT_TYPE]);

        let middleware = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors);

        crate::rest::create_router()
            .layer(middleware)
            .with_state(Arc::clone(&self.state))
    }

    /// Bind and serve until the process exits.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let router = self.router();
        let listener = TcpListener::bind(&self.config.api_listen_addr).await?;
        info!("API server listening on {}", self.config.api_listen_addr);
        axum::serve(listener, router).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;

    use capstan_chain::MockChain;
    use capstan_core::{AnchorRecord, BlockData};
    use capstan_store::{MemoryStore, QuantileSnapshot};
    use capstan_sync::SyncStatus;

    fn record(height: u64, index: u32, payload: &str) -> AnchorRecord {
        AnchorRecord {
            transaction_number: txnum::construct(height, index).unwrap(),
            block_height: height,
            block_hash: format!("hash_{}", height),
            anchor_payload: payload.as_bytes().to_vec(),
            fee_paid: 10,
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default().with_genesis(100);
        config.transaction_fetch_page_size = 2;
        config.proof_of_fee.historical_offset_in_blocks = 1;
        config.proof_of_fee.quantile_scale = 2.0;
        config.proof_of_fee.initial_normalized_fee_satoshis = 500;
        config.proof_of_fee.transaction_fee_quantile.batch_size_in_blocks = 4;
        config.proof_of_fee.transaction_fee_quantile.window_size_in_batches = 2;
        config
    }

    fn make_state(chain: Arc<MockChain>, store: Arc<MemoryStore>) -> ApiState {
        let status = Arc::new(RwLock::new(SyncStatus::default()));
        ApiState::new(chain, store.clone(), store, status, test_config())
    }

    fn staged_chain() -> Arc<MockChain> {
        let chain = Arc::new(MockChain::new());
        for height in 100..=120 {
            chain.add_block(BlockData {
                height,
                hash: format!("hash_{}", height),
                transactions: vec![],
            });
        }
        chain
    }

    #[tokio::test]
    async fn test_time_returns_tip() {
        let state = make_state(staged_chain(), Arc::new(MemoryStore::new()));
        let time = state.time(None).await.unwrap();
        assert_eq!(time.time, 120);
        assert_eq!(time.hash, "hash_120");
    }

    #[tokio::test]
    async fn test_time_by_hash() {
        let state = make_state(staged_chain(), Arc::new(MemoryStore::new()));
        let time = state.time(Some("hash_105")).await.unwrap();
        assert_eq!(time.time, 105);
    }

    #[tokio::test]
    async fn test_transactions_pagination() {
        let store = Arc::new(MemoryStore::new());
        for (height, index, payload) in [
            (101u64, 0u32, "r1"),
            (101, 1, "r2"),
            (102, 0, "r3"),
            (103, 0, "r4"),
            (104, 0, "r5"),
        ] {
            store.append(&record(height, index, payload)).unwrap();
        }
        let state = make_state(staged_chain(), store);

        // Page 1: two records, more to come.
        let page1 = state.transactions(None, None).await.unwrap();
        assert!(page1.more_transactions);
        assert_eq!(page1.transactions.len(), 2);
        assert_eq!(page1.transactions[0].anchor_string, "r1");

        // Page 2 resumes after page 1's tail.
        let tail = &page1.transactions[1];
        let page2 = state
            .transactions(Some(tail.transaction_number), Some(&tail.transaction_time_hash))
            .await
            .unwrap();
        assert!(page2.more_transactions);
        assert_eq!(page2.transactions[0].anchor_string, "r3");

        // Final page is short.
        let tail = &page2.transactions[1];
        let page3 = state
            .transactions(Some(tail.transaction_number), Some(&tail.transaction_time_hash))
            .await
            .unwrap();
        assert!(!page3.more_transactions);
        assert_eq!(page3.transactions.len(), 1);
        assert_eq!(page3.transactions[0].anchor_string, "r5");
    }

    #[tokio::test]
    async fn test_transactions_requires_both_or_neither() {
        let state = make_state(staged_chain(), Arc::new(MemoryStore::new()));
        assert!(matches!(
            state.transactions(Some(5), None).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            state.transactions(None, Some("hash_101")).await,
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_transactions_rejects_stale_hash() {
        let store = Arc::new(MemoryStore::new());
        store.append(&record(101, 0, "r1")).unwrap();
        let state = make_state(staged_chain(), store);

        let since = txnum::construct(101, 0).unwrap();
        let result = state.transactions(Some(since), Some("hash_of_a_lost_fork")).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_first_valid_picks_surviving_record() {
        let state = make_state(staged_chain(), Arc::new(MemoryStore::new()));

        let stale = TransactionDto {
            transaction_number: txnum::construct(110, 0).unwrap(),
            transaction_time: 110,
            transaction_time_hash: "hash_of_a_lost_fork".into(),
            anchor_string: "stale".into(),
            fee_paid: 1,
        };
        let valid = TransactionDto {
            transaction_number: txnum::construct(105, 0).unwrap(),
            transaction_time: 105,
            transaction_time_hash: "hash_105".into(),
            anchor_string: "valid".into(),
            fee_paid: 1,
        };

        let found = state
            .first_valid(&[stale.clone(), valid.clone()])
            .await
            .unwrap();
        assert_eq!(found, Some(valid));

        let none = state.first_valid(&[stale]).await.unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn test_fee_before_genesis_has_no_answer() {
        let state = make_state(staged_chain(), Arc::new(MemoryStore::new()));
        // Target (block - offset) falls before genesis.
        assert!(matches!(
            state.normalized_fee(100).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fee_within_lookback_uses_initial_fee() {
        let state = make_state(staged_chain(), Arc::new(MemoryStore::new()));
        // Lookback is 2 batches * 4 blocks; targets below genesis + 8
        // get the configured initial fee.
        let fee = state.normalized_fee(105).await.unwrap();
        assert_eq!(fee.normalized_transaction_fee, 500);
    }

    #[tokio::test]
    async fn test_fee_reads_snapshot_and_scales() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_snapshot(&QuantileSnapshot {
                batch_id: 27,
                quantile_value_satoshis: 100,
                frequencies: vec![(100, 3)],
            })
            .unwrap();
        let state = make_state(staged_chain(), store);

        // Block 112 -> target 111 -> batch 27; scale 2.0 applies once.
        let fee = state.normalized_fee(112).await.unwrap();
        assert_eq!(fee.normalized_transaction_fee, 200);

        // A block whose batch has no snapshot yet is a 404.
        assert!(matches!(
            state.normalized_fee(117).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_reports_engine_view() {
        let state = make_state(staged_chain(), Arc::new(MemoryStore::new()));
        let status = state.status();
        assert_eq!(status.state, "idle");
        assert_eq!(status.network, "mainnet");
        assert!(status.last_seen_height.is_none());
    }

    #[test]
    fn test_router_builds() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(make_state(chain, store));
        let server = ApiServer::new(state, test_config());
        let _router = server.router();
    }
}
