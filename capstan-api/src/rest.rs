//! REST endpoints and wire types.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::error;

use capstan_core::AnchorRecord;

use crate::server::ApiState;

/// REST API error response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// 400.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// 500. Internal details are logged, not returned.
    #[error("internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<capstan_core::Error> for ApiError {
    fn from(e: capstan_core::Error) -> Self {
        match e {
            capstan_core::Error::BadRequest(msg) => ApiError::BadRequest(msg),
            capstan_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            other => {
                error!(error = %other, "query failed");
                ApiError::Internal
            }
        }
    }
}

/// Response for time queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeResponse {
    /// Block height (the chain's clock).
    pub time: u64,
    /// Block hash.
    pub hash: String,
}

/// One anchor record on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDto {
    /// Composite order key.
    pub transaction_number: u64,
    /// Block height of the carrying block.
    pub transaction_time: u64,
    /// Block hash of the carrying block.
    pub transaction_time_hash: String,
    /// The anchor payload.
    pub anchor_string: String,
    /// Fee paid by the carrying transaction, in satoshis.
    pub fee_paid: u64,
}

impl From<&AnchorRecord> for TransactionDto {
    fn from(record: &AnchorRecord) -> Self {
        Self {
            transaction_number: record.transaction_number,
            transaction_time: record.block_height,
            transaction_time_hash: record.block_hash.clone(),
            anchor_string: String::from_utf8_lossy(&record.anchor_payload).into_owned(),
            fee_paid: record.fee_paid,
        }
    }
}

/// Query parameters for listing transactions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionsQuery {
    /// Resume after this transaction number.
    pub since: Option<u64>,
    /// Hash of the block `since` points into, proving the caller's
    /// view is still on-chain.
    #[serde(rename = "transaction-time-hash")]
    pub transaction_time_hash: Option<String>,
}

/// Response for transaction listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsResponse {
    /// Whether another page exists.
    pub more_transactions: bool,
    /// The page of records.
    pub transactions: Vec<TransactionDto>,
}

/// Request body for the first-valid probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirstValidRequest {
    /// Candidate records, newest first by convention.
    pub transactions: Vec<TransactionDto>,
}

/// Response for fee queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeResponse {
    /// The spam-resistance gate value for the queried block.
    pub normalized_transaction_fee: u64,
}

/// Service status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Crate version.
    pub version: String,
    /// Configured network name.
    pub network: String,
    /// Engine lifecycle state.
    pub state: String,
    /// Height of the newest fully processed block, if any.
    pub last_seen_height: Option<u64>,
    /// Hash of the newest fully processed block, if any.
    pub last_seen_hash: Option<String>,
}

/// Build the router for all read endpoints.
pub fn create_router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/v1/time", get(time))
        .route("/v1/time/{hash}", get(time_by_hash))
        .route("/v1/transactions", get(transactions))
        .route("/v1/transactions/first-valid", post(first_valid))
        .route("/v1/fee/{block}", get(fee))
        .route("/v1/status", get(status))
}

/// GET /v1/time - current tip.
async fn time(State(state): State<Arc<ApiState>>) -> Result<Json<TimeResponse>, ApiError> {
    Ok(Json(state.time(None).await?))
}

/// GET /v1/time/{hash} - resolve a block hash upstream.
async fn time_by_hash(
    State(state): State<Arc<ApiState>>,
    Path(hash): Path<String>,
) -> Result<Json<TimeResponse>, ApiError> {
    Ok(Json(state.time(Some(&hash)).await?))
}

/// GET /v1/transactions - page through the anchor log.
async fn transactions(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    Ok(Json(
        state
            .transactions(query.since, query.transaction_time_hash.as_deref())
            .await?,
    ))
}

/// POST /v1/transactions/first-valid - first candidate still on-chain.
async fn first_valid(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<FirstValidRequest>,
) -> Result<Json<TransactionDto>, ApiError> {
    state
        .first_valid(&request.transactions)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no candidate is on the current chain".into()))
}

/// GET /v1/fee/{block} - normalized fee.
async fn fee(
    State(state): State<Arc<ApiState>>,
    Path(block): Path<u64>,
) -> Result<Json<FeeResponse>, ApiError> {
    Ok(Json(state.normalized_fee(block).await?))
}

/// GET /v1/status - service status.
async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(state.status())
}
