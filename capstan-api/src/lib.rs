//! Read-side HTTP facade for Capstan.
//!
//! Endpoints:
//! - GET  /v1/time                      - current tip
//! - GET  /v1/time/{hash}               - resolve a block hash
//! - GET  /v1/transactions              - page through anchor records
//! - POST /v1/transactions/first-valid  - first record still on-chain
//! - GET  /v1/fee/{block}               - normalized fee for a block
//! - GET  /v1/status                    - service status
//!
//! Handlers share only read-committed views of the transaction log and
//! the quantile snapshots; the sync engine is the sole writer.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod rest;
mod server;

pub use rest::{
    ApiError, FeeResponse, FirstValidRequest, StatusResponse, TimeResponse, TransactionDto,
    TransactionsQuery, TransactionsResponse,
};
pub use server::{ApiServer, ApiState};
