//! Capstan node: wires the sync engine and the read API together.
//!
//! Usage: `capstan [config.json]`

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use capstan_api::{ApiServer, ApiState};
use capstan_chain::{BitcoinCoreClient, ChainClient, RetryClient};
use capstan_core::Config;
use capstan_store::RocksStore;
use capstan_sync::SyncEngine;

fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "capstan.json".to_string());
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read config file {}: {}", path, e))?;
    let config: Config = serde_json::from_str(&raw)?;
    config.validate()?;
    info!(config = %path, "configuration loaded");
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;

    let store = Arc::new(RocksStore::open(&config.db_path)?);
    let bitcoin = BitcoinCoreClient::connect(&config.bitcoin)?;
    let client: Arc<dyn ChainClient> = Arc::new(RetryClient::new(
        bitcoin,
        Duration::from_millis(config.request_timeout_ms),
        config.request_max_retries,
    ));

    let mut engine = SyncEngine::new(
        Arc::clone(&client),
        store.clone(),
        store.clone(),
        config.clone(),
    )?;
    engine.recover().await?;
    let engine_status = engine.status_handle();

    let state = Arc::new(ApiState::new(
        client,
        store.clone(),
        store,
        engine_status,
        config.clone(),
    ));
    let server = ApiServer::new(state, config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    info!("capstan stopped");
    Ok(())
}
