//! Tollgate facilitator HTTP server.
//!
//! ```bash
//! # Run with the default config file (config.toml in the working dir)
//! cargo run -p tollgate-facilitator --release
//!
//! # Custom config path and logging
//! CONFIG=/etc/tollgate/config.toml RUST_LOG=info cargo run -p tollgate-facilitator
//! ```
//!
//! Environment variables: `CONFIG` (config file path), `HOST`/`PORT`
//! (bind overrides), `RUST_LOG` (log filter), plus any `$VAR` references
//! the config file makes for signer keys.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use alloy_network::EthereumWallet;
use alloy_provider::ProviderBuilder;
use alloy_signer_local::PrivateKeySigner;
use alloy_transport_http::reqwest::Url;
use axum::http::Method;
use axum::{Json, Router};
use tower_http::cors;
use tracing_subscriber::EnvFilter;

use tollgate::ledger::{NonceLedger, SqliteNonceLedger};
use tollgate::settle::SettleOptions;
use tollgate::PaymentEngine;
use tollgate_evm::Eip155Adapter;

use tollgate_facilitator::config::FacilitatorConfig;
use tollgate_facilitator::handlers::{facilitator_router, FacilitatorState};

/// How often consumed nonce records are swept out of the database.
const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("facilitator failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = FacilitatorConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        nonce_db = %config.nonce_db.display(),
        chains = config.chains.len(),
        "loaded configuration"
    );
    if config.chains.is_empty() {
        tracing::warn!("no chains configured, facilitator will accept nothing");
    }

    let ledger = Arc::new(SqliteNonceLedger::open(&config.nonce_db)?);
    let ledger_dyn: Arc<dyn NonceLedger> = ledger.clone();
    let options = SettleOptions {
        finality_timeout: Duration::from_secs(config.finality_timeout_secs),
        recheck_funds: config.recheck_funds_on_settle,
    };
    let mut engine = PaymentEngine::new(ledger_dyn, options);

    for (network, chain) in &config.chains {
        let key = chain.signer_private_key.trim();
        if key.is_empty() || key.starts_with('$') {
            tracing::warn!(%network, "skipping chain: signer key not resolved");
            continue;
        }
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|e| format!("invalid signer key for {network}: {e}"))?;
        let signer_address = signer.address();
        let rpc_url: Url = chain
            .rpc_url
            .parse()
            .map_err(|e| format!("invalid RPC URL for {network}: {e}"))?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url);

        let adapter = match chain.chain_id {
            Some(chain_id) => {
                Eip155Adapter::with_chain_id(provider, signer_address, network, chain_id)
            }
            None => Eip155Adapter::new(provider, signer_address, network)?,
        };
        tracing::info!(%network, signer = %signer_address, "configured chain");
        engine.register(Arc::new(adapter));
    }

    let state: FacilitatorState = Arc::new(engine);
    spawn_purge_task(Arc::clone(&ledger), config.nonce_retention_secs);

    let app = Router::new()
        .merge(facilitator_router(Arc::clone(&state)))
        .route("/health", axum::routing::get(health))
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("facilitator listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facilitator shut down");
    Ok(())
}

/// Periodically sweeps consumed nonce records older than the retention
/// window. Reserved and pending records are never touched.
fn spawn_purge_task(ledger: Arc<SqliteNonceLedger>, retention_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match ledger.purge(retention_secs) {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "purged consumed nonce records"),
                Err(e) => tracing::warn!(error = %e, "nonce purge failed"),
            }
        }
    });
}

/// Health check endpoint.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Waits for Ctrl-C or SIGTERM to begin graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("received Ctrl-C, shutting down");
    }
}
