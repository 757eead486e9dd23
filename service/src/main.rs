//! Astro Ledger Service - HTTP API for entitlements and usage credits.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use astro_ledger_service::{create_router, AppState, ServiceConfig};
use astro_ledger_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,astro_ledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Astro Ledger Service");

    let config = ServiceConfig::from_env();
    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        auth_base_url = %config.auth_base_url,
        webhook_configured = config.payment_webhook_secret.is_some(),
        policy_file = ?config.policy_file,
        "Service configuration loaded"
    );

    let policies = config.load_policies()?;
    tracing::info!(features = policies.len(), "Feature policies loaded");

    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    let store = Arc::new(
        RocksStore::open(&config.data_dir)?.with_max_commit_attempts(config.max_commit_attempts),
    );

    let listen_addr = config.listen_addr.clone();
    let app = create_router(AppState::new(store, policies, config));

    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
