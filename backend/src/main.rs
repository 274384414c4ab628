use price_board::{
    api::{self, AppState},
    config::Config,
    price_resolver::{FreshnessPolicy, PriceResolver},
    quote_store::QuoteStore,
    settings::SettingsStore,
    snapshot_aggregator::SnapshotAggregator,
    source_registry::SourceRegistry,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("🚀 Starting Price Board Service...");

    let config = Config::from_env()?;
    let pricing = &config.pricing;

    tracing::info!("📋 Seeding sources...");
    let registry = Arc::new(SourceRegistry::from_config(pricing)?);
    let quotes = Arc::new(QuoteStore::new());
    let settings = Arc::new(SettingsStore::new(pricing.refresh_intervals()));

    let resolver = PriceResolver::new(FreshnessPolicy::new(pricing.freshness_windows()));
    let aggregator = Arc::new(SnapshotAggregator::new(
        Arc::clone(&registry),
        Arc::clone(&quotes),
        Arc::clone(&settings),
        resolver,
        pricing.base_currency,
    ));

    tracing::info!("🔄 Starting snapshot refresh task...");
    let refresh = aggregator.start();

    let state = AppState::new(registry, quotes, settings, Arc::clone(&aggregator));
    let app = api::create_router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("🌐 Server listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("🛑 Shutting down...");
    refresh.stop().await;
    tracing::info!("✅ Stopped cleanly");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
