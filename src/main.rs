use anyhow::Result;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod backends;
mod config;
mod logging;
mod proxy;
mod server;
mod streaming;
mod transform;
mod types;
mod usage;

use backends::{InMemoryQuota, StaticChannelCatalog, StaticTokenStore};
use config::{load_config, LoggingConfig};
use logging::TracingUsageSink;
use proxy::Gateway;
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
    let config = load_config(&config_path)?;

    init_tracing(&config.logging);
    tracing::info!(
        path = %config_path,
        channels = config.channels.len(),
        tokens = config.tokens.len(),
        "Configuration loaded"
    );
    if config.tokens.is_empty() {
        tracing::warn!("No tokens configured, all requests run as the anonymous token");
    }

    let catalog = Arc::new(StaticChannelCatalog::new(config.channels.clone()));
    let gateway = Gateway::new(
        &config,
        catalog.clone(),
        Arc::new(InMemoryQuota::new(&config.tokens)),
        catalog,
        Arc::new(TracingUsageSink),
    )?;

    let state = AppState {
        gateway: Arc::new(gateway),
        tokens: Arc::new(StaticTokenStore::new(config.tokens.clone())),
    };

    let app = server::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("llm_gateway_rust={},tower_http=info,usage=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
