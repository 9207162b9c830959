//! Latchkey probe binary
//!
//! Loads the key/value capability for a configured document locator, waits
//! for the first successful discovery, lists the entries and exits.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use latchkey::{Config, KeyValueLoader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let config = Config::parse();

    let log_level = config.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("latchkey={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Latchkey - key/value capability loader");
    info!("======================================");
    info!("Document: {}", config.document_url);
    info!("Resolution base: {}", config.resolution_base()?);
    info!("Gateway URL: {}", config.gateway_url);
    info!("Session timeout: {}ms", config.session_timeout_ms);
    info!("======================================");

    let loader = KeyValueLoader::load(&config).await?;

    info!("Waiting for key-value capability...");
    let key_value = loader.key_value().await;

    let entries = key_value.entries().await;
    info!("Capability ready, {} entries", entries.len());
    for (key, value) in entries {
        info!("  {} = {}", key, value);
    }

    Ok(())
}
