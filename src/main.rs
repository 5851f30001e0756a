//! Spendbook - expense tracking backend

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spendbook::{config::Args, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("spendbook={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config = args.connection_config();

    info!("======================================");
    info!("  Spendbook - expense tracking API");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db '{}')", config.redacted_uri(), config.db_name);
    info!(
        "MongoDB limits: pool {}, connect {}ms, operation {}ms, family {:?}",
        config.pool_size_max,
        config.server_selection_timeout_ms,
        config.socket_timeout_ms,
        config.address_family
    );
    info!("======================================");

    // The store is connected lazily by the first request that needs it
    let state = Arc::new(AppState::new(args)?);

    server::run(state).await?;

    Ok(())
}
