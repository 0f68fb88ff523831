use std::sync::Arc;

use tracing::{error, info};

use assetvault::file::gateway_from_config;
use assetvault::{start_reaper, Config, Database, PendingReaper};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    // Initialize logging
    if let Err(e) = assetvault::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        assetvault::logging::init_console_only(&config.logging.level);
    }

    info!("assetvault starting");

    let db = match Database::open(&config.database.path).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to open database {}: {}", config.database.path, e);
            std::process::exit(1);
        }
    };

    let storage = match gateway_from_config(&config.storage) {
        Ok(storage) => storage,
        Err(e) => {
            error!("Failed to set up storage: {}", e);
            std::process::exit(1);
        }
    };
    info!("Storage backend: {}", config.storage.backend);

    let reaper = if config.reaper.enabled {
        Some(start_reaper(PendingReaper::from_config(
            db.clone(),
            storage.clone(),
            &config.reaper,
        )))
    } else {
        info!("Pending upload reaper disabled");
        None
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    if let Some(reaper) = reaper {
        reaper.abort();
    }
    db.pool().close().await;
}
