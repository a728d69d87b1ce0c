//! # `fluxrevenued`: A standalone Flux revenue indexer.
//!
//! Reads configuration, opens the database, and runs the sync loop until a
//! shutdown signal arrives. The store is flushed and closed on every exit
//! path.

#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![warn(clippy::cargo)]
#![allow(clippy::module_name_repetitions)]

mod logging;

use std::process::ExitCode;

use fluxrevenue::{
    config::Config, storage::stores::Sqlite, RevenueIndexer, RevenueIndexerBuilder,
};
use log::{error, info, warn};
use logging::{init_logger, set_verbosity};

#[tokio::main]
async fn main() -> ExitCode {
    init_logger();

    let config_path = Config::get_path();
    let config = match Config::read(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to read config from {}: {e}", config_path.display());
            return ExitCode::FAILURE;
        }
    };
    set_verbosity(config.logging);
    config.validate();

    let db_path = config.database.path.display().to_string();
    check_database_size(&config);
    let store = match Sqlite::new(&db_path) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open database at {db_path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Database opened at {db_path}");

    let indexer: RevenueIndexer<Sqlite> = match RevenueIndexerBuilder::from_config(&config, store)
        .build()
        .await
    {
        Ok(indexer) => indexer,
        Err(e) => {
            error!("Failed to build indexer: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Indexing revenue for {} addresses via {}",
        config.addresses.len(),
        indexer.daemon_url(),
    );

    if let Err(e) = indexer.run().await {
        error!("Failed to start sync loop: {e}");
        return ExitCode::FAILURE;
    }

    wait_for_shutdown().await;

    info!("Shutting down");
    if let Err(e) = indexer.stop().await {
        error!("Failed to stop cleanly: {e}");
        return ExitCode::FAILURE;
    }
    info!("Shutdown complete");
    ExitCode::SUCCESS
}

/// Warn when the database has outgrown its soft cap. The cap is advisory:
/// the retention sweep is what actually bounds growth.
fn check_database_size(config: &Config) {
    let Ok(metadata) = std::fs::metadata(&config.database.path) else {
        return;
    };
    let max_bytes = config.database.max_size_gb.saturating_mul(1024 * 1024 * 1024);
    if metadata.len() > max_bytes {
        warn!(
            "Database is {:.1} GB, above the configured soft cap of {} GB; consider lowering retention-days",
            metadata.len() as f64 / (1024.0 * 1024.0 * 1024.0),
            config.database.max_size_gb,
        );
    }
}

/// Completes when the process receives SIGINT or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
