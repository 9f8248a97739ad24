mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod filter;
mod scan;
mod types;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::db::writer::DecisionWriter;
use crate::error::Result;
use crate::fetcher::KeepaClient;
use crate::scan::run_scan;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Decision log ready at {}", cfg.db_path);

    let health = Arc::new(HealthState::new());
    let keepa = Arc::new(KeepaClient::new(&cfg, Arc::clone(&health))?);

    // --- Decision log writer ---
    let (log_tx, log_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let writer = DecisionWriter::new(pool.clone(), log_rx, Arc::clone(&health));
    tokio::spawn(async move { writer.run().await });

    let api_state = ApiState {
        pool: pool.clone(),
        keepa: Arc::clone(&keepa),
        health: Arc::clone(&health),
        log_tx,
        default_mode: cfg.default_mode,
    };

    // --- Startup scan ---
    if cfg.scan_asins.is_empty() {
        info!("SCAN_ASINS not set, skipping startup scan");
    } else {
        info!(
            "Startup scan: {} ASINs (mode={}, lookback={}d, operator={})",
            cfg.scan_asins.len(),
            cfg.default_mode,
            cfg.history_lookback_days,
            cfg.operator_seller_id,
        );
        match run_scan(&keepa, &health, &cfg.scan_asins, cfg.default_mode).await {
            Ok(scan) => {
                scan.log_summary();
                api_state.queue_run(scan.to_log_event());
            }
            // A failed scan leaves the API usable.
            Err(e) => warn!("Startup scan failed: {e}"),
        }
    }

    // --- HTTP API server ---
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
