mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod scheduler;
mod state;
mod store;
mod tracker;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::db::writer::MovementWriter;
use crate::error::Result;
use crate::fetcher::{OddsApiClient, OddsSource};
use crate::scheduler::IngestScheduler;
use crate::state::EventBoard;
use crate::store::{sqlite, SqliteSnapshotStore};
use crate::tracker::{LineTracker, TrackerConfig};

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
    let pool = sqlite::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let store = Arc::new(SqliteSnapshotStore::new(pool.clone()));
    let tracker = Arc::new(LineTracker::new(
        Arc::clone(&store),
        TrackerConfig {
            significant_move: cfg.significant_move,
            lookback: chrono::Duration::minutes(cfg.lookback_minutes),
            ..TrackerConfig::default()
        },
    ));

    let markets = cfg.catalog.tracked_markets();
    let market_names: Vec<&str> = markets.iter().map(|m| m.name.as_str()).collect();
    info!(
        sport = %cfg.sport,
        season = cfg.season,
        week = cfg.week,
        "Tracking {} markets ({}) across {} bookies, threshold {} pts, lookback {}m",
        markets.len(),
        market_names.join(", "),
        cfg.catalog.bookie_count(),
        cfg.significant_move,
        cfg.lookback_minutes,
    );

    if cfg.odds_api_key.is_none() {
        warn!("ODDS_API_KEY not set: provider requests will be sent unauthenticated and may be rejected");
    }

    // --- Shared state ---
    let board = EventBoard::new();
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    // --- Channels ---
    let (movement_tx, movement_rx) = mpsc::channel(CHANNEL_CAPACITY);

    // --- Spawn tasks ---

    // Movement writer: logs and persists flagged moves
    let writer = MovementWriter::new(pool.clone(), movement_rx, cfg.catalog.clone(), Arc::clone(&health));
    tokio::spawn(async move { writer.run().await });

    // Ingestion scheduler (first cycle immediately, then every UPDATE_INTERVAL_SECS)
    let source: Arc<dyn OddsSource> = Arc::new(OddsApiClient::new(&cfg)?);
    let scheduler = IngestScheduler::new(
        source,
        Arc::clone(&store),
        Arc::clone(&tracker),
        markets,
        Arc::clone(&board),
        movement_tx,
        Arc::clone(&health),
        Arc::clone(&latency),
        Duration::from_secs(cfg.update_interval_secs.max(1)),
    );
    tokio::spawn(async move { scheduler.run().await });

    // HTTP API server
    let api_state = ApiState {
        store,
        tracker,
        catalog: Arc::new(cfg.catalog.clone()),
        board,
        health,
        latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
