//! Position Monitor - watches open positions and fires reversing exits.
//!
//! Once an entry trade has landed, this service:
//! 1. Tracks the position in a concurrency-safe registry
//! 2. Polls the price oracle on a fixed tick and re-arms trailing stops
//! 3. Fires the reversing trade when the first exit condition triggers
//!    (deadline, trailing stop, stop loss, TP2, TP1 - in that order)
//! 4. Adopts positions written to the store by any other path on a
//!    reconciliation tick (crash recovery, peer instances, direct inserts)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, Database};

use position_monitor::engine::{MonitorEngine, MonitorSettings};
use position_monitor::oracle::HttpPriceOracle;
use position_monitor::store::PgPositionStore;
use position_monitor::swap::{DryRunSwapExecutor, HttpSwapExecutor, SwapExecutor};

/// Position monitor - automated exit management for open positions
#[derive(Parser, Debug)]
#[command(name = "position-monitor")]
#[command(about = "Watches open positions and fires reversing exits")]
struct Args {
    /// Dry run mode (exits are simulated, not sent to the executor)
    #[arg(long)]
    dry_run: bool,

    /// Override the price-check tick period (milliseconds)
    #[arg(long)]
    price_tick_ms: Option<u64>,

    /// Override the reconciliation tick period (milliseconds)
    #[arg(long)]
    sync_tick_ms: Option<u64>,

    /// Heartbeat summary interval (seconds)
    #[arg(long, default_value = "60")]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let mut settings = MonitorSettings::from_config(&config);
    if let Some(ms) = args.price_tick_ms {
        settings.price_tick_ms = ms;
    }
    if let Some(ms) = args.sync_tick_ms {
        settings.sync_tick_ms = ms;
    }

    info!("=== Position Monitor ===");
    info!("Price tick: {}ms", settings.price_tick_ms);
    info!("Sync tick: {}ms", settings.sync_tick_ms);
    info!("Trailing epsilon: {}", settings.trailing_stop_epsilon);
    info!("Dry run: {}", args.dry_run);

    let db = Database::connect(&config).await?;
    db.health_check().await?;
    info!("Connected to database");

    let store = Arc::new(PgPositionStore::new(
        db.pool().clone(),
        &config.positions_table,
    ));
    let oracle = Arc::new(HttpPriceOracle::new(
        &config.price_api_url,
        Duration::from_millis(config.price_fetch_timeout_ms),
    ));
    let executor: Arc<dyn SwapExecutor> = if args.dry_run {
        Arc::new(DryRunSwapExecutor::new())
    } else {
        Arc::new(HttpSwapExecutor::new(&config.executor_api_url))
    };

    let engine = MonitorEngine::new(settings, store, oracle, executor);

    // Log lifecycle events as they fan out
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!("[EVENT] {event}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("[EVENT] dropped {missed} events (slow consumer)");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let rehydrated = engine.start().await?;
    info!("Monitoring started with {rehydrated} open positions");

    let mut heartbeat = tokio::time::interval(Duration::from_secs(args.heartbeat_secs));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, exiting...");
                break;
            }
            _ = heartbeat.tick() => {
                let status = engine.status();
                info!("[ALIVE] monitoring {} positions", status.monitored_count);
                engine.metrics().print_summary();
            }
        }
    }

    engine.stop().await;

    info!("=== FINAL STATUS ===");
    engine.metrics().print_summary();
    info!("Shutdown complete");
    Ok(())
}
