//! Monitor engine: owns the price-check and reconciliation timers and drives
//! the exit state machine.
//!
//! A position flows through three states: active (in the registry), exiting
//! (atomically taken out by the registry gate, in memory only) and terminal
//! (exited or failed, recorded in the store). Everything past the gate runs
//! with no registry lock held, so a slow venue never blocks other positions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::{
    trailing_stop_at, Config, ExitKind, HistoryFilter, MonitoredPosition, NewPosition,
    PositionRecord, RegisterRequest, ReversingRequest, TerminalUpdate,
};

use crate::events::{EventBus, MonitorEvent};
use crate::exit;
use crate::metrics::Metrics;
use crate::oracle::PriceOracle;
use crate::registry::PositionRegistry;
use crate::store::{PositionStore, StoreError};
use crate::swap::SwapExecutor;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor is already running")]
    AlreadyRunning,

    #[error("invalid position: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Monitor engine tuning.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Price-check tick period in milliseconds
    pub price_tick_ms: u64,
    /// Reconciliation tick period in milliseconds
    pub sync_tick_ms: u64,
    /// Trailing band width (0.01 = 1%)
    pub trailing_stop_epsilon: Decimal,
    /// Whether new positions start with the trailing stop armed
    pub trailing_stop_default: bool,
    /// How long stop waits for in-flight work, in milliseconds
    pub stop_grace_ms: u64,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            price_tick_ms: config.price_tick_ms,
            sync_tick_ms: config.sync_tick_ms,
            trailing_stop_epsilon: config.trailing_stop_epsilon,
            trailing_stop_default: config.trailing_stop_default,
            stop_grace_ms: config.stop_grace_ms,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            price_tick_ms: 30_000,
            sync_tick_ms: 60_000,
            trailing_stop_epsilon: dec!(0.01),
            trailing_stop_default: true,
            stop_grace_ms: 5_000,
        }
    }
}

/// Operator-facing snapshot of the engine.
#[derive(Debug, Clone)]
pub struct MonitorStatus {
    pub is_running: bool,
    pub monitored_count: usize,
    pub price_tick_ms: u64,
    pub sync_tick_ms: u64,
    pub positions: Vec<PositionStatusEntry>,
}

#[derive(Debug, Clone)]
pub struct PositionStatusEntry {
    pub trade_id: String,
    pub token_symbol: String,
    pub current_price: Option<Decimal>,
    pub entry_price: Decimal,
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub sl: Decimal,
    pub trailing_stop_price: Decimal,
    pub highest_favorable_price: Decimal,
    pub time_remaining_secs: i64,
    pub price_check_count: u64,
}

/// Everything the timer tasks need, shared behind one Arc.
struct EngineCtx {
    settings: MonitorSettings,
    registry: PositionRegistry,
    store: Arc<dyn PositionStore>,
    oracle: Arc<dyn PriceOracle>,
    executor: Arc<dyn SwapExecutor>,
    events: EventBus,
    metrics: Metrics,
    running: AtomicBool,
}

struct EngineTasks {
    shutdown_tx: watch::Sender<bool>,
    price_task: JoinHandle<()>,
    sync_task: JoinHandle<()>,
}

/// The position-management core.
pub struct MonitorEngine {
    ctx: Arc<EngineCtx>,
    tasks: Mutex<Option<EngineTasks>>,
}

impl MonitorEngine {
    pub fn new(
        settings: MonitorSettings,
        store: Arc<dyn PositionStore>,
        oracle: Arc<dyn PriceOracle>,
        executor: Arc<dyn SwapExecutor>,
    ) -> Self {
        Self {
            ctx: Arc::new(EngineCtx {
                settings,
                registry: PositionRegistry::new(),
                store,
                oracle,
                executor,
                events: EventBus::default(),
                metrics: Metrics::new(),
                running: AtomicBool::new(false),
            }),
            tasks: Mutex::new(None),
        }
    }

    /// Load the store's active set into the registry and start both timers.
    /// The first price-check tick runs immediately. Returns the number of
    /// rehydrated positions.
    pub async fn start(&self) -> Result<usize, MonitorError> {
        if self.ctx.running.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyRunning);
        }

        let records = match self.ctx.store.list_active().await {
            Ok(records) => records,
            Err(e) => {
                self.ctx.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        for record in &records {
            let position =
                MonitoredPosition::rehydrate(record, self.ctx.settings.trailing_stop_epsilon);
            self.ctx.registry.insert(position);
        }
        let count = self.ctx.registry.len();
        info!("[MONITOR] rehydrated {} open positions", count);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let price_task = tokio::spawn(EngineCtx::price_loop(
            Arc::clone(&self.ctx),
            shutdown_rx.clone(),
        ));
        let sync_task = tokio::spawn(EngineCtx::sync_loop(Arc::clone(&self.ctx), shutdown_rx));
        *self.tasks.lock().expect("engine task slot poisoned") = Some(EngineTasks {
            shutdown_tx,
            price_task,
            sync_task,
        });
        Ok(count)
    }

    /// Stop both timers, wait (bounded) for in-flight work, clear the
    /// registry. Work that already passed the exit gate is allowed to finish
    /// so the store reflects reality.
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().expect("engine task slot poisoned").take();
        let Some(EngineTasks {
            shutdown_tx,
            price_task,
            sync_task,
        }) = tasks
        else {
            return;
        };
        self.ctx.running.store(false, Ordering::SeqCst);
        let _ = shutdown_tx.send(true);

        let grace = Duration::from_millis(self.ctx.settings.stop_grace_ms);
        for mut task in [price_task, sync_task] {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!(
                    "[MONITOR] task did not stop within {}ms, aborting",
                    grace.as_millis()
                );
                task.abort();
            }
        }
        self.ctx.registry.clear();
        info!("[MONITOR] stopped");
    }

    pub fn is_running(&self) -> bool {
        self.ctx.running.load(Ordering::SeqCst)
    }

    /// Called by intake after the entry trade has landed on-venue. The store
    /// write happens first; the registry only learns about the position once
    /// the durable insert succeeded.
    pub async fn register_position(&self, request: RegisterRequest) -> Result<Uuid, MonitorError> {
        validate(&request)?;

        let eps = self.ctx.settings.trailing_stop_epsilon;
        let new_position = NewPosition {
            trade_id: request.trade_id.clone(),
            user_id: request.user_id,
            safe_address: request.safe_address,
            network_key: request.network_key,
            token_symbol: request.token_symbol.clone(),
            side: request.side,
            entry_price: request.entry_price,
            entry_amount: request.entry_amount,
            tp1: request.tp1,
            tp2: request.tp2,
            sl: request.sl,
            max_exit_time: request.max_exit_time,
            highest_favorable_price: request.entry_price,
            trailing_stop_price: trailing_stop_at(request.side, request.entry_price, eps),
            trailing_stop_enabled: self.ctx.settings.trailing_stop_default,
            entry_tx_hash: request.entry_tx_hash,
            executed_at: Utc::now(),
        };

        let id = self.ctx.store.insert(&new_position).await?;
        self.ctx
            .registry
            .insert(MonitoredPosition::from_new(id, &new_position));
        self.ctx.metrics.record_registered();
        self.ctx.events.publish(MonitorEvent::PositionAdded {
            id,
            trade_id: request.trade_id.clone(),
            token_symbol: request.token_symbol.clone(),
            side: request.side,
            entry_price: request.entry_price,
        });
        info!(
            "[MONITOR] registered {} {} {} @ {} (tp1 {}, tp2 {}, sl {})",
            request.trade_id,
            request.side,
            request.token_symbol,
            request.entry_price,
            request.tp1,
            request.tp2,
            request.sl
        );
        Ok(id)
    }

    /// Operator-initiated exit by trade id. Prices at the last known quote,
    /// falling back to the entry price if no tick has run yet. Returns
    /// whether this call drove the exit.
    pub async fn manual_exit(&self, trade_id: &str, reason: &str) -> bool {
        let Some(position) = self.ctx.registry.find_by_trade_id(trade_id) else {
            warn!("[MANUAL EXIT] no active position for trade {}", trade_id);
            return false;
        };
        let price = position.last_known_price();
        info!("[MANUAL EXIT] {} @ {} ({})", trade_id, price, reason);
        self.ctx
            .trigger_exit(position.id, ExitKind::Manual, price)
            .await
    }

    pub fn status(&self) -> MonitorStatus {
        let now = Utc::now();
        let positions: Vec<PositionStatusEntry> = self
            .ctx
            .registry
            .snapshot()
            .into_iter()
            .map(|p| PositionStatusEntry {
                trade_id: p.trade_id,
                token_symbol: p.token_symbol,
                current_price: p.current_price,
                entry_price: p.entry_price,
                tp1: p.tp1,
                tp2: p.tp2,
                sl: p.sl,
                trailing_stop_price: p.trailing_stop_price,
                highest_favorable_price: p.highest_favorable_price,
                time_remaining_secs: (p.max_exit_time - now).num_seconds().max(0),
                price_check_count: p.price_check_count,
            })
            .collect();
        MonitorStatus {
            is_running: self.is_running(),
            monitored_count: positions.len(),
            price_tick_ms: self.ctx.settings.price_tick_ms,
            sync_tick_ms: self.ctx.settings.sync_tick_ms,
            positions,
        }
    }

    /// Active rows straight from the store.
    pub async fn active(&self) -> Result<Vec<PositionRecord>, MonitorError> {
        Ok(self.ctx.store.list_active().await?)
    }

    /// Terminal rows from the store.
    pub async fn history(&self, filter: &HistoryFilter) -> Result<Vec<PositionRecord>, MonitorError> {
        Ok(self.ctx.store.get_history(filter).await?)
    }

    /// Store row for one trade, active or terminal.
    pub async fn position_status(
        &self,
        trade_id: &str,
    ) -> Result<Option<PositionRecord>, MonitorError> {
        Ok(self.ctx.store.get_by_trade_id(trade_id).await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.ctx.events.subscribe()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.ctx.metrics
    }
}

fn validate(request: &RegisterRequest) -> Result<(), MonitorError> {
    if request.trade_id.is_empty() {
        return Err(MonitorError::InvalidRequest("empty trade_id".to_string()));
    }
    for (name, value) in [
        ("entry_price", request.entry_price),
        ("entry_amount", request.entry_amount),
        ("tp1", request.tp1),
        ("tp2", request.tp2),
        ("sl", request.sl),
    ] {
        if value <= Decimal::ZERO {
            return Err(MonitorError::InvalidRequest(format!(
                "{name} must be positive, got {value}"
            )));
        }
    }
    Ok(())
}

impl EngineCtx {
    async fn price_loop(ctx: Arc<EngineCtx>, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(ctx.settings.price_tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => Self::run_price_tick(&ctx).await,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        debug!("[MONITOR] price loop stopped");
    }

    /// Fan one tick out over the registry snapshot. Every position is an
    /// independent task; one failing or stalling never affects the others.
    async fn run_price_tick(ctx: &Arc<EngineCtx>) {
        let snapshot = ctx.registry.snapshot();
        if snapshot.is_empty() {
            return;
        }
        debug!("[MONITOR] price tick over {} positions", snapshot.len());

        let mut checks = JoinSet::new();
        for position in snapshot {
            let ctx = Arc::clone(ctx);
            checks.spawn(async move { ctx.check_position(position).await });
        }
        while let Some(joined) = checks.join_next().await {
            if let Err(e) = joined {
                error!("[MONITOR] position check panicked: {}", e);
            }
        }
    }

    /// One monitoring step for one position.
    async fn check_position(&self, position: MonitoredPosition) {
        let price = match self.oracle.spot_price(&position.token_symbol).await {
            Ok(price) => price,
            Err(e) => {
                warn!(
                    "[PRICE] {} fetch failed, skipping tick: {}",
                    position.token_symbol, e
                );
                self.metrics.record_price_error();
                return;
            }
        };
        let now = Utc::now();
        // Write the quote back under the registry lock; None means the
        // position exited under us.
        let Some(updated) = self.registry.apply_price(
            position.id,
            price,
            now,
            self.settings.trailing_stop_epsilon,
        ) else {
            return;
        };
        self.metrics.record_price_check();

        if let Some(kind) = exit::evaluate(&updated, price, now) {
            self.trigger_exit(updated.id, kind, price).await;
        }
    }

    /// The active -> exiting transition. `begin_exit` is atomic, so exactly
    /// one caller proceeds past this gate for any position; everyone else
    /// returns false with no side effect.
    async fn trigger_exit(&self, id: Uuid, kind: ExitKind, price: Decimal) -> bool {
        let Some(position) = self.registry.begin_exit(id) else {
            debug!("[EXIT] {} already exiting", id);
            return false;
        };
        self.execute_exit(position, kind, price).await;
        true
    }

    /// Everything past the gate: reversing trade, P&L, terminal store write,
    /// lifecycle event. The position never returns to the registry.
    async fn execute_exit(&self, position: MonitoredPosition, kind: ExitKind, exit_price: Decimal) {
        info!(
            "[EXIT] {} triggered for {} ({} {} @ {})",
            kind, position.trade_id, position.side, position.token_symbol, exit_price
        );
        let request = ReversingRequest::for_position(&position);

        match self.executor.execute(&request).await {
            Ok(receipt) => {
                let profit_loss = exit::profit_loss(
                    position.side,
                    position.entry_amount,
                    position.entry_price,
                    exit_price,
                );
                let update = TerminalUpdate::Exited {
                    kind,
                    exit_price,
                    exit_amount: position.entry_amount,
                    profit_loss,
                    exited_at: Utc::now(),
                };
                if let Err(e) = self.store.update_status(position.id, &update).await {
                    // The swap already landed on-venue. Leave the divergent
                    // row to the next reconciliation pass or the operator.
                    error!(
                        "[EXIT] terminal update failed for {}: {}",
                        position.trade_id, e
                    );
                    self.metrics.record_store_error();
                }
                info!(
                    "[EXIT] closed {} via {} @ {} | P&L: {} (tx {})",
                    position.trade_id, kind, exit_price, profit_loss, receipt.tx_hash
                );
                self.metrics.record_exit();
                self.events.publish(MonitorEvent::PositionExited {
                    id: position.id,
                    trade_id: position.trade_id.clone(),
                    kind,
                    exit_price,
                    profit_loss,
                });
            }
            Err(e) => {
                warn!("[EXIT FAILED] {} via {}: {}", position.trade_id, kind, e);
                let update = TerminalUpdate::Failed {
                    error: e.to_string(),
                    failed_at: Utc::now(),
                };
                if let Err(store_err) = self.store.update_status(position.id, &update).await {
                    error!(
                        "[EXIT] failed-status update also failed for {}: {}",
                        position.trade_id, store_err
                    );
                    self.metrics.record_store_error();
                }
                self.metrics.record_exit_failure();
                self.events.publish(MonitorEvent::PositionExitFailed {
                    id: position.id,
                    trade_id: position.trade_id.clone(),
                    error: e.to_string(),
                });
            }
        }
        self.registry.finish_exit(position.id);
    }

    async fn sync_loop(ctx: Arc<EngineCtx>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(ctx.settings.sync_tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => ctx.run_sync_tick().await,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        debug!("[MONITOR] sync loop stopped");
    }

    /// Adopt store-active positions the registry does not know about:
    /// crash recovery, peer instances, direct inserts.
    async fn run_sync_tick(&self) {
        let records = match self.store.list_active().await {
            Ok(records) => records,
            Err(e) => {
                error!("[SYNC] failed to list active positions: {}", e);
                self.metrics.record_store_error();
                return;
            }
        };

        let mut adopted = 0usize;
        for record in &records {
            if self.registry.is_tracked(record.id) {
                continue;
            }
            let position =
                MonitoredPosition::rehydrate(record, self.settings.trailing_stop_epsilon);
            if self.registry.insert(position) {
                adopted += 1;
                self.metrics.record_adopted();
                self.events.publish(MonitorEvent::PositionAdded {
                    id: record.id,
                    trade_id: record.trade_id.clone(),
                    token_symbol: record.token_symbol.clone(),
                    side: record.side,
                    entry_price: record.entry_price,
                });
                info!(
                    "[SYNC] adopted {} ({} {})",
                    record.trade_id, record.side, record.token_symbol
                );
            }
        }
        if adopted > 0 {
            info!("[SYNC] adopted {} positions from the store", adopted);
        }
    }
}
