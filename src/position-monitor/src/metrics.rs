//! Monitoring counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

/// Counters shared across the monitor's tasks.
pub struct Metrics {
    start_time: Instant,
    registered: AtomicU64,
    adopted: AtomicU64,
    price_checks: AtomicU64,
    price_errors: AtomicU64,
    exits: AtomicU64,
    exit_failures: AtomicU64,
    store_errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            registered: AtomicU64::new(0),
            adopted: AtomicU64::new(0),
            price_checks: AtomicU64::new(0),
            price_errors: AtomicU64::new(0),
            exits: AtomicU64::new(0),
            exit_failures: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
        }
    }

    pub fn record_registered(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Position adopted by the reconciliation tick.
    pub fn record_adopted(&self) {
        self.adopted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_price_check(&self) {
        self.price_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_price_error(&self) {
        self.price_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exit(&self) {
        self.exits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exit_failure(&self) {
        self.exit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exits(&self) -> u64 {
        self.exits.load(Ordering::Relaxed)
    }

    pub fn exit_failures(&self) -> u64 {
        self.exit_failures.load(Ordering::Relaxed)
    }

    pub fn price_checks(&self) -> u64 {
        self.price_checks.load(Ordering::Relaxed)
    }

    pub fn adopted(&self) -> u64 {
        self.adopted.load(Ordering::Relaxed)
    }

    /// Print metrics summary.
    pub fn print_summary(&self) {
        let elapsed = self.start_time.elapsed();

        info!("===============================================================");
        info!("              POSITION MONITOR METRICS                         ");
        info!("===============================================================");
        info!(
            "  Uptime:            {:>8.1} minutes",
            elapsed.as_secs_f64() / 60.0
        );
        info!(
            "  Registered:        {:>8}",
            self.registered.load(Ordering::Relaxed)
        );
        info!(
            "  Adopted (sync):    {:>8}",
            self.adopted.load(Ordering::Relaxed)
        );
        info!(
            "  Price Checks:      {:>8}",
            self.price_checks.load(Ordering::Relaxed)
        );
        info!(
            "  Price Errors:      {:>8}",
            self.price_errors.load(Ordering::Relaxed)
        );
        info!("  Exits:             {:>8}", self.exits.load(Ordering::Relaxed));
        info!(
            "  Exit Failures:     {:>8}",
            self.exit_failures.load(Ordering::Relaxed)
        );
        info!(
            "  Store Errors:      {:>8}",
            self.store_errors.load(Ordering::Relaxed)
        );
        info!("===============================================================");
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();

        metrics.record_price_check();
        metrics.record_price_check();
        metrics.record_exit();
        metrics.record_exit_failure();
        metrics.record_adopted();

        assert_eq!(metrics.price_checks(), 2);
        assert_eq!(metrics.exits(), 1);
        assert_eq!(metrics.exit_failures(), 1);
        assert_eq!(metrics.adopted(), 1);
    }
}
