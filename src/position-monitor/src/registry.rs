//! In-memory registry of open positions.
//!
//! The registry is the authoritative runtime view of what is being monitored
//! and the exclusion primitive for exits: `begin_exit` atomically takes a
//! position out, so exactly one caller may drive the exit of any position.
//! The lock is never held across an await point.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use common::{trailing_stop_at, MonitoredPosition, Side};

#[derive(Default)]
struct Inner {
    active: HashMap<Uuid, MonitoredPosition>,
    /// Positions taken out by `begin_exit` whose terminal transition has not
    /// been recorded yet. Kept so reconciliation cannot re-adopt a position
    /// mid-exit.
    exiting: HashSet<Uuid>,
}

/// Concurrency-safe map of open positions keyed by durable id.
pub struct PositionRegistry {
    inner: RwLock<Inner>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Add a position. Returns false (and leaves any existing entry alone)
    /// if the id is already tracked or currently exiting.
    pub fn insert(&self, position: MonitoredPosition) -> bool {
        let mut inner = self.write();
        if inner.exiting.contains(&position.id) || inner.active.contains_key(&position.id) {
            return false;
        }
        inner.active.insert(position.id, position);
        true
    }

    /// Atomically take a position out for exiting. The single caller that
    /// gets `Some` owns the exit; everyone else sees `None`.
    pub fn begin_exit(&self, id: Uuid) -> Option<MonitoredPosition> {
        let mut inner = self.write();
        let position = inner.active.remove(&id)?;
        inner.exiting.insert(id);
        Some(position)
    }

    /// Drop the exiting marker once the terminal transition is recorded.
    pub fn finish_exit(&self, id: Uuid) {
        self.write().exiting.remove(&id);
    }

    /// True if the id is active or mid-exit.
    pub fn is_tracked(&self, id: Uuid) -> bool {
        let inner = self.read();
        inner.active.contains_key(&id) || inner.exiting.contains(&id)
    }

    /// Copies of all active positions, for iteration without holding the lock.
    pub fn snapshot(&self) -> Vec<MonitoredPosition> {
        self.read().active.values().cloned().collect()
    }

    /// Linear scan by the user-facing trade id. Only used for operator-
    /// initiated manual exits.
    pub fn find_by_trade_id(&self, trade_id: &str) -> Option<MonitoredPosition> {
        self.read()
            .active
            .values()
            .find(|p| p.trade_id == trade_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.read().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().active.is_empty()
    }

    /// Drop everything, including exiting markers. Only used on stop, after
    /// in-flight work has drained.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.active.clear();
        inner.exiting.clear();
    }

    /// Record a fresh quote against a position: bumps the check counters and
    /// re-arms the trailing stop when the price makes a new favorable
    /// extremum. Returns the updated copy, or None if the position is no
    /// longer active.
    pub fn apply_price(
        &self,
        id: Uuid,
        price: Decimal,
        now: DateTime<Utc>,
        epsilon: Decimal,
    ) -> Option<MonitoredPosition> {
        let mut inner = self.write();
        let position = inner.active.get_mut(&id)?;
        position.current_price = Some(price);
        position.last_price_check = Some(now);
        position.price_check_count += 1;
        let improved = match position.side {
            Side::Buy => price > position.highest_favorable_price,
            Side::Sell => price < position.highest_favorable_price,
        };
        if improved {
            position.highest_favorable_price = price;
            position.trailing_stop_price = trailing_stop_at(position.side, price, epsilon);
        }
        Some(position.clone())
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("registry lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("registry lock poisoned")
    }
}

impl Default for PositionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insert_is_idempotent() {
        let registry = PositionRegistry::new();
        let position = testutil::monitored(Side::Buy);

        assert!(registry.insert(position.clone()));
        assert!(!registry.insert(position));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_begin_exit_takes_out_exactly_once() {
        let registry = PositionRegistry::new();
        let position = testutil::monitored(Side::Buy);
        let id = position.id;
        registry.insert(position);

        assert!(registry.begin_exit(id).is_some());
        assert!(registry.begin_exit(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_insert_refused_while_exiting() {
        let registry = PositionRegistry::new();
        let position = testutil::monitored(Side::Buy);
        let id = position.id;
        registry.insert(position.clone());

        let taken = registry.begin_exit(id).unwrap();
        assert!(!registry.insert(taken.clone()));
        assert!(registry.is_tracked(id));

        registry.finish_exit(id);
        assert!(!registry.is_tracked(id));
        assert!(registry.insert(taken));
    }

    #[test]
    fn test_snapshot_returns_copies() {
        let registry = PositionRegistry::new();
        registry.insert(testutil::monitored(Side::Buy));
        registry.insert(testutil::monitored(Side::Sell));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);

        // Mutating the snapshot does not touch the registry.
        registry.clear();
        assert_eq!(snapshot.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_by_trade_id() {
        let registry = PositionRegistry::new();
        let position = testutil::monitored(Side::Buy);
        let trade_id = position.trade_id.clone();
        registry.insert(position);

        assert!(registry.find_by_trade_id(&trade_id).is_some());
        assert!(registry.find_by_trade_id("no-such-trade").is_none());
    }

    #[test]
    fn test_apply_price_bumps_counters() {
        let registry = PositionRegistry::new();
        let position = testutil::monitored(Side::Buy);
        let id = position.id;
        registry.insert(position);

        let now = Utc::now();
        let updated = registry.apply_price(id, dec!(2410), now, dec!(0.01)).unwrap();
        assert_eq!(updated.current_price, Some(dec!(2410)));
        assert_eq!(updated.price_check_count, 1);
        assert_eq!(updated.last_price_check, Some(now));

        let updated = registry.apply_price(id, dec!(2420), now, dec!(0.01)).unwrap();
        assert_eq!(updated.price_check_count, 2);
    }

    #[test]
    fn test_apply_price_buy_extremum_is_monotone() {
        let registry = PositionRegistry::new();
        let position = testutil::monitored(Side::Buy); // entry 2400
        let id = position.id;
        registry.insert(position);
        let now = Utc::now();
        let eps = dec!(0.01);

        let updated = registry.apply_price(id, dec!(2480), now, eps).unwrap();
        assert_eq!(updated.highest_favorable_price, dec!(2480));
        assert_eq!(updated.trailing_stop_price, dec!(2455.20));

        // A lower price never loosens the stop.
        let updated = registry.apply_price(id, dec!(2420), now, eps).unwrap();
        assert_eq!(updated.highest_favorable_price, dec!(2480));
        assert_eq!(updated.trailing_stop_price, dec!(2455.20));
    }

    #[test]
    fn test_apply_price_sell_tracks_lowest() {
        let registry = PositionRegistry::new();
        let position = testutil::monitored(Side::Sell); // entry 100
        let id = position.id;
        registry.insert(position);
        let now = Utc::now();
        let eps = dec!(0.01);

        let updated = registry.apply_price(id, dec!(97), now, eps).unwrap();
        assert_eq!(updated.highest_favorable_price, dec!(97));
        assert_eq!(updated.trailing_stop_price, dec!(97.97));

        let updated = registry.apply_price(id, dec!(99), now, eps).unwrap();
        assert_eq!(updated.highest_favorable_price, dec!(97));
    }

    #[test]
    fn test_apply_price_returns_none_for_unknown_id() {
        let registry = PositionRegistry::new();
        assert!(registry
            .apply_price(Uuid::new_v4(), dec!(1), Utc::now(), dec!(0.01))
            .is_none());
    }
}
