//! Lifecycle event fan-out.
//!
//! A single broadcast channel with bounded buffering. Slow consumers lose
//! the oldest events instead of stalling the monitor; nobody listening is
//! not an error.

use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use common::{ExitKind, Side};

/// Buffered events per subscriber before drop-oldest kicks in.
const DEFAULT_CAPACITY: usize = 256;

/// Monitor lifecycle events.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    PositionAdded {
        id: Uuid,
        trade_id: String,
        token_symbol: String,
        side: Side,
        entry_price: Decimal,
    },
    PositionExited {
        id: Uuid,
        trade_id: String,
        kind: ExitKind,
        exit_price: Decimal,
        profit_loss: Decimal,
    },
    PositionExitFailed {
        id: Uuid,
        trade_id: String,
        error: String,
    },
}

impl std::fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorEvent::PositionAdded {
                trade_id,
                token_symbol,
                side,
                entry_price,
                ..
            } => write!(
                f,
                "position_added {} {} {} @ {}",
                trade_id, side, token_symbol, entry_price
            ),
            MonitorEvent::PositionExited {
                trade_id,
                kind,
                exit_price,
                profit_loss,
                ..
            } => write!(
                f,
                "position_exited {} via {} @ {} | P&L: {}",
                trade_id, kind, exit_price, profit_loss
            ),
            MonitorEvent::PositionExitFailed {
                trade_id, error, ..
            } => write!(f, "position_exit_failed {}: {}", trade_id, error),
        }
    }
}

/// Broadcast bus for monitor events.
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: MonitorEvent) {
        if self.tx.send(event).is_err() {
            debug!("[EVENT] no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn added(trade_id: &str) -> MonitorEvent {
        MonitorEvent::PositionAdded {
            id: Uuid::new_v4(),
            trade_id: trade_id.to_string(),
            token_symbol: "ETH".to_string(),
            side: Side::Buy,
            entry_price: dec!(2400),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(added("trade-1"));

        match rx.recv().await.unwrap() {
            MonitorEvent::PositionAdded { trade_id, .. } => assert_eq!(trade_id, "trade-1"),
            other => panic!("unexpected event: {other}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(added("trade-1"));
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        bus.publish(added("trade-1"));
        bus.publish(added("trade-2"));
        bus.publish(added("trade-3"));

        // The first receive reports the overflow, then the newest
        // events are still delivered.
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(1))));
        match rx.recv().await.unwrap() {
            MonitorEvent::PositionAdded { trade_id, .. } => assert_eq!(trade_id, "trade-2"),
            other => panic!("unexpected event: {other}"),
        }
        match rx.recv().await.unwrap() {
            MonitorEvent::PositionAdded { trade_id, .. } => assert_eq!(trade_id, "trade-3"),
            other => panic!("unexpected event: {other}"),
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }
}
