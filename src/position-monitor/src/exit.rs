//! Exit condition evaluation and profit-and-loss math.
//!
//! Conditions are checked in fixed priority order; the first hit wins:
//! 1. max_exit_time - the deadline is absolute and overrides price
//! 2. trailing_stop - once armed it only ever tightens, so it supersedes
//!    the static stop loss
//! 3. stop_loss
//! 4. tp2 - checked before tp1 so the better target is recorded when both hit
//! 5. tp1
//!
//! Threshold ordering is not validated here: a position registered with
//! thresholds already crossed exits on its first check.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use common::{ExitKind, MonitoredPosition, Side};

/// Decide whether `position` must exit at `price` as of `now`.
/// Pure: the same inputs always produce the same answer.
pub fn evaluate(
    position: &MonitoredPosition,
    price: Decimal,
    now: DateTime<Utc>,
) -> Option<ExitKind> {
    if now >= position.max_exit_time {
        return Some(ExitKind::MaxExitTime);
    }
    match position.side {
        Side::Buy => {
            if position.trailing_stop_enabled && price <= position.trailing_stop_price {
                Some(ExitKind::TrailingStop)
            } else if price <= position.sl {
                Some(ExitKind::StopLoss)
            } else if price >= position.tp2 {
                Some(ExitKind::Tp2)
            } else if price >= position.tp1 {
                Some(ExitKind::Tp1)
            } else {
                None
            }
        }
        Side::Sell => {
            if position.trailing_stop_enabled && price >= position.trailing_stop_price {
                Some(ExitKind::TrailingStop)
            } else if price >= position.sl {
                Some(ExitKind::StopLoss)
            } else if price <= position.tp2 {
                Some(ExitKind::Tp2)
            } else if price <= position.tp1 {
                Some(ExitKind::Tp1)
            } else {
                None
            }
        }
    }
}

/// Signed P&L for closing the full entry amount at `exit_price`.
pub fn profit_loss(
    side: Side,
    entry_amount: Decimal,
    entry_price: Decimal,
    exit_price: Decimal,
) -> Decimal {
    let entry_value = entry_amount * entry_price;
    let exit_value = entry_amount * exit_price;
    match side {
        Side::Buy => exit_value - entry_value,
        Side::Sell => entry_value - exit_value,
    }
}
