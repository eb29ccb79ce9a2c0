//! Test fixtures shared across module tests.

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::{
    trailing_stop_at, MonitoredPosition, PositionRecord, PositionStatus, RegisterRequest, Side,
};

/// Buy request: entry 2400, amount 0.1, tp1 2500, tp2 2600, sl 2350.
pub fn buy_request() -> RegisterRequest {
    RegisterRequest {
        trade_id: "trade-1".to_string(),
        user_id: "user-1".to_string(),
        safe_address: "0xsafe".to_string(),
        network_key: "base".to_string(),
        token_symbol: "ETH".to_string(),
        side: Side::Buy,
        entry_price: dec!(2400),
        entry_amount: dec!(0.1),
        tp1: dec!(2500),
        tp2: dec!(2600),
        sl: dec!(2350),
        max_exit_time: Utc::now() + Duration::hours(1),
        entry_tx_hash: Some("0xentry".to_string()),
    }
}

/// Sell request: entry 100, amount 1, tp1 95, tp2 90, sl 105.
pub fn sell_request() -> RegisterRequest {
    RegisterRequest {
        trade_id: "trade-2".to_string(),
        user_id: "user-1".to_string(),
        safe_address: "0xsafe".to_string(),
        network_key: "base".to_string(),
        token_symbol: "SOL".to_string(),
        side: Side::Sell,
        entry_price: dec!(100),
        entry_amount: dec!(1),
        tp1: dec!(95),
        tp2: dec!(90),
        sl: dec!(105),
        max_exit_time: Utc::now() + Duration::hours(1),
        entry_tx_hash: None,
    }
}

/// In-memory position built from the matching request, trailing stop seeded
/// one 1% band away from entry.
pub fn monitored(side: Side) -> MonitoredPosition {
    let request = match side {
        Side::Buy => buy_request(),
        Side::Sell => sell_request(),
    };
    MonitoredPosition {
        id: Uuid::new_v4(),
        trade_id: request.trade_id,
        user_id: request.user_id,
        safe_address: request.safe_address,
        network_key: request.network_key,
        token_symbol: request.token_symbol,
        side: request.side,
        entry_price: request.entry_price,
        entry_amount: request.entry_amount,
        tp1: request.tp1,
        tp2: request.tp2,
        sl: request.sl,
        max_exit_time: request.max_exit_time,
        current_price: None,
        highest_favorable_price: request.entry_price,
        trailing_stop_price: trailing_stop_at(request.side, request.entry_price, dec!(0.01)),
        trailing_stop_enabled: true,
        price_check_count: 0,
        last_price_check: None,
        executed_at: Utc::now(),
    }
}

/// Active store row for a buy position, deadline far in the future.
pub fn active_record(trade_id: &str) -> PositionRecord {
    let now = Utc::now();
    PositionRecord {
        id: Uuid::new_v4(),
        trade_id: trade_id.to_string(),
        user_id: "user-1".to_string(),
        safe_address: "0xsafe".to_string(),
        network_key: "base".to_string(),
        token_symbol: "ETH".to_string(),
        side: Side::Buy,
        entry_price: dec!(2400),
        entry_amount: dec!(0.1),
        tp1: dec!(2500),
        tp2: dec!(2600),
        sl: dec!(2350),
        max_exit_time: now + Duration::hours(1),
        status: PositionStatus::Active,
        highest_favorable_price: dec!(2400),
        trailing_stop_price: dec!(2376),
        trailing_stop_enabled: true,
        price_check_count: 0,
        last_price_check: None,
        entry_tx_hash: Some("0xentry".to_string()),
        executed_at: now,
        exit_kind: None,
        exit_price: None,
        exit_amount: None,
        profit_loss: None,
        exited_at: None,
        error: None,
        failed_at: None,
        created_at: now,
        updated_at: now,
    }
}
