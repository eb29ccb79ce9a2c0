//! Shared data models for monitored positions and their exits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Direction of the entry trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Direction of the reversing (exit) trade.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position lifecycle status. Transitions one way: active -> exited | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Active,
    Exited,
    Failed,
}

impl PositionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PositionStatus::Active => "active",
            PositionStatus::Exited => "exited",
            PositionStatus::Failed => "failed",
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    MaxExitTime,
    TrailingStop,
    StopLoss,
    Tp2,
    Tp1,
    Manual,
}

impl ExitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitKind::MaxExitTime => "max_exit_time",
            ExitKind::TrailingStop => "trailing_stop",
            ExitKind::StopLoss => "stop_loss",
            ExitKind::Tp2 => "tp2",
            ExitKind::Tp1 => "tp1",
            ExitKind::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trailing stop one band away from the given extremum.
pub fn trailing_stop_at(side: Side, extremum: Decimal, epsilon: Decimal) -> Decimal {
    match side {
        Side::Buy => extremum * (Decimal::ONE - epsilon),
        Side::Sell => extremum * (Decimal::ONE + epsilon),
    }
}

/// A position row as persisted in the durable store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionRecord {
    pub id: Uuid,
    pub trade_id: String,
    pub user_id: String,
    pub safe_address: String,
    pub network_key: String,
    pub token_symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_amount: Decimal,
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub sl: Decimal,
    pub max_exit_time: DateTime<Utc>,
    pub status: PositionStatus,
    pub highest_favorable_price: Decimal,
    pub trailing_stop_price: Decimal,
    pub trailing_stop_enabled: bool,
    pub price_check_count: i64,
    pub last_price_check: Option<DateTime<Utc>>,
    pub entry_tx_hash: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub exit_kind: Option<String>,
    pub exit_price: Option<Decimal>,
    pub exit_amount: Option<Decimal>,
    pub profit_loss: Option<Decimal>,
    pub exited_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A new position to insert; id and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub trade_id: String,
    pub user_id: String,
    pub safe_address: String,
    pub network_key: String,
    pub token_symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_amount: Decimal,
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub sl: Decimal,
    pub max_exit_time: DateTime<Utc>,
    pub highest_favorable_price: Decimal,
    pub trailing_stop_price: Decimal,
    pub trailing_stop_enabled: bool,
    pub entry_tx_hash: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// An open position as tracked in memory by the monitor.
#[derive(Debug, Clone)]
pub struct MonitoredPosition {
    pub id: Uuid,
    pub trade_id: String,
    pub user_id: String,
    pub safe_address: String,
    pub network_key: String,
    pub token_symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_amount: Decimal,
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub sl: Decimal,
    pub max_exit_time: DateTime<Utc>,
    pub current_price: Option<Decimal>,
    /// Most favorable price seen since entry: highest for a buy, lowest
    /// for a sell. The name follows the buy convention.
    pub highest_favorable_price: Decimal,
    pub trailing_stop_price: Decimal,
    pub trailing_stop_enabled: bool,
    pub price_check_count: u64,
    pub last_price_check: Option<DateTime<Utc>>,
    pub executed_at: DateTime<Utc>,
}

impl MonitoredPosition {
    /// Runtime view of a freshly inserted row.
    pub fn from_new(id: Uuid, new: &NewPosition) -> Self {
        Self {
            id,
            trade_id: new.trade_id.clone(),
            user_id: new.user_id.clone(),
            safe_address: new.safe_address.clone(),
            network_key: new.network_key.clone(),
            token_symbol: new.token_symbol.clone(),
            side: new.side,
            entry_price: new.entry_price,
            entry_amount: new.entry_amount,
            tp1: new.tp1,
            tp2: new.tp2,
            sl: new.sl,
            max_exit_time: new.max_exit_time,
            current_price: None,
            highest_favorable_price: new.highest_favorable_price,
            trailing_stop_price: new.trailing_stop_price,
            trailing_stop_enabled: new.trailing_stop_enabled,
            price_check_count: 0,
            last_price_check: None,
            executed_at: new.executed_at,
        }
    }

    /// Rebuild the runtime view of a stored position. The favorable extremum
    /// restarts from the entry price; price history does not survive restarts.
    pub fn rehydrate(record: &PositionRecord, epsilon: Decimal) -> Self {
        Self {
            id: record.id,
            trade_id: record.trade_id.clone(),
            user_id: record.user_id.clone(),
            safe_address: record.safe_address.clone(),
            network_key: record.network_key.clone(),
            token_symbol: record.token_symbol.clone(),
            side: record.side,
            entry_price: record.entry_price,
            entry_amount: record.entry_amount,
            tp1: record.tp1,
            tp2: record.tp2,
            sl: record.sl,
            max_exit_time: record.max_exit_time,
            current_price: None,
            highest_favorable_price: record.entry_price,
            trailing_stop_price: trailing_stop_at(record.side, record.entry_price, epsilon),
            trailing_stop_enabled: record.trailing_stop_enabled,
            price_check_count: 0,
            last_price_check: None,
            executed_at: record.executed_at,
        }
    }

    /// Price used when an exit must be priced without a fresh quote.
    pub fn last_known_price(&self) -> Decimal {
        self.current_price.unwrap_or(self.entry_price)
    }
}

/// Intake request for a freshly entered trade.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub trade_id: String,
    pub user_id: String,
    pub safe_address: String,
    pub network_key: String,
    pub token_symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_amount: Decimal,
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub sl: Decimal,
    pub max_exit_time: DateTime<Utc>,
    pub entry_tx_hash: Option<String>,
}

/// Terminal write applied to a position row.
#[derive(Debug, Clone)]
pub enum TerminalUpdate {
    Exited {
        kind: ExitKind,
        exit_price: Decimal,
        exit_amount: Decimal,
        profit_loss: Decimal,
        exited_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        failed_at: DateTime<Utc>,
    },
}

/// The reversing order sent to the swap executor.
#[derive(Debug, Clone, Serialize)]
pub struct ReversingRequest {
    pub trade_id: String,
    pub user_id: String,
    pub safe_address: String,
    pub network_key: String,
    pub token_symbol: String,
    pub side: Side,
    pub amount: Decimal,
}

impl ReversingRequest {
    /// Exit order for a position: opposite side, full entry amount.
    pub fn for_position(position: &MonitoredPosition) -> Self {
        Self {
            trade_id: position.trade_id.clone(),
            user_id: position.user_id.clone(),
            safe_address: position.safe_address.clone(),
            network_key: position.network_key.clone(),
            token_symbol: position.token_symbol.clone(),
            side: position.side.opposite(),
            amount: position.entry_amount,
        }
    }
}

/// Receipt returned by the swap executor for a completed reversing trade.
#[derive(Debug, Clone)]
pub struct SwapReceipt {
    pub tx_hash: String,
    pub executed_at: DateTime<Utc>,
}

/// Filter for terminal position history.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub user_id: Option<String>,
    pub token_symbol: Option<String>,
    pub status: Option<PositionStatus>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn record(side: Side) -> PositionRecord {
        let now = Utc::now();
        PositionRecord {
            id: Uuid::new_v4(),
            trade_id: "trade-1".to_string(),
            user_id: "user-1".to_string(),
            safe_address: "0xsafe".to_string(),
            network_key: "base".to_string(),
            token_symbol: "ETH".to_string(),
            side,
            entry_price: dec!(2400),
            entry_amount: dec!(0.1),
            tp1: dec!(2500),
            tp2: dec!(2600),
            sl: dec!(2350),
            max_exit_time: now + Duration::hours(1),
            status: PositionStatus::Active,
            highest_favorable_price: dec!(2450),
            trailing_stop_price: dec!(2425.5),
            trailing_stop_enabled: true,
            price_check_count: 12,
            last_price_check: Some(now),
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

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_side_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"buy\"");
        let side: Side = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(side, Side::Sell);
    }

    #[test]
    fn test_exit_kind_labels() {
        assert_eq!(ExitKind::MaxExitTime.as_str(), "max_exit_time");
        assert_eq!(ExitKind::TrailingStop.as_str(), "trailing_stop");
        assert_eq!(ExitKind::Manual.to_string(), "manual");
    }

    #[test]
    fn test_trailing_stop_band() {
        assert_eq!(trailing_stop_at(Side::Buy, dec!(2400), dec!(0.01)), dec!(2376));
        assert_eq!(trailing_stop_at(Side::Sell, dec!(100), dec!(0.01)), dec!(101));
    }

    #[test]
    fn test_rehydrate_restarts_extremum_from_entry() {
        let rec = record(Side::Buy);
        let position = MonitoredPosition::rehydrate(&rec, dec!(0.01));

        // Stored extremum (2450) is discarded; tracking restarts at entry.
        assert_eq!(position.highest_favorable_price, dec!(2400));
        assert_eq!(position.trailing_stop_price, dec!(2376));
        assert_eq!(position.price_check_count, 0);
        assert!(position.current_price.is_none());
        assert!(position.last_price_check.is_none());
    }

    #[test]
    fn test_rehydrate_sell_bands_above_entry() {
        let mut rec = record(Side::Sell);
        rec.entry_price = dec!(100);
        let position = MonitoredPosition::rehydrate(&rec, dec!(0.01));

        assert_eq!(position.highest_favorable_price, dec!(100));
        assert_eq!(position.trailing_stop_price, dec!(101));
    }

    #[test]
    fn test_last_known_price_falls_back_to_entry() {
        let rec = record(Side::Buy);
        let mut position = MonitoredPosition::rehydrate(&rec, dec!(0.01));
        assert_eq!(position.last_known_price(), dec!(2400));

        position.current_price = Some(dec!(2490));
        assert_eq!(position.last_known_price(), dec!(2490));
    }

    #[test]
    fn test_reversing_request_flips_side_and_keeps_amount() {
        let rec = record(Side::Buy);
        let position = MonitoredPosition::rehydrate(&rec, dec!(0.01));
        let request = ReversingRequest::for_position(&position);

        assert_eq!(request.side, Side::Sell);
        assert_eq!(request.amount, dec!(0.1));
        assert_eq!(request.trade_id, "trade-1");
        assert_eq!(request.safe_address, "0xsafe");
    }
}
