//! Common library for the spotbot position-management services.
//!
//! Provides shared functionality:
//! - Configuration loading from .env
//! - Database connection pooling
//! - Data models shared between the monitor and its collaborators

pub mod config;
pub mod db;
pub mod models;

pub use config::Config;
pub use db::Database;
pub use models::{
    trailing_stop_at, ExitKind, HistoryFilter, MonitoredPosition, NewPosition, PositionRecord,
    PositionStatus, RegisterRequest, ReversingRequest, Side, SwapReceipt, TerminalUpdate,
};
