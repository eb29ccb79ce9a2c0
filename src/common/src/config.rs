//! Configuration loading from environment variables.

use std::env;

use rust_decimal::Decimal;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid URL in {0}: {1}")]
    InvalidUrl(String, String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Table holding position rows
    pub positions_table: String,

    /// Price oracle base URL
    pub price_api_url: String,

    /// Swap executor base URL
    pub executor_api_url: String,

    /// Price-check tick period in milliseconds
    pub price_tick_ms: u64,

    /// Reconciliation tick period in milliseconds
    pub sync_tick_ms: u64,

    /// Per-request bound on price fetches in milliseconds
    pub price_fetch_timeout_ms: u64,

    /// Trailing band width (0.01 = 1%)
    pub trailing_stop_epsilon: Decimal,

    /// Whether new positions start with the trailing stop armed
    pub trailing_stop_default: bool,

    /// How long Stop waits for in-flight work, in milliseconds
    pub stop_grace_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required variables:
    /// - DATABASE_URL: PostgreSQL connection string
    ///
    /// Optional variables (with defaults):
    /// - POSITIONS_TABLE: table for position rows (default: positions)
    /// - PRICE_API_URL: price oracle base URL
    /// - EXECUTOR_API_URL: swap executor base URL
    /// - PRICE_TICK_MS: price-check tick period (default: 30000)
    /// - SYNC_TICK_MS: reconciliation tick period (default: 60000)
    /// - PRICE_FETCH_TIMEOUT_MS: per-fetch bound (default: 10000)
    /// - TRAILING_STOP_EPSILON: trailing band width (default: 0.01)
    /// - TRAILING_STOP_DEFAULT: arm trailing stops by default (default: true)
    /// - STOP_GRACE_MS: shutdown grace period (default: 5000)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_env_only()
    }

    /// Load configuration from environment variables only (no .env file).
    /// Useful for testing.
    pub fn from_env_only() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let positions_table =
            env::var("POSITIONS_TABLE").unwrap_or_else(|_| "positions".to_string());
        if !is_bare_identifier(&positions_table) {
            return Err(ConfigError::InvalidValue(
                "POSITIONS_TABLE".to_string(),
                positions_table,
            ));
        }

        let price_api_url =
            env::var("PRICE_API_URL").unwrap_or_else(|_| "http://localhost:3001".to_string());
        Url::parse(&price_api_url)
            .map_err(|_| ConfigError::InvalidUrl("PRICE_API_URL".to_string(), price_api_url.clone()))?;

        let executor_api_url =
            env::var("EXECUTOR_API_URL").unwrap_or_else(|_| "http://localhost:3002".to_string());
        Url::parse(&executor_api_url).map_err(|_| {
            ConfigError::InvalidUrl("EXECUTOR_API_URL".to_string(), executor_api_url.clone())
        })?;

        let price_tick_ms = parse_or("PRICE_TICK_MS", 30_000);
        let sync_tick_ms = parse_or("SYNC_TICK_MS", 60_000);
        let price_fetch_timeout_ms = parse_or("PRICE_FETCH_TIMEOUT_MS", 10_000);
        let stop_grace_ms = parse_or("STOP_GRACE_MS", 5_000);

        let trailing_stop_epsilon = env::var("TRAILING_STOP_EPSILON")
            .ok()
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or_else(|| Decimal::new(1, 2)); // 0.01 = 1%

        let trailing_stop_default = env::var("TRAILING_STOP_DEFAULT")
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
            .unwrap_or(true);

        Ok(Self {
            database_url,
            positions_table,
            price_api_url,
            executor_api_url,
            price_tick_ms,
            sync_tick_ms,
            price_fetch_timeout_ms,
            trailing_stop_epsilon,
            trailing_stop_default,
            stop_grace_ms,
        })
    }
}

fn parse_or(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Table names are interpolated into SQL, so only bare identifiers pass.
fn is_bare_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "DATABASE_URL",
            "POSITIONS_TABLE",
            "PRICE_API_URL",
            "EXECUTOR_API_URL",
            "PRICE_TICK_MS",
            "SYNC_TICK_MS",
            "PRICE_FETCH_TIMEOUT_MS",
            "TRAILING_STOP_EPSILON",
            "TRAILING_STOP_DEFAULT",
            "STOP_GRACE_MS",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_database_url() {
        clear_env();

        let result = Config::from_env_only();
        assert!(result.is_err());

        if let Err(ConfigError::MissingVar(var)) = result {
            assert_eq!(var, "DATABASE_URL");
        } else {
            panic!("Expected MissingVar error");
        }
    }

    #[test]
    #[serial]
    fn test_config_with_defaults() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/test");

        let config = Config::from_env_only().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.positions_table, "positions");
        assert_eq!(config.price_tick_ms, 30_000);
        assert_eq!(config.sync_tick_ms, 60_000);
        assert_eq!(config.price_fetch_timeout_ms, 10_000);
        assert_eq!(config.trailing_stop_epsilon, dec!(0.01));
        assert!(config.trailing_stop_default);
        assert_eq!(config.stop_grace_ms, 5_000);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_overrides() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("PRICE_TICK_MS", "1000");
        env::set_var("TRAILING_STOP_EPSILON", "0.02");
        env::set_var("TRAILING_STOP_DEFAULT", "false");

        let config = Config::from_env_only().unwrap();

        assert_eq!(config.price_tick_ms, 1000);
        assert_eq!(config.trailing_stop_epsilon, dec!(0.02));
        assert!(!config.trailing_stop_default);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_rejects_quoted_table_name() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("POSITIONS_TABLE", "positions; DROP TABLE positions");

        let result = Config::from_env_only();
        assert!(matches!(result, Err(ConfigError::InvalidValue(_, _))));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_rejects_bad_url() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("PRICE_API_URL", "not a url");

        let result = Config::from_env_only();
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_, _))));

        clear_env();
    }
}
