//! Price oracle adapter.
//!
//! Resolves a token symbol to a current spot price. Failures are transient:
//! the monitoring step skips the tick for that position and tries again on
//! the next one.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("price request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("price service returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("no usable price for {0}")]
    Unavailable(String),
}

/// Spot price payload from the quote service.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotPrice {
    pub symbol: String,
    /// API returns a float price
    pub price: f64,
}

/// Source of current spot prices.
/// Mockable for testing via mockall.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn spot_price(&self, symbol: &str) -> Result<Decimal, OracleError>;
}

/// HTTP quote-service client.
pub struct HttpPriceOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceOracle {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn spot_price(&self, symbol: &str) -> Result<Decimal, OracleError> {
        let url = format!("{}/price?symbol={}", self.base_url, symbol);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(OracleError::Status(response.status()));
        }
        let quote: SpotPrice = response.json().await?;
        let price = usable_price(symbol, quote.price)?;
        debug!("[PRICE] {} = {}", symbol, price);
        Ok(price)
    }
}

/// A quote is only usable if it converts cleanly and is strictly positive.
fn usable_price(symbol: &str, raw: f64) -> Result<Decimal, OracleError> {
    let price =
        Decimal::try_from(raw).map_err(|_| OracleError::Unavailable(symbol.to_string()))?;
    if price <= Decimal::ZERO {
        return Err(OracleError::Unavailable(symbol.to_string()));
    }
    Ok(price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_spot_price_response() {
        let json = r#"{"symbol":"ETH","price":2405.17}"#;
        let quote: SpotPrice = serde_json::from_str(json).unwrap();

        assert_eq!(quote.symbol, "ETH");
        assert_eq!(quote.price, 2405.17);
    }

    #[test]
    fn test_usable_price_accepts_positive() {
        assert_eq!(usable_price("ETH", 2405.17).unwrap(), dec!(2405.17));
    }

    #[test]
    fn test_usable_price_rejects_zero_and_nan() {
        assert!(matches!(
            usable_price("ETH", 0.0),
            Err(OracleError::Unavailable(_))
        ));
        assert!(matches!(
            usable_price("ETH", -1.0),
            Err(OracleError::Unavailable(_))
        ));
        assert!(matches!(
            usable_price("ETH", f64::NAN),
            Err(OracleError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_oracle_returns_price() {
        let mut mock = MockPriceOracle::new();
        mock.expect_spot_price()
            .withf(|symbol| symbol == "ETH")
            .times(1)
            .returning(|_| Ok(dec!(2400)));

        let price = mock.spot_price("ETH").await.unwrap();
        assert_eq!(price, dec!(2400));
    }
}
