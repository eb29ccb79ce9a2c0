//! Swap executor adapter.
//!
//! The executor performs the reversing trade on-venue and is the sole
//! authority on success. It is not assumed idempotent: the registry's exit
//! gate guarantees at most one call per position.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use common::{ReversingRequest, SwapReceipt};

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("swap request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("swap rejected: {0}")]
    Rejected(String),
}

/// Trait for reversing-trade execution.
/// Mockable for testing via mockall.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapExecutor: Send + Sync {
    async fn execute(&self, request: &ReversingRequest) -> Result<SwapReceipt, SwapError>;
}

/// Response from the execution relayer.
#[derive(Debug, Clone, Deserialize)]
struct SwapResponse {
    success: bool,
    tx_hash: Option<String>,
    error: Option<String>,
}

/// HTTP client for the execution relayer.
pub struct HttpSwapExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSwapExecutor {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SwapExecutor for HttpSwapExecutor {
    async fn execute(&self, request: &ReversingRequest) -> Result<SwapReceipt, SwapError> {
        let url = format!("{}/swaps", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(SwapError::Rejected(format!("HTTP {}", response.status())));
        }
        let body: SwapResponse = response.json().await?;
        if !body.success {
            return Err(SwapError::Rejected(
                body.error
                    .unwrap_or_else(|| "unknown executor error".to_string()),
            ));
        }
        match body.tx_hash {
            Some(tx_hash) => Ok(SwapReceipt {
                tx_hash,
                executed_at: Utc::now(),
            }),
            None => Err(SwapError::Rejected(
                "executor returned no tx hash".to_string(),
            )),
        }
    }
}

/// Simulated executor for dry runs: every exit succeeds with a fake hash.
pub struct DryRunSwapExecutor;

impl DryRunSwapExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DryRunSwapExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwapExecutor for DryRunSwapExecutor {
    async fn execute(&self, request: &ReversingRequest) -> Result<SwapReceipt, SwapError> {
        info!(
            "[DRY RUN] {} {} {} (trade {})",
            request.side, request.amount, request.token_symbol, request.trade_id
        );
        Ok(SwapReceipt {
            tx_hash: format!("dry-run-{}", Uuid::new_v4()),
            executed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Side;
    use rust_decimal_macros::dec;

    fn request() -> ReversingRequest {
        ReversingRequest {
            trade_id: "trade-1".to_string(),
            user_id: "user-1".to_string(),
            safe_address: "0xsafe".to_string(),
            network_key: "base".to_string(),
            token_symbol: "ETH".to_string(),
            side: Side::Sell,
            amount: dec!(0.1),
        }
    }

    #[test]
    fn test_parse_relayer_response() {
        let json = r#"{"success":true,"tx_hash":"0xabc","error":null}"#;
        let response: SwapResponse = serde_json::from_str(json).unwrap();
        assert!(response.success);
        assert_eq!(response.tx_hash.as_deref(), Some("0xabc"));

        let json = r#"{"success":false,"tx_hash":null,"error":"insufficient liquidity"}"#;
        let response: SwapResponse = serde_json::from_str(json).unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("insufficient liquidity"));
    }

    #[test]
    fn test_reversing_request_serializes_side_lowercase() {
        let body = serde_json::to_value(request()).unwrap();
        assert_eq!(body["side"], "sell");
        assert_eq!(body["token_symbol"], "ETH");
    }

    #[tokio::test]
    async fn test_dry_run_executor_always_succeeds() {
        let executor = DryRunSwapExecutor::new();
        let receipt = executor.execute(&request()).await.unwrap();
        assert!(receipt.tx_hash.starts_with("dry-run-"));
    }

    #[tokio::test]
    async fn test_mock_executor_rejects() {
        let mut mock = MockSwapExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Err(SwapError::Rejected("venue down".to_string())));

        let result = mock.execute(&request()).await;
        assert!(matches!(result, Err(SwapError::Rejected(_))));
    }
}
