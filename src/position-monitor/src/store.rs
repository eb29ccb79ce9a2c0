//! Durable position store.
//!
//! Postgres holds the canonical position rows; the in-memory registry is a
//! runtime view of the store's active set. The table name comes from
//! configuration and is validated to be a bare identifier at config load.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use common::{HistoryFilter, NewPosition, PositionRecord, TerminalUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Trait for the durable position store.
/// Mockable for testing via mockall.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Persist a new active position. The returned id is stable for the
    /// lifetime of the position and durable before this returns.
    async fn insert(&self, position: &NewPosition) -> Result<Uuid, StoreError>;

    /// All rows whose status is still `active`.
    async fn list_active(&self) -> Result<Vec<PositionRecord>, StoreError>;

    /// Apply a terminal transition. Repeated terminal writes for the same id
    /// are last-writer-wins; the registry gate makes repeats impossible
    /// within one process.
    async fn update_status(&self, id: Uuid, update: &TerminalUpdate) -> Result<(), StoreError>;

    /// Terminal rows, newest first.
    async fn get_history(&self, filter: &HistoryFilter) -> Result<Vec<PositionRecord>, StoreError>;

    /// Single row by the user-facing trade id.
    async fn get_by_trade_id(&self, trade_id: &str)
        -> Result<Option<PositionRecord>, StoreError>;
}

const COLUMNS: &str = "id, trade_id, user_id, safe_address, network_key, token_symbol, side, \
                       entry_price, entry_amount, tp1, tp2, sl, max_exit_time, status, \
                       highest_favorable_price, trailing_stop_price, trailing_stop_enabled, \
                       price_check_count, last_price_check, entry_tx_hash, executed_at, \
                       exit_kind, exit_price, exit_amount, profit_loss, exited_at, error, \
                       failed_at, created_at, updated_at";

/// Postgres-backed position store.
pub struct PgPositionStore {
    pool: PgPool,
    table: String,
}

impl PgPositionStore {
    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl PositionStore for PgPositionStore {
    async fn insert(&self, position: &NewPosition) -> Result<Uuid, StoreError> {
        let sql = format!(
            "INSERT INTO {} (trade_id, user_id, safe_address, network_key, token_symbol, side, \
             entry_price, entry_amount, tp1, tp2, sl, max_exit_time, status, \
             highest_favorable_price, trailing_stop_price, trailing_stop_enabled, \
             price_check_count, entry_tx_hash, executed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'active', \
             $13, $14, $15, 0, $16, $17) \
             RETURNING id",
            self.table
        );
        let id = sqlx::query_scalar::<_, Uuid>(&sql)
            .bind(&position.trade_id)
            .bind(&position.user_id)
            .bind(&position.safe_address)
            .bind(&position.network_key)
            .bind(&position.token_symbol)
            .bind(position.side)
            .bind(position.entry_price)
            .bind(position.entry_amount)
            .bind(position.tp1)
            .bind(position.tp2)
            .bind(position.sl)
            .bind(position.max_exit_time)
            .bind(position.highest_favorable_price)
            .bind(position.trailing_stop_price)
            .bind(position.trailing_stop_enabled)
            .bind(&position.entry_tx_hash)
            .bind(position.executed_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn list_active(&self) -> Result<Vec<PositionRecord>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE status = 'active' ORDER BY executed_at ASC",
            self.table
        );
        let records = sqlx::query_as::<_, PositionRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn update_status(&self, id: Uuid, update: &TerminalUpdate) -> Result<(), StoreError> {
        match update {
            TerminalUpdate::Exited {
                kind,
                exit_price,
                exit_amount,
                profit_loss,
                exited_at,
            } => {
                let sql = format!(
                    "UPDATE {} SET status = 'exited', exit_kind = $2, exit_price = $3, \
                     exit_amount = $4, profit_loss = $5, exited_at = $6, updated_at = NOW() \
                     WHERE id = $1",
                    self.table
                );
                sqlx::query(&sql)
                    .bind(id)
                    .bind(kind.as_str())
                    .bind(*exit_price)
                    .bind(*exit_amount)
                    .bind(*profit_loss)
                    .bind(*exited_at)
                    .execute(&self.pool)
                    .await?;
            }
            TerminalUpdate::Failed { error, failed_at } => {
                let sql = format!(
                    "UPDATE {} SET status = 'failed', error = $2, failed_at = $3, \
                     updated_at = NOW() WHERE id = $1",
                    self.table
                );
                sqlx::query(&sql)
                    .bind(id)
                    .bind(error)
                    .bind(*failed_at)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn get_history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<Vec<PositionRecord>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE status <> 'active' \
             AND ($1::text IS NULL OR user_id = $1) \
             AND ($2::text IS NULL OR token_symbol = $2) \
             AND ($3::text IS NULL OR status = $3) \
             ORDER BY COALESCE(exited_at, failed_at) DESC NULLS LAST \
             LIMIT $4",
            self.table
        );
        let records = sqlx::query_as::<_, PositionRecord>(&sql)
            .bind(filter.user_id.as_deref())
            .bind(filter.token_symbol.as_deref())
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.limit.unwrap_or(100))
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn get_by_trade_id(
        &self,
        trade_id: &str,
    ) -> Result<Option<PositionRecord>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE trade_id = $1 ORDER BY executed_at DESC LIMIT 1",
            self.table
        );
        let record = sqlx::query_as::<_, PositionRecord>(&sql)
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }
}
