//! Backtest result repository — imported (symbol, strategy) curves

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A stored backtest result; the equity curve is kept as a JSON array
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredResult {
    pub id: Option<i64>,
    pub result_hash: String,
    pub symbol: String,
    pub strategy: String,
    pub sharpe: f64,
    pub return_pct: f64,
    pub max_drawdown_pct: f64,
    pub total_trades: i64,
    pub avg_trade_duration_days: f64,
    pub points: i64,
    pub equity_curve: String,
    pub created_at: Option<i64>,
}

/// Repository for imported backtest results
pub struct ResultRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ResultRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Save a result (INSERT OR IGNORE; skips if result_hash already exists).
    /// Returns whether a row was inserted.
    pub async fn save(&self, record: &StoredResult) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO backtest_results (
                result_hash, symbol, strategy, sharpe,
                return_pct, max_drawdown_pct, total_trades, avg_trade_duration_days,
                points, equity_curve
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.result_hash)
        .bind(&record.symbol)
        .bind(&record.strategy)
        .bind(record.sharpe)
        .bind(record.return_pct)
        .bind(record.max_drawdown_pct)
        .bind(record.total_trades)
        .bind(record.avg_trade_duration_days)
        .bind(record.points)
        .bind(&record.equity_curve)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Check if a result with this hash already exists
    pub async fn exists_by_hash(&self, hash: &str) -> DbResult<bool> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM backtest_results WHERE result_hash = ?")
                .bind(hash)
                .fetch_one(self.pool)
                .await?;

        Ok(row.0 > 0)
    }

    /// All results in import order
    pub async fn get_all(&self) -> DbResult<Vec<StoredResult>> {
        let records = sqlx::query_as::<_, StoredResult>("SELECT * FROM backtest_results ORDER BY id")
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    /// Results for one symbol, best Sharpe first
    pub async fn get_by_symbol(&self, symbol: &str) -> DbResult<Vec<StoredResult>> {
        let records = sqlx::query_as::<_, StoredResult>(
            "SELECT * FROM backtest_results WHERE symbol = ? ORDER BY sharpe DESC",
        )
        .bind(symbol)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM backtest_results")
            .fetch_one(self.pool)
            .await?;

        Ok(row.0)
    }

    /// Delete every stored result, returning how many were removed
    pub async fn delete_all(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM backtest_results")
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
