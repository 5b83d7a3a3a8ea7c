//! Portfolio run repository — finished static and walk-forward runs

use crate::{DbError, DbResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;

/// A persisted portfolio run. Per-division portfolios and scores are JSON arrays.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PortfolioRunRecord {
    pub id: Option<i64>,
    pub run_id: String,
    /// "static" or "adaptive"
    pub mode: String,
    pub n_divisions: i64,
    pub strategy_limit: i64,
    pub starting_balance: String,
    pub final_equity: Option<String>,
    pub return_pct: Option<f64>,
    pub sharpe: Option<f64>,
    pub portfolios: String,
    pub scores: String,
    pub created_at: Option<i64>,
    // Added via migration
    pub all_converged: i64,
    pub strategies: Option<String>,
}

impl PortfolioRunRecord {
    pub fn starting_balance(&self) -> DbResult<Decimal> {
        parse_decimal("starting_balance", &self.starting_balance)
    }

    pub fn final_equity(&self) -> DbResult<Option<Decimal>> {
        self.final_equity
            .as_deref()
            .map(|v| parse_decimal("final_equity", v))
            .transpose()
    }
}

fn parse_decimal(column: &'static str, value: &str) -> DbResult<Decimal> {
    Decimal::from_str(value).map_err(|e| DbError::Decode {
        column,
        message: format!("{value}: {e}"),
    })
}

/// Repository for finished portfolio runs
pub struct PortfolioRunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PortfolioRunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, record: &PortfolioRunRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO portfolio_runs (
                run_id, mode, n_divisions, strategy_limit, starting_balance,
                final_equity, return_pct, sharpe, portfolios, scores,
                all_converged, strategies
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.run_id)
        .bind(&record.mode)
        .bind(record.n_divisions)
        .bind(record.strategy_limit)
        .bind(&record.starting_balance)
        .bind(&record.final_equity)
        .bind(record.return_pct)
        .bind(record.sharpe)
        .bind(&record.portfolios)
        .bind(&record.scores)
        .bind(record.all_converged)
        .bind(&record.strategies)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent runs first
    pub async fn get_recent(&self, limit: u32) -> DbResult<Vec<PortfolioRunRecord>> {
        let records = sqlx::query_as::<_, PortfolioRunRecord>(
            "SELECT * FROM portfolio_runs ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_by_run_id(&self, run_id: &str) -> DbResult<Option<PortfolioRunRecord>> {
        let record = sqlx::query_as::<_, PortfolioRunRecord>(
            "SELECT * FROM portfolio_runs WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }
}
