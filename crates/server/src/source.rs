//! Where backtest results come from: a JSON export or the local database

use anyhow::Context;
use async_trait::async_trait;
use engine::{BacktestResult, EquityPoint};
use persistence::{SqlitePool, StoredResult};
use std::path::PathBuf;

#[async_trait]
pub trait ResultSource: Send + Sync {
    /// Human-readable origin, for logs
    fn describe(&self) -> String;

    async fn load(&self) -> anyhow::Result<Vec<BacktestResult>>;
}

/// JSON array of results produced by the backtest simulator
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResultSource for JsonFileSource {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    async fn load(&self) -> anyhow::Result<Vec<BacktestResult>> {
        let path = self.path.clone();
        let results = tokio::task::spawn_blocking(move || engine::load_results(&path)).await??;
        Ok(results)
    }
}

/// Results previously imported into SQLite
pub struct DatabaseSource {
    pool: SqlitePool,
}

impl DatabaseSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultSource for DatabaseSource {
    fn describe(&self) -> String {
        "database".to_string()
    }

    async fn load(&self) -> anyhow::Result<Vec<BacktestResult>> {
        let records = persistence::ResultRepository::new(&self.pool).get_all().await?;
        records.into_iter().map(from_record).collect()
    }
}

// ============================================================================
// Record conversion
// ============================================================================

pub fn to_record(result: &BacktestResult) -> anyhow::Result<StoredResult> {
    Ok(StoredResult {
        id: None,
        result_hash: result.fingerprint(),
        symbol: result.symbol.clone(),
        strategy: result.strategy.clone(),
        sharpe: result.sharpe,
        return_pct: result.return_pct,
        max_drawdown_pct: result.max_drawdown_pct,
        total_trades: i64::from(result.total_trades),
        avg_trade_duration_days: result.avg_trade_duration_days,
        points: result.len() as i64,
        equity_curve: serde_json::to_string(&result.equity_curve)?,
        created_at: None,
    })
}

pub fn from_record(record: StoredResult) -> anyhow::Result<BacktestResult> {
    let curve: Vec<EquityPoint> = serde_json::from_str(&record.equity_curve)
        .with_context(|| format!("equity curve of {}/{}", record.symbol, record.strategy))?;

    let mut result = BacktestResult::new(&record.symbol, &record.strategy, record.sharpe, curve);
    result.return_pct = record.return_pct;
    result.max_drawdown_pct = record.max_drawdown_pct;
    result.total_trades = u32::try_from(record.total_trades).unwrap_or(0);
    result.avg_trade_duration_days = record.avg_trade_duration_days;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::Database;

    fn sample() -> BacktestResult {
        let curve = (0..5)
            .map(|i| EquityPoint {
                time: i * 86_400_000,
                equity: 100_000.0 + 250.0 * i as f64,
                drawdown_pct: 0.0,
            })
            .collect();
        let mut result = BacktestResult::new("GC=F", "buy_after_red_day", 0.8, curve);
        result.total_trades = 9;
        result.return_pct = 1.0;
        result
    }

    #[tokio::test]
    async fn test_database_source_reads_imported_results() {
        let db = Database::in_memory().await.unwrap();
        let original = sample();
        assert!(db.results().save(&to_record(&original).unwrap()).await.unwrap());

        let loaded = DatabaseSource::new(db.pool_clone()).load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].equity_curve, original.equity_curve);
        assert_eq!(loaded[0].total_trades, 9);
        assert_eq!(loaded[0].fingerprint(), original.fingerprint());
    }

    #[tokio::test]
    async fn test_json_file_source() {
        let path = std::env::temp_dir().join(format!("stratfolio-source-{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&vec![sample()]).unwrap()).unwrap();

        let source = JsonFileSource::new(&path);
        let loaded = source.load().await.unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "GC=F");
        assert!(source.describe().starts_with("file "));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let source = JsonFileSource::new("/nonexistent/stratfolio.json");
        assert!(source.load().await.is_err());
    }
}
