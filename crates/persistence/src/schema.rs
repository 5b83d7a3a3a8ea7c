//! Database schema definitions

/// SQL to create all tables
/// NOTE: Money amounts stored as TEXT to preserve rust_decimal::Decimal precision
pub const CREATE_TABLES: &str = r#"
-- Imported backtest results (one row per symbol/strategy curve)
CREATE TABLE IF NOT EXISTS backtest_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    result_hash TEXT NOT NULL UNIQUE,
    symbol TEXT NOT NULL,
    strategy TEXT NOT NULL,
    sharpe REAL NOT NULL,
    return_pct REAL NOT NULL DEFAULT 0,
    max_drawdown_pct REAL NOT NULL DEFAULT 0,
    total_trades INTEGER NOT NULL DEFAULT 0,
    avg_trade_duration_days REAL NOT NULL DEFAULT 0,
    points INTEGER NOT NULL,
    equity_curve TEXT NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Finished portfolio runs (static or walk-forward)
CREATE TABLE IF NOT EXISTS portfolio_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL UNIQUE,
    mode TEXT NOT NULL,
    n_divisions INTEGER NOT NULL DEFAULT 1,
    strategy_limit INTEGER NOT NULL,
    starting_balance TEXT NOT NULL,
    final_equity TEXT,
    return_pct REAL,
    sharpe REAL,
    portfolios TEXT NOT NULL,
    scores TEXT NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_results_symbol ON backtest_results(symbol, strategy);
CREATE INDEX IF NOT EXISTS idx_results_sharpe ON backtest_results(sharpe DESC);
CREATE INDEX IF NOT EXISTS idx_runs_created ON portfolio_runs(created_at DESC)
"#;

/// Column additions applied after table creation ("duplicate column name" is tolerated)
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE portfolio_runs ADD COLUMN all_converged INTEGER NOT NULL DEFAULT 1",
    "ALTER TABLE portfolio_runs ADD COLUMN strategies TEXT",
];
