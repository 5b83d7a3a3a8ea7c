//! Types for the portfolio engine

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A point on the equity curve, with the drawdown observed at the same time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    /// Unix timestamp in milliseconds
    pub time: i64,
    pub equity: f64,
    /// Peak-to-trough decline as a fraction (0.12 = 12%)
    #[serde(default)]
    pub drawdown_pct: f64,
}

/// One completed simulation for a (symbol, strategy) pair.
///
/// Equity and drawdown share a single time index because they live in the
/// same `EquityPoint`. Curves are strictly chronological and never empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub strategy: String,
    pub sharpe: f64,
    pub equity_curve: Vec<EquityPoint>,
    #[serde(default)]
    pub return_pct: f64,
    #[serde(default)]
    pub max_drawdown_pct: f64,
    #[serde(default)]
    pub total_trades: u32,
    #[serde(default)]
    pub avg_trade_duration_days: f64,
    /// Assigned by the optimizer as an annotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl BacktestResult {
    /// Build a result from its curve; summary stats default to zero
    pub fn new(symbol: &str, strategy: &str, sharpe: f64, equity_curve: Vec<EquityPoint>) -> Self {
        Self {
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
            sharpe,
            equity_curve,
            return_pct: 0.0,
            max_drawdown_pct: 0.0,
            total_trades: 0,
            avg_trade_duration_days: 0.0,
            weight: None,
        }
    }

    pub fn len(&self) -> usize {
        self.equity_curve.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equity_curve.is_empty()
    }

    pub fn final_equity(&self) -> Option<f64> {
        self.equity_curve.last().map(|p| p.equity)
    }

    /// SHA-256 over symbol, strategy and the full curve
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.symbol.as_bytes());
        hasher.update(b":");
        hasher.update(self.strategy.as_bytes());
        for point in &self.equity_curve {
            hasher.update(point.time.to_le_bytes());
            hasher.update(point.equity.to_le_bytes());
            hasher.update(point.drawdown_pct.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// A selected (strategy, weight) entry of an optimal portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioEntry {
    pub strategy: String,
    pub weight: f64,
    pub sharpe: f64,
}

/// Output of one optimizer run: symbol -> ordered entries, plus the achieved score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimalPortfolio {
    pub holdings: BTreeMap<String, Vec<PortfolioEntry>>,
    pub score: f64,
}

impl OptimalPortfolio {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    /// Iterate `(symbol, entry)` pairs in symbol order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &PortfolioEntry)> {
        self.holdings
            .iter()
            .flat_map(|(symbol, entries)| entries.iter().map(move |e| (symbol.as_str(), e)))
    }

    pub fn total_weight(&self) -> f64 {
        self.entries().map(|(_, e)| e.weight).sum()
    }

    pub fn weight_of(&self, symbol: &str, strategy: &str) -> Option<f64> {
        self.holdings
            .get(symbol)?
            .iter()
            .find(|e| e.strategy == strategy)
            .map(|e| e.weight)
    }

    pub fn len(&self) -> usize {
        self.holdings.values().map(Vec::len).sum()
    }
}

/// A point of a stitched or aggregated series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub time: i64,
    pub value: f64,
}
