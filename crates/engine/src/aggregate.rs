//! Cross-result reporting: alignment, equal-weight aggregation, static
//! optimized portfolios, best-per-symbol selection and sorting

use rayon::prelude::*;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::optimizer::{select_candidates, OptimizationOutcome, OptimizerConfig, PortfolioOptimizer};
use crate::returns::series_daily_returns;
use crate::sharpe;
use crate::stitcher::{balance_to_f64, to_money};
use crate::types::{BacktestResult, EquityPoint, OptimalPortfolio, SeriesPoint};

// ============================================================================
// Alignment
// ============================================================================

/// Keep only results whose curve has the maximum length across the set
pub fn align_results(results: Vec<BacktestResult>) -> Vec<BacktestResult> {
    let Some(max_len) = results.iter().map(BacktestResult::len).max() else {
        return results;
    };

    let (kept, removed): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.len() == max_len);
    for r in &removed {
        info!(symbol = %r.symbol, strategy = %r.strategy, len = r.len(), expected = max_len, "Removed misaligned result");
    }
    kept
}

// ============================================================================
// Equal-weight aggregation
// ============================================================================

/// Summary of an equal-weight basket of all results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub final_equity: Decimal,
    pub return_pct: f64,
    pub max_drawdown_pct: f64,
    pub average_sharpe: f64,
    pub combined_sharpe: f64,
    pub total_trades: u64,
    pub avg_trade_duration_days: f64,
    pub symbols: usize,
    pub equity: Vec<SeriesPoint>,
    pub drawdown: Vec<SeriesPoint>,
}

/// Average every result's equity and drawdown point by point.
///
/// The combined Sharpe is scored at `risk_free_rate`. Returns `None` when
/// there is nothing to aggregate.
pub fn aggregate_equal_weight(
    results: &[BacktestResult],
    starting_balance: Decimal,
    risk_free_rate: f64,
) -> Result<Option<AggregateReport>> {
    let balance = balance_to_f64(starting_balance)?;
    let Some(first) = results.first() else {
        info!("No results to aggregate.");
        return Ok(None);
    };

    let n = results.len() as f64;
    let len = results.iter().map(BacktestResult::len).min().unwrap_or(0);
    let equal = vec![1.0 / n; results.len()];
    let refs: Vec<&BacktestResult> = results.iter().collect();
    let (equity, drawdown) = weighted_curves(&refs, &equal, &first.equity_curve[..len]);

    let Some(last) = equity.last() else {
        info!("No results to aggregate.");
        return Ok(None);
    };

    let report = AggregateReport {
        final_equity: to_money(last.value),
        return_pct: pct_change(balance, last.value),
        max_drawdown_pct: max_value(&drawdown),
        average_sharpe: results.iter().map(|r| r.sharpe).sum::<f64>() / n,
        combined_sharpe: sharpe::score(&series_daily_returns(&equity), risk_free_rate),
        total_trades: results.iter().map(|r| u64::from(r.total_trades)).sum(),
        avg_trade_duration_days: results.iter().map(|r| r.avg_trade_duration_days).sum::<f64>() / n,
        symbols: results.len(),
        equity,
        drawdown,
    };

    info!(
        symbols = report.symbols,
        final_equity = %report.final_equity,
        return_pct = report.return_pct,
        combined_sharpe = report.combined_sharpe,
        "Equal-weight aggregate"
    );

    Ok(Some(report))
}

// ============================================================================
// Static optimized portfolio
// ============================================================================

/// Full-horizon optimized portfolio applied to whole curves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioReport {
    pub portfolio: OptimalPortfolio,
    pub optimized_sharpe: f64,
    pub final_equity: Decimal,
    pub return_pct: f64,
    pub max_drawdown_pct: f64,
    pub converged: bool,
    pub equity: Vec<SeriesPoint>,
    pub drawdown: Vec<SeriesPoint>,
}

/// Optimize over full curves and report `sum(w_i * curve_i)`.
///
/// Returns `None` when no candidate passes selection.
pub fn optimized_portfolio_report(
    results: &[BacktestResult],
    strategy_limit: usize,
    starting_balance: Decimal,
    config: &OptimizerConfig,
) -> Result<Option<PortfolioReport>> {
    let balance = balance_to_f64(starting_balance)?;
    let optimizer = PortfolioOptimizer::new(config.clone())?;
    let outcome: OptimizationOutcome = optimizer.optimize(results, strategy_limit);

    let (candidates, _) = select_candidates(results, strategy_limit, optimizer.config());
    let Some(first) = candidates.first() else {
        info!("No results to aggregate.");
        return Ok(None);
    };

    let len = candidates.iter().map(|r| r.len()).min().unwrap_or(0);
    let (equity, drawdown) = weighted_curves(&candidates, &outcome.raw_weights, &first.equity_curve[..len]);
    let Some(last) = equity.last() else {
        return Ok(None);
    };

    Ok(Some(PortfolioReport {
        final_equity: to_money(last.value),
        return_pct: pct_change(balance, last.value),
        max_drawdown_pct: max_value(&drawdown),
        optimized_sharpe: outcome.score,
        converged: outcome.converged,
        portfolio: outcome.portfolio,
        equity,
        drawdown,
    }))
}

fn weighted_curves(
    results: &[&BacktestResult],
    weights: &[f64],
    index: &[EquityPoint],
) -> (Vec<SeriesPoint>, Vec<SeriesPoint>) {
    index
        .iter()
        .enumerate()
        .map(|(t, p)| {
            let (value, dd) = results
                .iter()
                .zip(weights)
                .fold((0.0_f64, 0.0_f64), |(v, d), (r, w)| {
                    let point = r.equity_curve[t];
                    (v + w * point.equity, d + w * point.drawdown_pct)
                });
            (
                SeriesPoint { time: p.time, value },
                SeriesPoint { time: p.time, value: dd },
            )
        })
        .unzip()
}

fn pct_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        0.0
    } else {
        (to - from) / from * 100.0
    }
}

fn max_value(series: &[SeriesPoint]) -> f64 {
    series.iter().map(|p| p.value).fold(0.0, f64::max)
}

// ============================================================================
// Best strategy per symbol
// ============================================================================

/// How often each strategy was the best one for a symbol
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyTally {
    pub counts: BTreeMap<String, usize>,
}

impl StrategyTally {
    pub fn record(&mut self, strategy: &str) {
        *self.counts.entry(strategy.to_string()).or_insert(0) += 1;
    }

    /// Strategy chosen most often; ties go to the first in name order
    pub fn most_selected(&self) -> Option<(&str, usize)> {
        self.counts
            .iter()
            .fold(None, |best: Option<(&str, usize)>, (name, &count)| match best {
                Some((_, c)) if c >= count => best,
                _ => Some((name.as_str(), count)),
            })
    }
}

/// For each symbol the result with the highest positive Sharpe, plus the tally
pub fn best_per_symbol(results: &[BacktestResult]) -> (Vec<BacktestResult>, StrategyTally) {
    let mut by_symbol: BTreeMap<&str, Vec<&BacktestResult>> = BTreeMap::new();
    for r in results {
        by_symbol.entry(r.symbol.as_str()).or_default().push(r);
    }
    let groups: Vec<Vec<&BacktestResult>> = by_symbol.into_values().collect();

    let winners: Vec<BacktestResult> = groups
        .par_iter()
        .filter_map(|group| {
            group
                .iter()
                .copied()
                .filter(|r| r.sharpe.is_finite() && r.sharpe > 0.0)
                .fold(None::<&BacktestResult>, |best, r| match best {
                    Some(b) if b.sharpe >= r.sharpe => Some(b),
                    _ => Some(r),
                })
                .cloned()
        })
        .collect();

    let mut tally = StrategyTally::default();
    for w in &winners {
        debug!(symbol = %w.symbol, strategy = %w.strategy, sharpe = w.sharpe, "Best strategy");
        tally.record(&w.strategy);
    }

    (winners, tally)
}

// ============================================================================
// Sorting & annotation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortCriterion {
    Sharpe,
    Return,
    MaxDrawdown,
    Trades,
}

impl fmt::Display for SortCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortCriterion::Sharpe => write!(f, "sharpe"),
            SortCriterion::Return => write!(f, "return"),
            SortCriterion::MaxDrawdown => write!(f, "max_drawdown"),
            SortCriterion::Trades => write!(f, "trades"),
        }
    }
}

impl FromStr for SortCriterion {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sharpe" => Ok(SortCriterion::Sharpe),
            "return" => Ok(SortCriterion::Return),
            "max_drawdown" | "drawdown" => Ok(SortCriterion::MaxDrawdown),
            "trades" => Ok(SortCriterion::Trades),
            other => Err(EngineError::InvalidInput(format!("unknown sort criterion: {other}"))),
        }
    }
}

/// Best first: descending, except drawdown which is ascending
pub fn sort_results(results: &mut [BacktestResult], criterion: SortCriterion) {
    match criterion {
        SortCriterion::Sharpe => results.sort_by(|a, b| b.sharpe.total_cmp(&a.sharpe)),
        SortCriterion::Return => results.sort_by(|a, b| b.return_pct.total_cmp(&a.return_pct)),
        SortCriterion::MaxDrawdown => {
            results.sort_by(|a, b| a.max_drawdown_pct.total_cmp(&b.max_drawdown_pct))
        }
        SortCriterion::Trades => results.sort_by(|a, b| b.total_trades.cmp(&a.total_trades)),
    }
}

/// Copies of `results` with `weight` set from the portfolio (0 when not held)
pub fn annotate_weights(results: &[BacktestResult], portfolio: &OptimalPortfolio) -> Vec<BacktestResult> {
    let weights: HashMap<(&str, &str), f64> = portfolio
        .entries()
        .map(|(symbol, e)| ((symbol, e.strategy.as_str()), e.weight))
        .collect();

    results
        .iter()
        .map(|r| BacktestResult {
            weight: Some(
                weights
                    .get(&(r.symbol.as_str(), r.strategy.as_str()))
                    .copied()
                    .unwrap_or(0.0),
            ),
            ..r.clone()
        })
        .collect()
}
