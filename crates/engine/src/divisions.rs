//! Walk-forward division scheduling
//!
//! The common curve horizon is cut into N contiguous divisions. Each division
//! is optimized in isolation on its own slice of every curve, in parallel on a
//! rayon pool, and the outcomes are returned in division order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use tracing::{debug, error, info};

use crate::adaptive::AdaptiveProgress;
use crate::error::{EngineError, Result};
use crate::optimizer::{OptimizerConfig, PortfolioOptimizer};
use crate::returns::to_daily_returns;
use crate::sharpe;
use crate::types::{BacktestResult, OptimalPortfolio};

// ============================================================================
// Partitioning
// ============================================================================

/// Half-open index range `[start, end)` over the common curve length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Division {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Division {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Split `[0, len)` into `n` equal divisions; the last one absorbs the remainder
pub fn partition(len: usize, n: usize) -> Result<Vec<Division>> {
    if n == 0 {
        return Err(EngineError::InvalidInput(
            "n_divisions must be at least 1".to_string(),
        ));
    }
    let division_length = len / n;
    if division_length == 0 {
        return Err(EngineError::InvalidInput(format!(
            "curve of length {len} cannot be split into {n} divisions"
        )));
    }

    Ok((0..n)
        .map(|index| {
            let start = index * division_length;
            let end = if index + 1 == n { len } else { start + division_length };
            Division { index, start, end }
        })
        .collect())
}

/// Copy of `result` restricted to one division, with its Sharpe recomputed
/// over the sliced curve.
///
/// Curves shorter than the division are clamped rather than rejected.
pub fn slice_result(result: &BacktestResult, division: &Division, risk_free_rate: f64) -> BacktestResult {
    let end = division.end.min(result.equity_curve.len());
    let start = division.start.min(end);
    let curve = result.equity_curve[start..end].to_vec();
    let sharpe = sharpe::score(&to_daily_returns(&curve), risk_free_rate);

    BacktestResult {
        sharpe,
        equity_curve: curve,
        weight: None,
        ..result.clone()
    }
}

// ============================================================================
// Scheduling
// ============================================================================

/// Optimizer result for one division
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DivisionOutcome {
    pub division: Division,
    pub portfolio: OptimalPortfolio,
    pub score: f64,
    pub candidates: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Set when the division's worker panicked and was replaced by an empty portfolio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl DivisionOutcome {
    fn failed(division: Division, message: String) -> Self {
        Self {
            division,
            portfolio: OptimalPortfolio::empty(),
            score: 0.0,
            candidates: 0,
            iterations: 0,
            converged: false,
            failure: Some(message),
        }
    }
}

/// Per-division outcomes in division order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptiveOutcome {
    pub divisions: Vec<DivisionOutcome>,
}

impl AdaptiveOutcome {
    pub fn portfolios(&self) -> Vec<OptimalPortfolio> {
        self.divisions.iter().map(|d| d.portfolio.clone()).collect()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.divisions.iter().map(|d| d.score).collect()
    }

    pub fn division_ranges(&self) -> Vec<Division> {
        self.divisions.iter().map(|d| d.division).collect()
    }

    pub fn all_converged(&self) -> bool {
        self.divisions.iter().all(|d| d.converged)
    }
}

/// Optimize every division independently and return them in division order
pub fn adaptive_portfolio(
    results: &[BacktestResult],
    n_divisions: usize,
    strategy_limit: usize,
    config: &OptimizerConfig,
) -> Result<AdaptiveOutcome> {
    run_divisions(results, n_divisions, strategy_limit, config, None)
}

pub(crate) fn run_divisions(
    results: &[BacktestResult],
    n_divisions: usize,
    strategy_limit: usize,
    config: &OptimizerConfig,
    progress: Option<&AdaptiveProgress>,
) -> Result<AdaptiveOutcome> {
    if n_divisions == 0 {
        return Err(EngineError::InvalidInput(
            "n_divisions must be at least 1".to_string(),
        ));
    }
    let Some(first) = results.first() else {
        info!("No results to divide");
        return Ok(AdaptiveOutcome::default());
    };

    let divisions = partition(first.len(), n_divisions)?;
    let optimizer = PortfolioOptimizer::new(config.clone())?;

    let (pool, workers) = division_pool(n_divisions)?;

    if let Some(p) = progress {
        p.total_divisions.store(n_divisions as u32, Ordering::Relaxed);
    }

    info!(
        results = results.len(),
        divisions = n_divisions,
        division_length = divisions[0].len(),
        workers,
        strategy_limit,
        "Starting walk-forward optimization"
    );

    let outcomes = dispatch(&pool, &divisions, progress, |division| {
        optimize_division(results, division, strategy_limit, &optimizer)
    });

    info!(
        divisions = outcomes.len(),
        converged = outcomes.iter().filter(|o| o.converged).count(),
        failed = outcomes.iter().filter(|o| o.failure.is_some()).count(),
        "Walk-forward optimization complete"
    );

    Ok(AdaptiveOutcome { divisions: outcomes })
}

/// Pool sized to the smaller of available cores and division count
fn division_pool(n_divisions: usize) -> Result<(rayon::ThreadPool, usize)> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(n_divisions)
        .max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("division-worker-{i}"))
        .build()
        .map_err(|e| EngineError::ThreadPool(e.to_string()))?;
    Ok((pool, workers))
}

/// Run `task` for every division on `pool`, in division order.
///
/// A panicking task is replaced by an empty, failed outcome for its division.
fn dispatch<F>(
    pool: &rayon::ThreadPool,
    divisions: &[Division],
    progress: Option<&AdaptiveProgress>,
    task: F,
) -> Vec<DivisionOutcome>
where
    F: Fn(&Division) -> DivisionOutcome + Sync,
{
    pool.install(|| {
        divisions
            .par_iter()
            .map(|division| {
                let outcome = catch_unwind(AssertUnwindSafe(|| task(division))).unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    error!(division = division.index, error = %message, "Division optimization panicked");
                    DivisionOutcome::failed(*division, message)
                });
                if let Some(p) = progress {
                    p.completed.fetch_add(1, Ordering::Relaxed);
                }
                outcome
            })
            .collect()
    })
}

fn optimize_division(
    results: &[BacktestResult],
    division: &Division,
    strategy_limit: usize,
    optimizer: &PortfolioOptimizer,
) -> DivisionOutcome {
    let risk_free_rate = optimizer.config().risk_free_rate;
    let sliced: Vec<BacktestResult> = results
        .iter()
        .map(|r| slice_result(r, division, risk_free_rate))
        .collect();

    let outcome = optimizer.optimize(&sliced, strategy_limit);

    debug!(
        division = division.index,
        start = division.start,
        end = division.end,
        candidates = outcome.candidates,
        score = outcome.score,
        "Division optimized"
    );

    DivisionOutcome {
        division: *division,
        portfolio: outcome.portfolio,
        score: outcome.score,
        candidates: outcome.candidates,
        iterations: outcome.iterations,
        converged: outcome.converged,
        failure: None,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EquityPoint;

    const DAY: i64 = 86_400_000;

    fn wavy_result(symbol: &str, drift: f64, days: usize) -> BacktestResult {
        let mut equity = 100_000.0;
        let curve = (0..days)
            .map(|i| {
                if i > 0 {
                    equity *= 1.0 + drift + if i % 2 == 0 { 0.004 } else { -0.004 };
                }
                EquityPoint {
                    time: i as i64 * DAY,
                    equity,
                    drawdown_pct: 0.0,
                }
            })
            .collect();
        BacktestResult::new(symbol, "s", 0.0, curve)
    }

    #[test]
    fn test_partition_covers_horizon() {
        let divisions = partition(103, 4).unwrap();
        assert_eq!(divisions.len(), 4);
        assert_eq!(divisions[0], Division { index: 0, start: 0, end: 25 });
        assert_eq!(divisions[2].range(), 50..75);
        assert_eq!(divisions[3], Division { index: 3, start: 75, end: 103 });
        for pair in divisions.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_partition_rejects_bad_counts() {
        assert!(partition(10, 0).is_err());
        assert!(partition(3, 4).is_err());
        assert_eq!(partition(4, 4).unwrap().len(), 4);
    }

    #[test]
    fn test_slice_recomputes_sharpe() {
        let result = wavy_result("AAA", 0.002, 60);
        let division = Division { index: 1, start: 20, end: 40 };
        let sliced = slice_result(&result, &division, 0.03);

        assert_eq!(sliced.len(), 20);
        assert_eq!(sliced.equity_curve[0], result.equity_curve[20]);
        let expected = sharpe::score(&to_daily_returns(&result.equity_curve[20..40]), 0.03);
        assert_eq!(sliced.sharpe, expected);
        assert_ne!(sliced.sharpe, result.sharpe);
    }

    #[test]
    fn test_slice_clamps_short_curves() {
        let result = wavy_result("AAA", 0.001, 10);
        let division = Division { index: 2, start: 8, end: 15 };
        assert_eq!(slice_result(&result, &division, 0.03).len(), 2);
    }

    #[test]
    fn test_outcomes_are_in_division_order() {
        let results = vec![
            wavy_result("AAA", 0.003, 120),
            wavy_result("BBB", -0.001, 120),
            wavy_result("CCC", 0.001, 120),
        ];
        let outcome = adaptive_portfolio(&results, 4, 3, &OptimizerConfig::default()).unwrap();

        assert_eq!(outcome.divisions.len(), 4);
        for (i, d) in outcome.divisions.iter().enumerate() {
            assert_eq!(d.division.index, i);
            assert!(d.failure.is_none());
            assert!(d.candidates <= 3);
        }
        assert_eq!(outcome.scores().len(), 4);
    }

    #[test]
    fn test_panicking_division_becomes_empty_portfolio() {
        let divisions = partition(40, 4).unwrap();
        let (pool, _) = division_pool(divisions.len()).unwrap();
        let progress = AdaptiveProgress::new();

        let outcomes = dispatch(&pool, &divisions, Some(&progress), |division| {
            if division.index == 2 {
                panic!("solver blew up on division {}", division.index);
            }
            let mut portfolio = OptimalPortfolio::empty();
            portfolio.score = division.index as f64;
            DivisionOutcome {
                division: *division,
                portfolio,
                score: division.index as f64,
                candidates: 1,
                iterations: 3,
                converged: true,
                failure: None,
            }
        });

        assert_eq!(outcomes.len(), 4);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.division.index, i);
            if i == 2 {
                let message = outcome.failure.as_deref().unwrap();
                assert!(message.contains("solver blew up on division 2"));
                assert!(outcome.portfolio.is_empty());
                assert_eq!(outcome.score, 0.0);
                assert!(!outcome.converged);
            } else {
                assert!(outcome.failure.is_none());
                assert_eq!(outcome.score, i as f64);
            }
        }
        assert_eq!(progress.completed.load(Ordering::Relaxed), 4);

        let adaptive = AdaptiveOutcome { divisions: outcomes };
        assert!(!adaptive.all_converged());
        assert_eq!(adaptive.portfolios().len(), 4);
    }

    #[test]
    fn test_empty_results_yield_no_divisions() {
        let outcome = adaptive_portfolio(&[], 3, 2, &OptimizerConfig::default()).unwrap();
        assert!(outcome.divisions.is_empty());
        assert!(adaptive_portfolio(&[], 0, 2, &OptimizerConfig::default()).is_err());
    }

    #[test]
    fn test_progress_counts_divisions() {
        let results = vec![wavy_result("AAA", 0.002, 90)];
        let progress = AdaptiveProgress::new();
        run_divisions(&results, 3, 1, &OptimizerConfig::default(), Some(&progress)).unwrap();
        assert_eq!(progress.completed.load(Ordering::Relaxed), 3);
        assert_eq!(progress.progress_pct(), 100.0);
    }
}
