//! Stratfolio Engine: portfolio construction and walk-forward adaptation
//!
//! Provides:
//! - Daily return transform and geometric-mean Sharpe scoring
//! - Constrained weight optimizer over scored (symbol, strategy) results
//! - Division scheduler running one optimization per time slice in parallel
//! - Out-of-sample curve stitching and cross-result reporting

pub mod adaptive;
pub mod aggregate;
pub mod divisions;
pub mod error;
pub mod optimizer;
pub mod returns;
pub mod sharpe;
pub mod solver;
pub mod stitcher;
pub mod types;

use std::path::Path;

// Re-exports for convenience
pub use adaptive::{
    run_adaptive, run_adaptive_tracked, AdaptiveProgress, AdaptiveRequest, AdaptiveRun,
    AdaptiveStatus,
};
pub use aggregate::{
    aggregate_equal_weight, align_results, annotate_weights, best_per_symbol,
    optimized_portfolio_report, sort_results, AggregateReport, PortfolioReport, SortCriterion,
    StrategyTally,
};
pub use divisions::{adaptive_portfolio, partition, slice_result, AdaptiveOutcome, Division, DivisionOutcome};
pub use error::{EngineError, Result};
pub use optimizer::{optimize, OptimizationOutcome, OptimizerConfig, PortfolioOptimizer};
pub use returns::{to_daily_returns, ReturnSeries};
pub use sharpe::{score, score_weighted};
pub use stitcher::{stitch, stitch_with_rate, StitchReport, StitchedCurve};
pub use types::*;

/// Load backtest results from a JSON array file
pub fn load_results(path: impl AsRef<Path>) -> Result<Vec<BacktestResult>> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let results: Vec<BacktestResult> = serde_json::from_str(&raw)?;
    let empty = results.iter().filter(|r| r.is_empty()).count();
    if empty > 0 {
        return Err(EngineError::InvalidInput(format!(
            "{empty} result(s) in {} have an empty equity curve",
            path.as_ref().display()
        )));
    }
    tracing::info!(path = %path.as_ref().display(), results = results.len(), "Loaded backtest results");
    Ok(results)
}
