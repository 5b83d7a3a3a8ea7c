//! Portfolio weight optimization over scored (symbol, strategy) results
//!
//! Selects candidates with a Sharpe threshold sized to the strategy budget,
//! then solves for non-negative weights summing to one that maximize the
//! weighted Sharpe of the candidates' daily returns.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::returns::to_daily_returns;
use crate::sharpe::{ReturnMatrix, DEFAULT_RISK_FREE_RATE};
use crate::solver::{maximize_on_simplex, SolverSettings};
use crate::types::{BacktestResult, OptimalPortfolio, PortfolioEntry};

// ============================================================================
// Types
// ============================================================================

/// Optimizer tuning; defaults reproduce the reference constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Annual risk-free rate as a fraction (0.03 = 3%)
    pub risk_free_rate: f64,
    /// First Sharpe threshold tried by the candidate search
    pub threshold_start: f64,
    /// Increment of the candidate search
    pub threshold_step: f64,
    /// Weights at or below this are dropped from the reported portfolio
    pub materiality: f64,
    /// Per-asset floor is `floor_factor / n`
    pub floor_factor: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Wall-clock cap per solve; the best iterate so far is used when hit
    pub max_duration_ms: Option<u64>,
    /// Ordered strategy identifiers eligible for selection (empty = all)
    pub strategies: Vec<String>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            threshold_start: -1.0,
            threshold_step: 0.025,
            materiality: 0.01,
            floor_factor: 0.5,
            max_iterations: 500,
            tolerance: 1e-10,
            max_duration_ms: None,
            strategies: Vec::new(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold_step > 0.0 && self.threshold_step.is_finite()) {
            return Err(EngineError::InvalidInput(format!(
                "threshold_step must be positive, got {}",
                self.threshold_step
            )));
        }
        if !self.threshold_start.is_finite() {
            return Err(EngineError::InvalidInput(
                "threshold_start must be finite".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.floor_factor) {
            return Err(EngineError::InvalidInput(format!(
                "floor_factor must be within [0, 1], got {}",
                self.floor_factor
            )));
        }
        if !(0.0..1.0).contains(&self.materiality) {
            return Err(EngineError::InvalidInput(format!(
                "materiality must be within [0, 1), got {}",
                self.materiality
            )));
        }
        Ok(())
    }

    /// Whether a strategy identifier passes the configured inclusion list
    pub fn includes_strategy(&self, strategy: &str) -> bool {
        self.strategies.is_empty() || self.strategies.iter().any(|s| s == strategy)
    }

    fn solver_settings(&self) -> SolverSettings {
        SolverSettings {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            deadline: self
                .max_duration_ms
                .map(|ms| Instant::now() + Duration::from_millis(ms)),
        }
    }
}

/// Everything one optimizer run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub portfolio: OptimalPortfolio,
    /// Achieved weighted Sharpe (0 for an empty candidate set, the undefined
    /// sentinel when the combination has no volatility)
    pub score: f64,
    /// Solver weights before the materiality filter, in candidate order
    pub raw_weights: Vec<f64>,
    pub candidates: usize,
    pub threshold: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl OptimizationOutcome {
    fn empty(threshold: f64) -> Self {
        Self {
            portfolio: OptimalPortfolio::empty(),
            score: 0.0,
            raw_weights: Vec::new(),
            candidates: 0,
            threshold,
            iterations: 0,
            converged: true,
        }
    }
}

// ============================================================================
// Candidate Selection
// ============================================================================

/// Lowest threshold on the grid `threshold_start + k * threshold_step` that
/// admits at most `strategy_limit` Sharpes.
///
/// Non-finite Sharpes are ignored. The grid point is derived from the first
/// Sharpe that has to be excluded instead of walking the grid, so the cost
/// does not depend on the magnitude of the Sharpes.
pub fn sharpe_threshold(sharpes: &[f64], strategy_limit: usize, config: &OptimizerConfig) -> f64 {
    let start = config.threshold_start;
    let step = config.threshold_step;

    let mut finite: Vec<f64> = sharpes.iter().copied().filter(|s| s.is_finite()).collect();
    if finite.len() <= strategy_limit {
        return start;
    }
    finite.sort_by(|a, b| b.total_cmp(a));

    // This Sharpe and every one above it must fall below the threshold
    let excluded = finite[strategy_limit];
    if excluded < start {
        return start;
    }

    let grid = |k: f64| start + k * step;
    let mut k = ((excluded - start) / step).floor() + 1.0;
    if k >= 1.0 && grid(k - 1.0) > excluded {
        k -= 1.0;
    }

    [grid(k), grid(k + 1.0)]
        .into_iter()
        .find(|&t| t > excluded)
        // Grid spacing is below f64 resolution at this magnitude
        .unwrap_or_else(|| excluded + (excluded.abs() * 2.0 * f64::EPSILON).max(step))
}

/// Eligible results passing the budget-sized threshold, in input order
pub fn select_candidates<'a>(
    results: &'a [BacktestResult],
    strategy_limit: usize,
    config: &OptimizerConfig,
) -> (Vec<&'a BacktestResult>, f64) {
    let eligible: Vec<&BacktestResult> = results
        .iter()
        .filter(|r| config.includes_strategy(&r.strategy))
        .filter(|r| {
            if r.sharpe.is_finite() {
                true
            } else {
                warn!(symbol = %r.symbol, strategy = %r.strategy, "Skipping result with non-finite Sharpe");
                false
            }
        })
        .collect();

    let sharpes: Vec<f64> = eligible.iter().map(|r| r.sharpe).collect();
    let threshold = sharpe_threshold(&sharpes, strategy_limit, config);
    let candidates = eligible
        .into_iter()
        .filter(|r| r.sharpe >= threshold)
        .collect();

    (candidates, threshold)
}

// ============================================================================
// Optimizer
// ============================================================================

/// Portfolio optimizer with a validated configuration
#[derive(Debug, Clone)]
pub struct PortfolioOptimizer {
    config: OptimizerConfig,
}

impl Default for PortfolioOptimizer {
    fn default() -> Self {
        Self {
            config: OptimizerConfig::default(),
        }
    }
}

impl PortfolioOptimizer {
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Select candidates and solve for the Sharpe-maximizing weights
    pub fn optimize(&self, results: &[BacktestResult], strategy_limit: usize) -> OptimizationOutcome {
        let (candidates, threshold) = select_candidates(results, strategy_limit, &self.config);

        if candidates.is_empty() {
            debug!(threshold, "No candidates passed the Sharpe threshold");
            return OptimizationOutcome::empty(threshold);
        }

        let n = candidates.len();
        let returns: Vec<_> = candidates
            .iter()
            .map(|r| to_daily_returns(&r.equity_curve))
            .collect();
        let matrix = ReturnMatrix::from_series(&returns);
        let risk_free_rate = self.config.risk_free_rate;
        let floor = self.config.floor_factor / n as f64;

        let solved = maximize_on_simplex(
            n,
            floor,
            1.0,
            |w| matrix.objective(w, risk_free_rate),
            &self.config.solver_settings(),
        );
        let score = matrix.score(&solved.weights, risk_free_rate);

        if !solved.converged {
            warn!(
                candidates = n,
                iterations = solved.iterations,
                score,
                "Solver did not converge, using last iterate"
            );
        }

        let mut portfolio = OptimalPortfolio::empty();
        for (result, &weight) in candidates.iter().zip(&solved.weights) {
            if weight > self.config.materiality {
                portfolio
                    .holdings
                    .entry(result.symbol.clone())
                    .or_default()
                    .push(PortfolioEntry {
                        strategy: result.strategy.clone(),
                        weight: round4(weight),
                        sharpe: result.sharpe,
                    });
            }
        }
        portfolio.score = score;

        info!(
            candidates = n,
            threshold,
            retained = portfolio.len(),
            score,
            converged = solved.converged,
            "Portfolio optimized"
        );

        OptimizationOutcome {
            portfolio,
            score,
            raw_weights: solved.weights,
            candidates: n,
            threshold,
            iterations: solved.iterations,
            converged: solved.converged,
        }
    }
}

/// Optimize with default settings, returning the portfolio and its score
pub fn optimize(results: &[BacktestResult], strategy_limit: usize) -> (OptimalPortfolio, f64) {
    let outcome = PortfolioOptimizer::default().optimize(results, strategy_limit);
    (outcome.portfolio, outcome.score)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
