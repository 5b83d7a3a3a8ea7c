//! Walk-forward adaptive portfolio runs
//!
//! Ties the division scheduler and the curve stitcher together and exposes a
//! shared progress tracker for callers running the job in the background.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    RwLock,
};
use tracing::info;

use crate::divisions::{run_divisions, AdaptiveOutcome};
use crate::error::Result;
use crate::optimizer::OptimizerConfig;
use crate::stitcher::{stitch_with_rate, StitchedCurve};
use crate::types::BacktestResult;

// ============================================================================
// Request / Result
// ============================================================================

/// Parameters of one walk-forward run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveRequest {
    pub n_divisions: usize,
    pub strategy_limit: usize,
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    /// Ordered strategy inclusion list; replaces the optimizer's list when present
    #[serde(default)]
    pub strategies: Option<Vec<String>>,
}

fn default_starting_balance() -> Decimal {
    dec!(100000)
}

impl AdaptiveRequest {
    pub fn new(n_divisions: usize, strategy_limit: usize, starting_balance: Decimal) -> Self {
        Self {
            n_divisions,
            strategy_limit,
            starting_balance,
            strategies: None,
        }
    }

    fn effective_config(&self, base: &OptimizerConfig) -> OptimizerConfig {
        let mut config = base.clone();
        if let Some(strategies) = &self.strategies {
            config.strategies = strategies.clone();
        }
        config
    }
}

/// Per-division portfolios plus the stitched out-of-sample curve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveRun {
    pub request: AdaptiveRequest,
    pub outcome: AdaptiveOutcome,
    pub curve: StitchedCurve,
}

/// Optimize every division, then stitch the out-of-sample segments
pub fn run_adaptive(
    results: &[BacktestResult],
    request: &AdaptiveRequest,
    config: &OptimizerConfig,
) -> Result<AdaptiveRun> {
    execute(results, request, config, None)
}

/// Same as [`run_adaptive`], reporting into `progress` as divisions finish
pub fn run_adaptive_tracked(
    results: &[BacktestResult],
    request: &AdaptiveRequest,
    config: &OptimizerConfig,
    progress: &AdaptiveProgress,
) -> Result<AdaptiveRun> {
    progress.reset();
    match execute(results, request, config, Some(progress)) {
        Ok(run) => {
            *progress.status.write().unwrap() = AdaptiveStatus::Complete;
            *progress.result.write().unwrap() = Some(run.clone());
            Ok(run)
        }
        Err(e) => {
            *progress.status.write().unwrap() = AdaptiveStatus::Error;
            *progress.error_message.write().unwrap() = Some(e.to_string());
            Err(e)
        }
    }
}

fn execute(
    results: &[BacktestResult],
    request: &AdaptiveRequest,
    config: &OptimizerConfig,
    progress: Option<&AdaptiveProgress>,
) -> Result<AdaptiveRun> {
    let config = request.effective_config(config);
    let outcome = run_divisions(
        results,
        request.n_divisions,
        request.strategy_limit,
        &config,
        progress,
    )?;
    let curve = stitch_with_rate(
        results,
        &outcome.portfolios(),
        &outcome.division_ranges(),
        request.starting_balance,
        config.risk_free_rate,
    )?;

    match &curve.report {
        Some(report) => info!(
            divisions = outcome.divisions.len(),
            final_equity = %report.final_equity,
            sharpe = report.sharpe,
            "Adaptive run complete"
        ),
        None => info!("No results to aggregate."),
    }

    Ok(AdaptiveRun {
        request: request.clone(),
        outcome,
        curve,
    })
}

// ============================================================================
// Progress
// ============================================================================

/// Adaptive run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveStatus {
    Idle,
    Running,
    Complete,
    Error,
}

/// Shared progress tracker between API handler and background task
pub struct AdaptiveProgress {
    pub status: RwLock<AdaptiveStatus>,
    pub total_divisions: AtomicU32,
    pub completed: AtomicU32,
    pub result: RwLock<Option<AdaptiveRun>>,
    pub error_message: RwLock<Option<String>>,
}

impl AdaptiveProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(AdaptiveStatus::Idle),
            total_divisions: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            result: RwLock::new(None),
            error_message: RwLock::new(None),
        }
    }

    /// Reset for a new run
    pub fn reset(&self) {
        let mut status = self.status.write().unwrap();
        self.clear();
        *status = AdaptiveStatus::Running;
    }

    /// Claim the tracker for a new run.
    ///
    /// Returns `false` without touching anything when a run is already in
    /// progress. The status lock is held across the check and the reset, so
    /// of several concurrent callers exactly one wins.
    pub fn try_start(&self) -> bool {
        let mut status = self.status.write().unwrap();
        if *status == AdaptiveStatus::Running {
            return false;
        }
        self.clear();
        *status = AdaptiveStatus::Running;
        true
    }

    fn clear(&self) {
        self.total_divisions.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        *self.result.write().unwrap() = None;
        *self.error_message.write().unwrap() = None;
    }

    /// Get progress as percentage
    pub fn progress_pct(&self) -> f32 {
        let total = self.total_divisions.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32) * 100.0
        }
    }

    pub fn status(&self) -> AdaptiveStatus {
        *self.status.read().unwrap()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), AdaptiveStatus::Running)
    }
}

impl Default for AdaptiveProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EquityPoint;

    const DAY: i64 = 86_400_000;

    fn wavy(symbol: &str, strategy: &str, drift: f64, days: usize) -> BacktestResult {
        let mut equity = 100_000.0;
        let curve = (0..days)
            .map(|i| {
                if i > 0 {
                    equity *= 1.0 + drift + if i % 2 == 0 { 0.005 } else { -0.005 };
                }
                EquityPoint {
                    time: i as i64 * DAY,
                    equity,
                    drawdown_pct: 0.0,
                }
            })
            .collect();
        BacktestResult::new(symbol, strategy, 0.0, curve)
    }

    #[test]
    fn test_run_produces_curve_after_first_division() {
        let results = vec![
            wavy("AAA", "s", 0.002, 120),
            wavy("BBB", "s", 0.001, 120),
        ];
        let request = AdaptiveRequest::new(4, 2, dec!(100000));
        let run = run_adaptive(&results, &request, &OptimizerConfig::default()).unwrap();

        assert_eq!(run.outcome.divisions.len(), 4);
        let first_out_of_sample = results[0].equity_curve[30].time;
        assert!(run.curve.equity.iter().all(|p| p.time >= first_out_of_sample));
        let report = run.curve.report.expect("stitched report");
        assert!(report.final_equity > dec!(100000));
    }

    #[test]
    fn test_request_strategies_override_config() {
        let results = vec![
            wavy("AAA", "keep", 0.002, 60),
            wavy("AAA", "drop", 0.004, 60),
        ];
        let mut request = AdaptiveRequest::new(2, 5, dec!(1000));
        request.strategies = Some(vec!["keep".to_string()]);
        let run = run_adaptive(&results, &request, &OptimizerConfig::default()).unwrap();

        for division in &run.outcome.divisions {
            for (_, entry) in division.portfolio.entries() {
                assert_eq!(entry.strategy, "keep");
            }
        }
    }

    #[test]
    fn test_tracked_run_records_status() {
        let progress = AdaptiveProgress::new();
        assert_eq!(progress.status(), AdaptiveStatus::Idle);

        let results = vec![wavy("AAA", "s", 0.002, 60)];
        run_adaptive_tracked(&results, &AdaptiveRequest::new(3, 1, dec!(1000)), &OptimizerConfig::default(), &progress)
            .unwrap();
        assert_eq!(progress.status(), AdaptiveStatus::Complete);
        assert!(progress.result.read().unwrap().is_some());

        let err = run_adaptive_tracked(&results, &AdaptiveRequest::new(0, 1, dec!(1000)), &OptimizerConfig::default(), &progress);
        assert!(err.is_err());
        assert_eq!(progress.status(), AdaptiveStatus::Error);
        assert!(progress.error_message.read().unwrap().is_some());
    }

    #[test]
    fn test_request_defaults_balance() {
        let request: AdaptiveRequest =
            serde_json::from_str(r#"{"n_divisions": 5, "strategy_limit": 3}"#).unwrap();
        assert_eq!(request.starting_balance, dec!(100000));
        assert!(request.strategies.is_none());
    }

    #[test]
    fn test_try_start_admits_one_run() {
        let progress = AdaptiveProgress::new();
        assert!(progress.try_start());
        assert!(!progress.try_start());

        *progress.status.write().unwrap() = AdaptiveStatus::Complete;
        assert!(progress.try_start());
        assert!(progress.is_running());
    }

    #[test]
    fn test_concurrent_starts_have_one_winner() {
        let progress = std::sync::Arc::new(AdaptiveProgress::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let progress = progress.clone();
                std::thread::spawn(move || progress.try_start())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_run_reports_sharpe_at_configured_rate() {
        // One asset: the weights cannot depend on the rate
        let results = vec![wavy("AAA", "s", 0.002, 90)];
        let request = AdaptiveRequest::new(3, 1, dec!(100000));
        let default = run_adaptive(&results, &request, &OptimizerConfig::default()).unwrap();
        let riskless = OptimizerConfig {
            risk_free_rate: 0.0,
            ..Default::default()
        };
        let zero = run_adaptive(&results, &request, &riskless).unwrap();

        assert_eq!(zero.curve.equity, default.curve.equity);
        let sharpe = |run: &AdaptiveRun| run.curve.report.as_ref().unwrap().sharpe;
        assert!(sharpe(&zero) > sharpe(&default));
    }
}
