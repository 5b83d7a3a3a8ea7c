//! Annualized risk-adjusted score (geometric-mean Sharpe)
//!
//! Returns are compounded through their geometric mean and annualized over
//! 252 trading days. Volatility uses the compounding identity
//! `sqrt((Var + (1+g)^2)^252 - (1+g)^504)`, so the score is consistent with
//! the geometric annual return rather than the arithmetic daily mean.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::returns::ReturnSeries;

pub const TRADING_DAYS: i32 = 252;
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.03;
/// Returned when annualized volatility is zero (score is not comparable)
pub const UNDEFINED_SCORE: f64 = -1.0;
/// Daily variance at or below this is rounding noise of a smoothly
/// compounding curve and counts as zero volatility
pub const NOISE_VARIANCE: f64 = 1e-20;

/// Intermediate values of a score computation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SharpeBreakdown {
    pub geometric_mean: f64,
    pub annualized_return_pct: f64,
    pub annualized_volatility_pct: f64,
    pub sharpe: f64,
}

/// Geometric mean of daily returns; missing values count as zero return.
///
/// Yields 0 for an empty series or when any gross return is not positive.
pub fn geometric_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut log_sum = 0.0;
    for &r in values {
        let gross = if r.is_finite() { r } else { 0.0 } + 1.0;
        if gross <= 0.0 {
            return 0.0;
        }
        log_sum += gross.ln();
    }
    (log_sum / values.len() as f64).exp() - 1.0
}

/// Variance of the finite values; ddof is 1 unless fewer than two samples exist
pub fn variance(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let n = finite.len();
    if n == 0 || finite.windows(2).all(|w| w[0] == w[1]) {
        return 0.0;
    }
    let ddof = if n >= 2 { 1 } else { 0 };
    let mean = finite.iter().sum::<f64>() / n as f64;
    let ss: f64 = finite.iter().map(|v| (v - mean).powi(2)).sum();
    ss / (n - ddof) as f64
}

/// Full breakdown for a raw slice of daily returns
pub fn score_breakdown(values: &[f64], risk_free_rate: f64) -> SharpeBreakdown {
    let gmean = geometric_mean(values);
    let base = 1.0 + gmean;

    let annualized_return_pct = (base.powi(TRADING_DAYS) - 1.0) * 100.0;

    // (v + b^2)^252 - b^504 == b^504 * ((1 + v/b^2)^252 - 1), evaluated without cancellation
    let var = match variance(values) {
        v if v <= NOISE_VARIANCE => 0.0,
        v => v,
    };
    let growth = base.powi(2 * TRADING_DAYS);
    let excess = (TRADING_DAYS as f64 * (var / (base * base)).ln_1p()).exp_m1();
    let annualized_volatility_pct = (growth * excess).max(0.0).sqrt() * 100.0;

    let sharpe = if annualized_volatility_pct == 0.0 || annualized_volatility_pct.is_nan() {
        UNDEFINED_SCORE
    } else {
        (annualized_return_pct - risk_free_rate * 100.0) / annualized_volatility_pct
    };

    SharpeBreakdown {
        geometric_mean: gmean,
        annualized_return_pct,
        annualized_volatility_pct,
        sharpe,
    }
}

/// Score a single return series
pub fn score(returns: &ReturnSeries, risk_free_rate: f64) -> f64 {
    let values: Vec<f64> = returns.values().collect();
    score_breakdown(&values, risk_free_rate).sharpe
}

/// Score the weighted, date-aligned sum of several return series
pub fn score_weighted(returns_list: &[ReturnSeries], weights: &[f64], risk_free_rate: f64) -> f64 {
    ReturnMatrix::from_series(returns_list).score(weights, risk_free_rate)
}

// ============================================================================
// Aligned return matrix (objective evaluation)
// ============================================================================

/// Per-asset daily returns aligned on the union of their dates.
///
/// A date missing for an asset, or a NaN return, contributes zero for that
/// asset. Empty series therefore contribute nothing.
#[derive(Debug, Clone)]
pub struct ReturnMatrix {
    dates: Vec<NaiveDate>,
    /// rows[date][asset]
    rows: Vec<Vec<f64>>,
    n_assets: usize,
}

impl ReturnMatrix {
    pub fn from_series(series: &[ReturnSeries]) -> Self {
        let n_assets = series.len();
        let mut by_date: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();

        for (asset, s) in series.iter().enumerate() {
            for point in s.points() {
                let row = by_date
                    .entry(point.date)
                    .or_insert_with(|| vec![0.0; n_assets]);
                if point.value.is_finite() {
                    row[asset] = point.value;
                }
            }
        }

        let (dates, rows): (Vec<NaiveDate>, Vec<Vec<f64>>) = by_date.into_iter().unzip();
        Self {
            dates,
            rows,
            n_assets,
        }
    }

    pub fn n_assets(&self) -> usize {
        self.n_assets
    }

    pub fn n_dates(&self) -> usize {
        self.dates.len()
    }

    /// Weighted daily portfolio returns
    pub fn combine(&self, weights: &[f64]) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().zip(weights).map(|(r, w)| r * w).sum())
            .collect()
    }

    pub fn score(&self, weights: &[f64], risk_free_rate: f64) -> f64 {
        score_breakdown(&self.combine(weights), risk_free_rate).sharpe
    }

    /// Value maximized by the optimizer.
    ///
    /// Equal to [`ReturnMatrix::score`] whenever the combination has
    /// volatility. Without volatility the Sharpe is the flat sentinel, so
    /// weightings are ranked by annualized excess return instead.
    pub fn objective(&self, weights: &[f64], risk_free_rate: f64) -> f64 {
        let breakdown = score_breakdown(&self.combine(weights), risk_free_rate);
        if breakdown.annualized_volatility_pct > 0.0 {
            breakdown.sharpe
        } else {
            breakdown.annualized_return_pct - risk_free_rate * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
    }

    #[test]
    fn test_constant_return_matches_closed_form() {
        let c = 0.01;
        let values = vec![c; 100];
        let breakdown = score_breakdown(&values, DEFAULT_RISK_FREE_RATE);

        assert!((breakdown.geometric_mean - c).abs() < 1e-12);
        let expected_return = ((1.0 + c).powi(252) - 1.0) * 100.0;
        assert!((breakdown.annualized_return_pct - expected_return).abs() / expected_return < 1e-9);
        assert_eq!(breakdown.annualized_volatility_pct, 0.0);
        assert_eq!(breakdown.sharpe, UNDEFINED_SCORE);
    }

    #[test]
    fn test_alternating_returns_match_direct_formula() {
        let values: Vec<f64> = (0..200)
            .map(|i| if i % 2 == 0 { 0.012 } else { -0.008 })
            .collect();
        let rf = 0.03;
        let breakdown = score_breakdown(&values, rf);

        let log_mean = values.iter().map(|r| (1.0 + r).ln()).sum::<f64>() / values.len() as f64;
        let g = log_mean.exp() - 1.0;
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let var = values.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
        let ann_ret = ((1.0 + g).powi(252) - 1.0) * 100.0;
        let ann_vol =
            ((var + (1.0 + g).powi(2)).powi(252) - (1.0 + g).powi(504)).sqrt() * 100.0;
        let expected = (ann_ret - rf * 100.0) / ann_vol;

        assert!((breakdown.sharpe - expected).abs() < 1e-6 * expected.abs().max(1.0));
        assert!(breakdown.sharpe > 0.0);
    }

    #[test]
    fn test_empty_series_is_undefined() {
        let breakdown = score_breakdown(&[], DEFAULT_RISK_FREE_RATE);
        assert_eq!(breakdown.geometric_mean, 0.0);
        assert_eq!(breakdown.annualized_return_pct, 0.0);
        assert_eq!(breakdown.sharpe, UNDEFINED_SCORE);
        assert_eq!(score(&ReturnSeries::default(), 0.0), UNDEFINED_SCORE);
    }

    #[test]
    fn test_non_positive_gross_return_zeroes_geometric_mean() {
        assert_eq!(geometric_mean(&[0.05, -1.0, 0.02]), 0.0);
        assert_eq!(geometric_mean(&[0.05, -1.5]), 0.0);
    }

    #[test]
    fn test_nan_counts_as_zero_return() {
        let with_nan = geometric_mean(&[0.02, f64::NAN]);
        let with_zero = geometric_mean(&[0.02, 0.0]);
        assert!((with_nan - with_zero).abs() < 1e-15);
    }

    #[test]
    fn test_single_sample_variance_uses_ddof_zero() {
        assert_eq!(variance(&[0.3]), 0.0);
        assert!((variance(&[0.0, 0.2]) - 0.02).abs() < 1e-15);
    }

    #[test]
    fn test_weighted_score_single_series_equals_plain_score() {
        let values: Vec<f64> = (0..60).map(|i| 0.001 * ((i % 5) as f64 - 1.5)).collect();
        let series = ReturnSeries::from_values(start(), &values);
        let plain = score(&series, 0.0);
        let weighted = score_weighted(&[series], &[1.0], 0.0);
        assert!((plain - weighted).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_score_skips_empty_series() {
        let values: Vec<f64> = (0..60).map(|i| 0.002 * ((i % 3) as f64 - 0.5)).collect();
        let series = ReturnSeries::from_values(start(), &values);
        let alone = score_weighted(&[series.clone()], &[0.5], 0.0);
        let with_empty = score_weighted(&[series, ReturnSeries::default()], &[0.5, 0.5], 0.0);
        assert!((alone - with_empty).abs() < 1e-12);
    }

    #[test]
    fn test_matrix_aligns_on_dates() {
        let a = ReturnSeries::from_values(start(), &[0.01, 0.02, 0.03]);
        let b = ReturnSeries::from_values(start().succ_opt().unwrap(), &[0.10, f64::NAN, 0.30]);
        let matrix = ReturnMatrix::from_series(&[a, b]);

        assert_eq!(matrix.n_assets(), 2);
        assert_eq!(matrix.n_dates(), 4);
        let combined = matrix.combine(&[1.0, 0.5]);
        let expected = [0.01, 0.02 + 0.05, 0.03, 0.15];
        for (got, want) in combined.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn test_compounding_curve_noise_is_not_volatility() {
        use crate::returns::to_daily_returns;
        use crate::types::EquityPoint;

        let curve: Vec<EquityPoint> = (0..101)
            .map(|i| EquityPoint {
                time: i as i64 * 86_400_000,
                equity: 100_000.0 * 1.0033154_f64.powi(i),
                drawdown_pct: 0.0,
            })
            .collect();
        let returns = to_daily_returns(&curve);
        assert_eq!(returns.len(), 100);
        assert_eq!(score(&returns, DEFAULT_RISK_FREE_RATE), UNDEFINED_SCORE);
    }

    #[test]
    fn test_objective_ranks_flat_combinations_by_return() {
        let up = ReturnSeries::from_values(start(), &[0.01; 50]);
        let half = ReturnSeries::from_values(start(), &[0.005; 50]);
        let matrix = ReturnMatrix::from_series(&[up, half]);

        assert_eq!(matrix.score(&[0.8, 0.2], 0.03), UNDEFINED_SCORE);
        assert_eq!(matrix.score(&[0.2, 0.8], 0.03), UNDEFINED_SCORE);
        assert!(matrix.objective(&[0.8, 0.2], 0.03) > matrix.objective(&[0.2, 0.8], 0.03));
    }

    #[test]
    fn test_objective_is_sharpe_when_volatile() {
        let a: Vec<f64> = (0..80).map(|i| if i % 2 == 0 { 0.012 } else { -0.006 }).collect();
        let b: Vec<f64> = (0..80).map(|i| 0.001 * ((i % 4) as f64 - 1.0)).collect();
        let matrix = ReturnMatrix::from_series(&[
            ReturnSeries::from_values(start(), &a),
            ReturnSeries::from_values(start(), &b),
        ]);
        let w = [0.6, 0.4];
        assert_eq!(matrix.objective(&w, 0.03), matrix.score(&w, 0.03));
    }
}
