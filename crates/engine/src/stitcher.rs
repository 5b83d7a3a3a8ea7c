//! Out-of-sample curve stitching
//!
//! Weights chosen on division `i - 1` are applied to the realized curves of
//! division `i`. Each division's contribution is rebased to zero at its start
//! and offset by the running portfolio value, so the combined curve is
//! continuous across weight changes.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::divisions::Division;
use crate::error::{EngineError, Result};
use crate::returns::series_daily_returns;
use crate::sharpe::{self, DEFAULT_RISK_FREE_RATE};
use crate::types::{BacktestResult, OptimalPortfolio, SeriesPoint};

/// Summary of a combined series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchReport {
    pub starting_balance: Decimal,
    pub final_equity: Decimal,
    pub return_pct: f64,
    /// Largest combined drawdown as a fraction
    pub max_drawdown_pct: f64,
    pub max_drawdown_time: Option<i64>,
    pub sharpe: f64,
    pub points: usize,
}

/// Continuous out-of-sample equity and drawdown series
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StitchedCurve {
    pub equity: Vec<SeriesPoint>,
    pub drawdown: Vec<SeriesPoint>,
    /// `None` when nothing survived stitching
    pub report: Option<StitchReport>,
}

impl StitchedCurve {
    pub fn is_empty(&self) -> bool {
        self.equity.is_empty()
    }
}

pub(crate) fn balance_to_f64(balance: Decimal) -> Result<f64> {
    if balance.is_sign_negative() {
        return Err(EngineError::InvalidInput(format!(
            "starting_balance must not be negative, got {balance}"
        )));
    }
    balance
        .to_f64()
        .ok_or_else(|| EngineError::InvalidInput(format!("starting_balance {balance} is not representable")))
}

pub(crate) fn to_money(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(2)
}

/// Stitch division `i`'s realized curves under `portfolios[i - 1]`'s weights.
///
/// `portfolios` and `divisions` are parallel and in division order. The
/// report's Sharpe uses the default risk-free rate.
pub fn stitch(
    results: &[BacktestResult],
    portfolios: &[OptimalPortfolio],
    divisions: &[Division],
    starting_balance: Decimal,
) -> Result<StitchedCurve> {
    stitch_with_rate(results, portfolios, divisions, starting_balance, DEFAULT_RISK_FREE_RATE)
}

/// [`stitch`] with the report's Sharpe computed at `risk_free_rate`
pub fn stitch_with_rate(
    results: &[BacktestResult],
    portfolios: &[OptimalPortfolio],
    divisions: &[Division],
    starting_balance: Decimal,
    risk_free_rate: f64,
) -> Result<StitchedCurve> {
    if portfolios.len() != divisions.len() {
        return Err(EngineError::InvalidInput(format!(
            "{} portfolios for {} divisions",
            portfolios.len(),
            divisions.len()
        )));
    }
    let balance = balance_to_f64(starting_balance)?;

    let by_key: HashMap<(&str, &str), &BacktestResult> = results
        .iter()
        .map(|r| ((r.symbol.as_str(), r.strategy.as_str()), r))
        .collect();

    let mut equity: Vec<SeriesPoint> = Vec::new();
    let mut drawdown: Vec<SeriesPoint> = Vec::new();
    let mut base = balance;

    for (i, division) in divisions.iter().enumerate().skip(1) {
        let weights = &portfolios[i - 1];

        let mut active: Vec<(&BacktestResult, f64)> = Vec::new();
        for (symbol, entry) in weights.entries() {
            match by_key.get(&(symbol, entry.strategy.as_str())) {
                Some(&r) if r.len() > division.start => active.push((r, entry.weight)),
                Some(_) => warn!(division = i, symbol, strategy = %entry.strategy, "Curve too short for division"),
                None => warn!(division = i, symbol, strategy = %entry.strategy, "No result for selected entry"),
            }
        }

        let Some(time_source) = active
            .first()
            .map(|(r, _)| *r)
            .or_else(|| results.iter().find(|r| r.len() > division.start))
        else {
            continue;
        };

        for t in division.range() {
            let Some(time) = time_source.equity_curve.get(t).map(|p| p.time) else {
                break;
            };
            let mut value = base;
            let mut dd = 0.0;
            for (result, weight) in &active {
                let anchor = result.equity_curve[division.start].equity;
                if let Some(point) = result.equity_curve.get(t) {
                    value += weight * (point.equity - anchor);
                    dd += weight * point.drawdown_pct;
                }
            }
            equity.push(SeriesPoint { time, value });
            drawdown.push(SeriesPoint { time, value: dd });
        }

        if let Some(last) = equity.last() {
            base = last.value;
        }
    }

    // Placeholder rows never touched by a weight set
    let (equity, drawdown): (Vec<SeriesPoint>, Vec<SeriesPoint>) = equity
        .into_iter()
        .zip(drawdown)
        .filter(|(e, _)| e.value != balance)
        .unzip();

    let report = summarize(&equity, &drawdown, starting_balance, balance, risk_free_rate);
    if let Some(r) = &report {
        info!(
            points = r.points,
            final_equity = %r.final_equity,
            return_pct = r.return_pct,
            sharpe = r.sharpe,
            "Stitched out-of-sample curve"
        );
    }

    Ok(StitchedCurve {
        equity,
        drawdown,
        report,
    })
}

pub(crate) fn summarize(
    equity: &[SeriesPoint],
    drawdown: &[SeriesPoint],
    starting_balance: Decimal,
    balance: f64,
    risk_free_rate: f64,
) -> Option<StitchReport> {
    let last = equity.last()?;
    let return_pct = if balance == 0.0 {
        0.0
    } else {
        (last.value - balance) / balance * 100.0
    };
    let worst = drawdown
        .iter()
        .copied()
        .fold(None::<SeriesPoint>, |acc, p| match acc {
            Some(a) if a.value >= p.value => Some(a),
            _ => Some(p),
        });

    Some(StitchReport {
        starting_balance,
        final_equity: to_money(last.value),
        return_pct,
        max_drawdown_pct: worst.map(|p| p.value).unwrap_or(0.0),
        max_drawdown_time: worst.map(|p| p.time),
        sharpe: sharpe::score(&series_daily_returns(equity), risk_free_rate),
        points: equity.len(),
    })
}
