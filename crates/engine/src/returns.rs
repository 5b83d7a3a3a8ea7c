//! Daily return series derived from equity curves
//!
//! Curves are resampled to one value per calendar day (UTC) by keeping the
//! last sample of each day. Days without a sample are dropped, never filled,
//! and the first retained day has no return.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::types::{EquityPoint, SeriesPoint};

/// Simple percentage change for one calendar day (0.01 = +1%)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyReturn {
    pub date: NaiveDate,
    /// NaN when the previous day's value was zero
    pub value: f64,
}

/// Resampled, gap-dropped daily return series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    points: Vec<DailyReturn>,
}

impl ReturnSeries {
    pub fn new(points: Vec<DailyReturn>) -> Self {
        Self { points }
    }

    /// Build a series from raw values on consecutive synthetic dates
    pub fn from_values(start: NaiveDate, values: &[f64]) -> Self {
        let points = start
            .iter_days()
            .zip(values.iter())
            .map(|(date, &value)| DailyReturn { date, value })
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[DailyReturn] {
        &self.points
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }
}

/// Convert an equity curve into its daily return series
pub fn to_daily_returns(curve: &[EquityPoint]) -> ReturnSeries {
    daily_returns_from(curve.iter().map(|p| (p.time, p.equity)))
}

/// Same transform for a stitched/aggregated series
pub fn series_daily_returns(series: &[SeriesPoint]) -> ReturnSeries {
    daily_returns_from(series.iter().map(|p| (p.time, p.value)))
}

fn daily_returns_from(samples: impl Iterator<Item = (i64, f64)>) -> ReturnSeries {
    let mut closes: Vec<(NaiveDate, f64)> = Vec::new();

    for (time, value) in samples {
        if !value.is_finite() {
            continue;
        }
        let Some(date) = DateTime::from_timestamp_millis(time).map(|dt| dt.date_naive()) else {
            continue;
        };
        match closes.last_mut() {
            Some((last_date, last_value)) if *last_date == date => *last_value = value,
            _ => closes.push((date, value)),
        }
    }

    let points = closes
        .windows(2)
        .map(|w| {
            let (_, prev) = w[0];
            let (date, current) = w[1];
            let value = if prev == 0.0 {
                f64::NAN
            } else {
                current / prev - 1.0
            };
            DailyReturn { date, value }
        })
        .collect();

    ReturnSeries { points }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400_000;
    const HOUR: i64 = 3_600_000;

    fn point(time: i64, equity: f64) -> EquityPoint {
        EquityPoint {
            time,
            equity,
            drawdown_pct: 0.0,
        }
    }

    #[test]
    fn test_last_sample_of_day_is_used() {
        let curve = vec![
            point(0, 100.0),
            point(10 * HOUR, 150.0),
            point(DAY, 110.0),
            point(DAY + 5 * HOUR, 120.0),
        ];
        let returns = to_daily_returns(&curve);
        assert_eq!(returns.len(), 1);
        assert!((returns.points()[0].value - (120.0 / 150.0 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_missing_days_are_dropped_not_filled() {
        // Day 0, day 3, day 4: returns computed between retained days only
        let curve = vec![point(0, 100.0), point(3 * DAY, 110.0), point(4 * DAY, 121.0)];
        let returns = to_daily_returns(&curve);
        let values: Vec<f64> = returns.values().collect();
        assert_eq!(values.len(), 2);
        assert!((values[0] - 0.10).abs() < 1e-12);
        assert!((values[1] - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_fewer_than_two_days_is_empty() {
        assert!(to_daily_returns(&[]).is_empty());
        assert!(to_daily_returns(&[point(0, 100.0), point(HOUR, 101.0)]).is_empty());
    }

    #[test]
    fn test_zero_previous_value_yields_nan() {
        let curve = vec![point(0, 0.0), point(DAY, 10.0)];
        let returns = to_daily_returns(&curve);
        assert!(returns.points()[0].value.is_nan());
    }

    #[test]
    fn test_non_finite_samples_are_skipped() {
        let curve = vec![point(0, 100.0), point(DAY, f64::NAN), point(2 * DAY, 105.0)];
        let returns = to_daily_returns(&curve);
        assert_eq!(returns.len(), 1);
        assert!((returns.points()[0].value - 0.05).abs() < 1e-12);
    }
}
