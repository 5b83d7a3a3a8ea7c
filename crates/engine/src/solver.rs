//! Constrained maximizer over the bounded simplex
//!
//! Maximizes a smooth objective subject to `sum(w) == 1` and
//! `lower <= w_i <= upper` using projected gradient ascent with central
//! finite differences and an Armijo backtracking line search. Every iterate
//! is feasible, so a solve that stops early still returns a usable vector.

use std::time::Instant;

const FD_STEP: f64 = 1e-6;
const ARMIJO_C: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 40;
const BISECTION_ROUNDS: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct SolverSettings {
    pub max_iterations: usize,
    /// Relative objective improvement below which the solve is converged
    pub tolerance: f64,
    pub deadline: Option<Instant>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-10,
            deadline: None,
        }
    }
}

/// Last iterate of a solve, whether or not it converged
#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub weights: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Maximize `objective` over `{w : sum(w) = 1, lower <= w_i <= upper}`.
///
/// Bounds must admit a feasible point (`n * lower <= 1 <= n * upper`); the
/// search starts from equal weights.
pub fn maximize_on_simplex<F>(
    n: usize,
    lower: f64,
    upper: f64,
    objective: F,
    settings: &SolverSettings,
) -> SolverOutcome
where
    F: Fn(&[f64]) -> f64,
{
    if n == 0 {
        return SolverOutcome {
            weights: Vec::new(),
            value: 0.0,
            iterations: 0,
            converged: true,
        };
    }

    if n == 1 {
        let weights = vec![1.0];
        let value = objective(&weights);
        return SolverOutcome {
            weights,
            value,
            iterations: 0,
            converged: true,
        };
    }

    let mut x = project_bounded_simplex(&vec![1.0 / n as f64; n], lower, upper);
    let mut fx = objective(&x);
    let mut step = 1.0;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < settings.max_iterations {
        if settings.deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        iterations += 1;

        let grad = gradient(&objective, &x);
        if grad.iter().any(|g| !g.is_finite()) {
            break;
        }

        let mut accepted: Option<(Vec<f64>, f64)> = None;
        let mut t = step;
        for _ in 0..MAX_BACKTRACKS {
            let trial: Vec<f64> = x.iter().zip(&grad).map(|(xi, gi)| xi + t * gi).collect();
            let y = project_bounded_simplex(&trial, lower, upper);
            let fy = objective(&y);
            let ascent: f64 = grad.iter().zip(y.iter().zip(&x)).map(|(g, (yi, xi))| g * (yi - xi)).sum();
            if fy.is_finite() && fy >= fx + ARMIJO_C * ascent {
                accepted = Some((y, fy));
                break;
            }
            t *= 0.5;
        }

        let Some((y, fy)) = accepted else {
            // No ascent direction survives projection: stationary point
            converged = true;
            break;
        };

        let improvement = fy - fx;
        let moved = y
            .iter()
            .zip(&x)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        x = y;
        fx = fy;

        if improvement.abs() <= settings.tolerance * (1.0 + fx.abs()) || moved <= 1e-12 {
            converged = true;
            break;
        }
        step = (t * 2.0).min(1e6);
    }

    SolverOutcome {
        weights: x,
        value: fx,
        iterations,
        converged,
    }
}

fn gradient<F>(objective: &F, x: &[f64]) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut probe = x.to_vec();
    (0..x.len())
        .map(|i| {
            let original = probe[i];
            probe[i] = original + FD_STEP;
            let up = objective(&probe);
            probe[i] = original - FD_STEP;
            let down = objective(&probe);
            probe[i] = original;
            (up - down) / (2.0 * FD_STEP)
        })
        .collect()
}

/// Euclidean projection onto `{w : sum(w) = 1, lower <= w_i <= upper}`.
///
/// The projection is `clamp(y_i - tau)` for the unique shift `tau` that makes
/// the weights sum to one; `tau` is found by bisection.
pub fn project_bounded_simplex(y: &[f64], lower: f64, upper: f64) -> Vec<f64> {
    let clamped_sum = |tau: f64| -> f64 { y.iter().map(|v| (v - tau).clamp(lower, upper)).sum() };

    let max_y = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_y = y.iter().copied().fold(f64::INFINITY, f64::min);
    let mut lo = min_y - upper;
    let mut hi = max_y - lower;

    for _ in 0..BISECTION_ROUNDS {
        let mid = 0.5 * (lo + hi);
        if clamped_sum(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= f64::EPSILON * (1.0 + hi.abs()) {
            break;
        }
    }

    let tau = 0.5 * (lo + hi);
    y.iter().map(|v| (v - tau).clamp(lower, upper)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_feasible(w: &[f64], lower: f64, upper: f64) {
        let sum: f64 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum = {sum}");
        for &wi in w {
            assert!(wi >= lower - 1e-12 && wi <= upper + 1e-12, "w = {wi}");
        }
    }

    #[test]
    fn test_projection_of_feasible_point_is_identity() {
        let w = vec![0.2, 0.3, 0.5];
        let p = project_bounded_simplex(&w, 0.0, 1.0);
        for (a, b) in w.iter().zip(&p) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_projection_respects_floor() {
        let p = project_bounded_simplex(&[5.0, -3.0, -3.0], 0.1, 1.0);
        assert_feasible(&p, 0.1, 1.0);
        assert!((p[0] - 0.8).abs() < 1e-9);
        assert!((p[1] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_linear_objective_pushes_to_vertex() {
        let coef = [1.0, 3.0, 2.0];
        let lower = 1.0 / 6.0;
        let outcome = maximize_on_simplex(
            3,
            lower,
            1.0,
            |w| w.iter().zip(coef.iter()).map(|(a, b)| a * b).sum(),
            &SolverSettings::default(),
        );
        assert_feasible(&outcome.weights, lower, 1.0);
        assert!((outcome.weights[1] - (1.0 - 2.0 * lower)).abs() < 1e-6);
        assert!(outcome.converged);
    }

    #[test]
    fn test_concave_objective_finds_interior_optimum() {
        // max -(w0 - 0.7)^2 - (w1 - 0.3)^2 on the simplex
        let outcome = maximize_on_simplex(
            2,
            0.0,
            1.0,
            |w| -(w[0] - 0.7).powi(2) - (w[1] - 0.3).powi(2),
            &SolverSettings::default(),
        );
        assert_feasible(&outcome.weights, 0.0, 1.0);
        assert!((outcome.weights[0] - 0.7).abs() < 1e-4);
    }

    #[test]
    fn test_flat_objective_keeps_equal_weights() {
        let outcome = maximize_on_simplex(4, 0.125, 1.0, |_| -1.0, &SolverSettings::default());
        assert_feasible(&outcome.weights, 0.125, 1.0);
        for w in &outcome.weights {
            assert!((w - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_expired_deadline_returns_start_point() {
        let settings = SolverSettings {
            deadline: Some(Instant::now()),
            ..Default::default()
        };
        let outcome = maximize_on_simplex(3, 0.0, 1.0, |w| w[0], &settings);
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 0);
        assert_feasible(&outcome.weights, 0.0, 1.0);
    }

    #[test]
    fn test_single_asset_gets_full_weight() {
        let outcome = maximize_on_simplex(1, 0.5, 1.0, |w| -w[0], &SolverSettings::default());
        assert_eq!(outcome.weights.len(), 1);
        assert_eq!(outcome.weights[0], 1.0);
    }
}
