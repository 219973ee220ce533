//! Limited-memory BFGS with optional box bounds.
//!
//! Directions come from the usual two-loop recursion; steps are accepted by
//! Armijo backtracking on the projected path. Components sitting on a bound
//! with the gradient pushing outward are frozen for that iteration.

use std::collections::VecDeque;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings for [`minimize_lbfgs`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbfgsConfig {
    /// Number of correction pairs kept.
    pub memory: usize,
    /// Budget of objective/gradient evaluations, including the first one.
    pub max_fun_evals: usize,
    /// Stop when the max-norm of the projected gradient drops below this.
    pub pgtol: f64,
    /// Stop when `(f_k - f_{k+1}) / max(|f_k|, |f_{k+1}|, 1) <= ftol`.
    pub ftol: f64,
    /// Armijo sufficient-decrease constant.
    pub armijo_c1: f64,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            memory: 10,
            max_fun_evals: 100,
            pgtol: 1e-5,
            ftol: 2.2e-9,
            armijo_c1: 1e-4,
        }
    }
}

/// Outcome of [`minimize_lbfgs`].
#[derive(Debug, Clone, PartialEq)]
pub struct LbfgsResult {
    /// Best point found; never worse than the start.
    pub x: Vec<f64>,
    /// Objective at `x`.
    pub f: f64,
    /// Objective/gradient evaluations spent.
    pub evaluations: usize,
    /// Accepted steps.
    pub iterations: usize,
    /// `true` when a tolerance was met before the budget ran out.
    pub converged: bool,
}

fn project(x: &mut DVector<f64>, bounds: Option<&[(f64, f64)]>) {
    if let Some(b) = bounds {
        for (v, &(lo, hi)) in x.iter_mut().zip(b) {
            *v = v.clamp(lo, hi);
        }
    }
}

fn projected_gradient_norm(
    x: &DVector<f64>,
    g: &DVector<f64>,
    bounds: Option<&[(f64, f64)]>,
) -> f64 {
    match bounds {
        None => g.amax(),
        Some(b) => x
            .iter()
            .zip(g.iter())
            .zip(b)
            .map(|((&xi, &gi), &(lo, hi))| ((xi - gi).clamp(lo, hi) - xi).abs())
            .fold(0.0, f64::max),
    }
}

/// Zero the direction on components that would leave the box.
fn mask_active(
    d: &mut DVector<f64>,
    x: &DVector<f64>,
    g: &DVector<f64>,
    bounds: Option<&[(f64, f64)]>,
) {
    if let Some(b) = bounds {
        for k in 0..d.len() {
            let (lo, hi) = b[k];
            if (x[k] <= lo && g[k] > 0.0) || (x[k] >= hi && g[k] < 0.0) {
                d[k] = 0.0;
            }
        }
    }
}

type History = VecDeque<(DVector<f64>, DVector<f64>, f64)>;

fn two_loop(g: &DVector<f64>, history: &History) -> DVector<f64> {
    let mut q = g.clone();
    let mut alphas = Vec::with_capacity(history.len());
    for (s, y, rho) in history.iter().rev() {
        let a = rho * s.dot(&q);
        q.axpy(-a, y, 1.0);
        alphas.push(a);
    }
    if let Some((s, y, _)) = history.back() {
        q *= s.dot(y) / y.dot(y);
    }
    for ((s, y, rho), a) in history.iter().zip(alphas.iter().rev()) {
        let b = rho * y.dot(&q);
        q.axpy(a - b, s, 1.0);
    }
    -q
}

/// Minimize `f` starting at `x0`.
///
/// `f` returns the objective and its gradient. Errors from `f` are
/// propagated. Non-finite trial values are treated as failed steps; a
/// non-finite value at `x0` ends the search immediately.
pub fn minimize_lbfgs<F>(
    mut f: F,
    x0: &[f64],
    bounds: Option<&[(f64, f64)]>,
    config: &LbfgsConfig,
) -> Result<LbfgsResult>
where
    F: FnMut(&[f64]) -> Result<(f64, Vec<f64>)>,
{
    let mut x = DVector::from_column_slice(x0);
    project(&mut x, bounds);
    let (mut fx, g0) = f(x.as_slice())?;
    let mut g = DVector::from_vec(g0);
    let mut evaluations = 1usize;
    let mut iterations = 0usize;
    let mut converged = false;

    if !fx.is_finite() || g.iter().any(|v| !v.is_finite()) {
        return Ok(LbfgsResult {
            x: x.as_slice().to_vec(),
            f: fx,
            evaluations,
            iterations,
            converged,
        });
    }

    let mut history: History = VecDeque::with_capacity(config.memory);

    while evaluations < config.max_fun_evals {
        if projected_gradient_norm(&x, &g, bounds) <= config.pgtol {
            converged = true;
            break;
        }

        let mut d = two_loop(&g, &history);
        mask_active(&mut d, &x, &g, bounds);
        let mut slope = g.dot(&d);
        if !(slope < 0.0) {
            history.clear();
            d = -g.clone();
            mask_active(&mut d, &x, &g, bounds);
            slope = g.dot(&d);
            if !(slope < 0.0) {
                converged = true;
                break;
            }
        }

        let mut step = if history.is_empty() {
            (1.0 / d.norm()).min(1.0)
        } else {
            1.0
        };
        let mut accepted = None;
        while evaluations < config.max_fun_evals {
            let mut trial = &x + &d * step;
            project(&mut trial, bounds);
            let (ft, gt) = f(trial.as_slice())?;
            evaluations += 1;
            let gt = DVector::from_vec(gt);
            let decrease = config.armijo_c1 * g.dot(&(&trial - &x));
            if ft.is_finite() && gt.iter().all(|v| v.is_finite()) && ft <= fx + decrease {
                accepted = Some((trial, ft, gt));
                break;
            }
            step *= 0.5;
            if step < 1e-20 {
                break;
            }
        }
        let Some((x_new, f_new, g_new)) = accepted else {
            break;
        };
        iterations += 1;

        let s = &x_new - &x;
        let y = &g_new - &g;
        let sy = s.dot(&y);
        if sy > 1e-10 * y.dot(&y).max(f64::MIN_POSITIVE) {
            if history.len() == config.memory.max(1) {
                history.pop_front();
            }
            history.push_back((s, y, 1.0 / sy));
        }

        let rel = (fx - f_new) / fx.abs().max(f_new.abs()).max(1.0);
        x = x_new;
        fx = f_new;
        g = g_new;
        if rel <= config.ftol {
            converged = true;
            break;
        }
    }

    Ok(LbfgsResult {
        x: x.as_slice().to_vec(),
        f: fx,
        evaluations,
        iterations,
        converged,
    })
}
