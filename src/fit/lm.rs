//! Box-constrained Levenberg-Marquardt with a numerical Jacobian: the one
//! fitting back-end this crate carries (the REDESIGN notes in `DESIGN.md`
//! explain why the dual mpfit/lmfit selection was dropped).

use crate::consts::{LM_CHI2_TOLERANCE, LM_INITIAL_LAMBDA, LM_LAMBDA_FACTOR, LM_MAX_ITERATIONS};
use crate::fit::model::{numerical_jacobian, MultiGaussianModel};

/// Per-parameter box constraint. `fixed` parameters never move regardless of
/// `lo`/`hi`.
#[derive(Clone, Copy, Debug)]
pub struct ParamBound {
    pub lo: f64,
    pub hi: f64,
    pub fixed: bool,
}

/// Outcome of a single fit attempt.
#[derive(Clone, Debug)]
pub struct FitResult {
    pub params: Vec<f64>,
    /// 1-sigma errors, one per parameter; `-1.0` for fixed parameters.
    pub errors: Vec<f64>,
    pub converged: bool,
    pub residual_mean: f64,
    pub residual_std: f64,
    pub iterations: usize,
}

/// Runs box-constrained LM starting from `initial`, honoring `bounds`
/// (same length as `initial`), over the finite pixels given by `points`
/// (`(x, y, data, rms)`).
pub fn fit_lm(
    initial: &[f64],
    bounds: &[ParamBound],
    points: &[(f64, f64, f64, f64)],
) -> FitResult {
    let n = initial.len();
    assert_eq!(bounds.len(), n);

    let free: Vec<usize> = (0..n).filter(|&i| !bounds[i].fixed).collect();
    let mut params = initial.to_vec();
    clamp_to_bounds(&mut params, bounds);

    if free.is_empty() || points.len() < free.len() {
        // Under-determined or nothing to fit: propagate the seed unchanged.
        let (mean, std) = residual_stats(&params, points);
        return FitResult {
            params,
            errors: vec![-1.0; n],
            converged: false,
            residual_mean: mean,
            residual_std: std,
            iterations: 0,
        };
    }

    let mut lambda = LM_INITIAL_LAMBDA;
    let mut chi2 = chi_squared(&params, points);
    let mut converged = false;
    let mut iterations = 0;

    for _ in 0..LM_MAX_ITERATIONS {
        iterations += 1;
        let jac = numerical_jacobian(&params, &free, points);
        let residuals: Vec<f64> = {
            let model = MultiGaussianModel::from_flat(&params);
            points
                .iter()
                .map(|&(x, y, data, rms)| (model.eval(x, y) - data) / rms)
                .collect()
        };

        let nfree = free.len();
        let mut jtj = vec![vec![0.0; nfree]; nfree];
        let mut jtr = vec![0.0; nfree];
        for row in 0..points.len() {
            for a in 0..nfree {
                jtr[a] += jac[row][a] * residuals[row];
                for b in 0..nfree {
                    jtj[a][b] += jac[row][a] * jac[row][b];
                }
            }
        }

        let mut trial_accepted = false;
        for attempt in 0..16 {
            let mut damped = jtj.clone();
            for a in 0..nfree {
                damped[a][a] *= 1.0 + lambda;
            }
            let neg_jtr: Vec<f64> = jtr.iter().map(|v| -v).collect();
            let delta = match solve_linear(&damped, &neg_jtr) {
                Some(d) => d,
                None => {
                    lambda *= LM_LAMBDA_FACTOR;
                    continue;
                }
            };

            let mut trial = params.clone();
            for (k, &idx) in free.iter().enumerate() {
                trial[idx] += delta[k];
            }
            clamp_to_bounds(&mut trial, bounds);

            let trial_chi2 = chi_squared(&trial, points);
            if trial_chi2.is_finite() && trial_chi2 < chi2 {
                let rel_change = (chi2 - trial_chi2) / chi2.max(1e-300);
                params = trial;
                chi2 = trial_chi2;
                lambda /= LM_LAMBDA_FACTOR;
                trial_accepted = true;
                if rel_change < LM_CHI2_TOLERANCE {
                    converged = true;
                }
                break;
            } else {
                lambda *= LM_LAMBDA_FACTOR;
            }
            let _ = attempt;
        }

        if !trial_accepted || converged {
            converged = converged || trial_accepted;
            break;
        }
    }

    let errors = if converged || iterations > 0 {
        parameter_errors(&params, &free, bounds, points)
    } else {
        vec![-1.0; n]
    };
    let (mean, std) = residual_stats(&params, points);

    FitResult {
        params,
        errors,
        converged,
        residual_mean: mean,
        residual_std: std,
        iterations,
    }
}

fn clamp_to_bounds(params: &mut [f64], bounds: &[ParamBound]) {
    for (p, b) in params.iter_mut().zip(bounds.iter()) {
        if !b.fixed {
            *p = p.clamp(b.lo, b.hi);
        }
    }
}

fn chi_squared(params: &[f64], points: &[(f64, f64, f64, f64)]) -> f64 {
    let model = MultiGaussianModel::from_flat(params);
    points
        .iter()
        .map(|&(x, y, data, rms)| {
            let r = (model.eval(x, y) - data) / rms;
            r * r
        })
        .sum()
}

fn residual_stats(params: &[f64], points: &[(f64, f64, f64, f64)]) -> (f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0);
    }
    let model = MultiGaussianModel::from_flat(params);
    let mut residuals: Vec<f64> = points
        .iter()
        .map(|&(x, y, data, rms)| (model.eval(x, y) - data) / rms)
        .collect();
    residuals.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = residuals.len() / 2;
    let median = if residuals.len() % 2 == 0 {
        (residuals[mid - 1] + residuals[mid]) / 2.0
    } else {
        residuals[mid]
    };
    let mean = residuals.iter().sum::<f64>() / residuals.len() as f64;
    let var = residuals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / residuals.len() as f64;
    (median, var.sqrt())
}

/// Diagonal-only approximation of the covariance matrix from the final
/// Jacobian: `errors[i] = sqrt((J^T J)^-1_ii)`, `-1` for fixed parameters.
fn parameter_errors(
    params: &[f64],
    free: &[usize],
    bounds: &[ParamBound],
    points: &[(f64, f64, f64, f64)],
) -> Vec<f64> {
    let n = params.len();
    let mut errors = vec![-1.0; n];
    if free.is_empty() {
        return errors;
    }
    let jac = numerical_jacobian(params, free, points);
    let nfree = free.len();
    let mut jtj = vec![vec![0.0; nfree]; nfree];
    for row in jac.iter() {
        for a in 0..nfree {
            for b in 0..nfree {
                jtj[a][b] += row[a] * row[b];
            }
        }
    }
    if let Some(inv) = invert(&jtj) {
        for (k, &idx) in free.iter().enumerate() {
            let variance = inv[k][k];
            errors[idx] = if variance > 0.0 { variance.sqrt() } else { -1.0 };
        }
    }
    for (i, b) in bounds.iter().enumerate() {
        if b.fixed {
            errors[i] = -1.0;
        }
    }
    errors
}

/// Solves `a * x = b` via Gaussian elimination with partial pivoting.
/// Returns `None` if `a` is (numerically) singular.
fn solve_linear(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    let mut m: Vec<Vec<f64>> = a.iter().cloned().collect();
    let mut rhs = b.to_vec();

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| {
            m[r1][col].abs().partial_cmp(&m[r2][col].abs()).unwrap()
        })?;
        if m[pivot_row][col].abs() < 1e-14 {
            return None;
        }
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        for row in (col + 1)..n {
            let factor = m[row][col] / m[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = rhs[row];
        for k in (row + 1)..n {
            sum -= m[row][k] * x[k];
        }
        x[row] = sum / m[row][row];
    }
    Some(x)
}

/// Matrix inverse via repeated linear solves against identity columns.
/// `n` here is small (at most `6 * max_summits`), so this is adequate.
fn invert(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut inv = vec![vec![0.0; n]; n];
    for col in 0..n {
        let mut e = vec![0.0; n];
        e[col] = 1.0;
        let x = solve_linear(a, &e)?;
        for row in 0..n {
            inv[row][col] = x[row];
        }
    }
    Some(inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_points(amp: f64, xo: f64, yo: f64, sx: f64, sy: f64) -> Vec<(f64, f64, f64, f64)> {
        let mut pts = Vec::new();
        for row in 0..20 {
            for col in 0..20 {
                let x = col as f64;
                let y = row as f64;
                let data = crate::fit::model::elliptical_gaussian(x, y, amp, xo, yo, sx, sy, 0.0);
                pts.push((x, y, data, 0.01));
            }
        }
        pts
    }

    #[test]
    fn recovers_known_gaussian() {
        let points = synthetic_points(1.0, 10.0, 10.0, 2.0, 2.0);
        let initial = vec![0.8, 9.5, 10.5, 1.8, 1.8, 0.0];
        let bounds = vec![
            ParamBound { lo: 0.0, hi: 2.0, fixed: false },
            ParamBound { lo: 5.0, hi: 15.0, fixed: false },
            ParamBound { lo: 5.0, hi: 15.0, fixed: false },
            ParamBound { lo: 0.5, hi: 5.0, fixed: false },
            ParamBound { lo: 0.5, hi: 5.0, fixed: false },
            ParamBound { lo: -std::f64::consts::PI, hi: std::f64::consts::PI, fixed: true },
        ];
        let result = fit_lm(&initial, &bounds, &points);
        assert!((result.params[0] - 1.0).abs() < 0.05);
        assert!((result.params[1] - 10.0).abs() < 0.2);
        assert!((result.params[2] - 10.0).abs() < 0.2);
        assert_eq!(result.errors[5], -1.0);
    }

    #[test]
    fn underdetermined_skips_fit() {
        let points = vec![(0.0, 0.0, 1.0, 0.01)];
        let initial = vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0];
        let bounds = vec![ParamBound { lo: -10.0, hi: 10.0, fixed: false }; 6];
        let result = fit_lm(&initial, &bounds, &points);
        assert!(!result.converged);
        assert!(result.errors.iter().all(|&e| e == -1.0));
    }
}
