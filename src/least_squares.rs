//! Damped Gauss-Newton (Levenberg-Marquardt) for models with a handful of parameters.

use thiserror::Error;

const MAX_ITERATIONS: usize = 500;
const MAX_DAMPING: f64 = 1e16;
const RELATIVE_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum SolveError {
    #[error("needs at least {needed} points, got {got}")]
    InsufficientPoints { needed: usize, got: usize },
    #[error("model is not finite at the initial guess")]
    NonFinite,
    #[error("normal equations are singular at the solution")]
    Singular,
}

/// A curve `y = f(x; params)` with an analytic gradient in its parameters.
pub trait Model {
    fn param_count(&self) -> usize;
    fn value(&self, x: f64, params: &[f64]) -> f64;
    fn gradient(&self, x: f64, params: &[f64], out: &mut [f64]);
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub params: Vec<f64>,
    pub cost: f64,
    pub iterations: usize,
}

pub fn levenberg_marquardt(
    model: &impl Model,
    xs: &[f64],
    ys: &[f64],
    initial: &[f64],
) -> Result<Solution, SolveError> {
    let n = model.param_count();
    if xs.len() < n {
        return Err(SolveError::InsufficientPoints {
            needed: n,
            got: xs.len(),
        });
    }

    let mut params = initial.to_vec();
    let mut cost = sum_of_squares(model, xs, ys, &params).ok_or(SolveError::NonFinite)?;
    let mut lambda = 1e-3;
    let mut iterations = 0;

    while iterations < MAX_ITERATIONS {
        iterations += 1;
        let (jtj, jtr) = normal_equations(model, xs, ys, &params);

        let mut accepted = None;
        while lambda <= MAX_DAMPING {
            let mut damped = jtj.clone();
            for i in 0..n {
                damped[i][i] += lambda * jtj[i][i].max(1e-12);
            }
            if let Some(step) = solve_linear_system(damped, jtr.clone()) {
                let candidate: Vec<f64> = params.iter().zip(&step).map(|(p, s)| p + s).collect();
                if let Some(candidate_cost) = sum_of_squares(model, xs, ys, &candidate) {
                    if candidate_cost < cost {
                        accepted = Some((candidate, candidate_cost));
                        break;
                    }
                }
            }
            lambda *= 10.0;
        }

        let Some((candidate, candidate_cost)) = accepted else {
            break;
        };
        let improvement = (cost - candidate_cost) / cost.max(f64::MIN_POSITIVE);
        params = candidate;
        cost = candidate_cost;
        lambda = (lambda / 10.0).max(1e-12);
        if improvement < RELATIVE_TOLERANCE {
            break;
        }
    }

    let (jtj, _) = normal_equations(model, xs, ys, &params);
    if solve_linear_system(jtj, vec![1.0; n]).is_none() {
        return Err(SolveError::Singular);
    }

    Ok(Solution {
        params,
        cost,
        iterations,
    })
}

fn sum_of_squares(model: &impl Model, xs: &[f64], ys: &[f64], params: &[f64]) -> Option<f64> {
    let total: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - model.value(*x, params)).powi(2))
        .sum();
    total.is_finite().then_some(total)
}

/// `J^T J` and `J^T r` for residuals `r = y - f(x)`.
fn normal_equations(
    model: &impl Model,
    xs: &[f64],
    ys: &[f64],
    params: &[f64],
) -> (Vec<Vec<f64>>, Vec<f64>) {
    let n = model.param_count();
    let mut jtj = vec![vec![0.0; n]; n];
    let mut jtr = vec![0.0; n];
    let mut gradient = vec![0.0; n];

    for (x, y) in xs.iter().zip(ys) {
        model.gradient(*x, params, &mut gradient);
        let residual = y - model.value(*x, params);
        for i in 0..n {
            jtr[i] += gradient[i] * residual;
            for j in 0..n {
                jtj[i][j] += gradient[i] * gradient[j];
            }
        }
    }
    (jtj, jtr)
}

/// Gaussian elimination with partial pivoting. `None` when the matrix is numerically singular.
pub fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |acc, value| acc.max(value.abs()));
    if !scale.is_finite() || scale == 0.0 {
        return None;
    }

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot_row][col].abs() <= scale * 1e-14 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
