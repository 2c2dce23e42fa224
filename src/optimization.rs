use log::debug;
use ndarray::{Array1, Array2};

use crate::error::{Error, Result};

/// value, gradient and Hessian of a log-likelihood at one point
#[derive(Debug, Clone)]
pub struct ObjectiveEval {
    pub log_likelihood: f64,
    pub gradient: Array1<f64>,
    pub hessian: Array2<f64>,
}

/// a twice-differentiable log-likelihood surface; both the partial-likelihood
/// Cox objective and the full-likelihood spline objective implement this, so
/// one solver drives every fit in the crate
pub trait LogLikelihood {
    fn dim(&self) -> usize;

    /// evaluate at `theta`. An `Err` signals an invalid parameter region
    /// (e.g. a non-positive fitted hazard); the solver treats it as a
    /// rejected line-search step rather than a fatal error.
    fn evaluate(&self, theta: &Array1<f64>) -> Result<ObjectiveEval>;
}

#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-8,
        }
    }
}

/// converged maximizer state
#[derive(Debug, Clone)]
pub struct Solution {
    pub theta: Array1<f64>,
    pub log_likelihood: f64,
    /// observed information (negative Hessian) at the maximum
    pub information: Array2<f64>,
    pub iterations: usize,
}

const MAX_HALVINGS: usize = 30;

/// Newton-Raphson maximizer with step-halving
pub struct NewtonRaphson {
    config: SolverConfig,
}

impl NewtonRaphson {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn maximize(
        &self,
        objective: &impl LogLikelihood,
        init: Array1<f64>,
    ) -> Result<Solution> {
        if init.len() != objective.dim() {
            return Err(Error::invalid_input(format!(
                "initial point has dimension {}, objective expects {}",
                init.len(),
                objective.dim()
            )));
        }

        let mut theta = init;
        let mut eval = objective.evaluate(&theta)?;

        for iteration in 0..self.config.max_iterations {
            let neg_hessian = eval.hessian.mapv(|h| -h);
            let direction = solve(&neg_hessian, &eval.gradient)?;

            // halve the step until the likelihood stops getting worse and the
            // candidate stays inside the valid parameter region
            let mut accepted = None;
            let mut scale = 1.0;
            for _ in 0..MAX_HALVINGS {
                let candidate = &theta + &direction.mapv(|d| d * scale);
                match objective.evaluate(&candidate) {
                    Ok(next)
                        if next.log_likelihood.is_finite()
                            && next.log_likelihood >= eval.log_likelihood - 1e-10 =>
                    {
                        accepted = Some((candidate, next));
                        break;
                    }
                    _ => scale *= 0.5,
                }
            }

            let (candidate, next) = accepted.ok_or_else(|| {
                Error::non_convergence(format!(
                    "step halving exhausted at iteration {}",
                    iteration
                ))
            })?;

            let max_step = direction.iter().fold(0.0_f64, |m, d| m.max((d * scale).abs()));
            debug!(
                "newton iteration {}: loglik {:.6}, max step {:.3e}",
                iteration, next.log_likelihood, max_step
            );

            theta = candidate;
            eval = next;

            if max_step < self.config.tolerance {
                return Ok(Solution {
                    theta,
                    log_likelihood: eval.log_likelihood,
                    information: eval.hessian.mapv(|h| -h),
                    iterations: iteration + 1,
                });
            }
        }

        Err(Error::non_convergence(format!(
            "no convergence after {} iterations",
            self.config.max_iterations
        )))
    }
}

/// solve Ax = b by Gaussian elimination with partial pivoting
pub(crate) fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return Err(Error::invalid_input("linear system dimensions mismatch"));
    }

    let mut a = a.clone();
    let mut b = b.clone();

    for i in 0..n {
        let mut pivot = i;
        for k in i + 1..n {
            if a[[k, i]].abs() > a[[pivot, i]].abs() {
                pivot = k;
            }
        }

        if a[[pivot, i]].abs() < 1e-12 {
            return Err(Error::non_convergence(
                "information matrix is singular",
            ));
        }

        if pivot != i {
            for j in 0..n {
                a.swap([i, j], [pivot, j]);
            }
            b.swap(i, pivot);
        }

        for k in i + 1..n {
            let factor = a[[k, i]] / a[[i, i]];
            for j in i..n {
                a[[k, j]] -= factor * a[[i, j]];
            }
            b[k] -= factor * b[i];
        }
    }

    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = b[i];
        for j in i + 1..n {
            x[i] -= a[[i, j]] * x[j];
        }
        x[i] /= a[[i, i]];
    }

    Ok(x)
}

/// invert a small dense matrix by solving against identity columns
pub(crate) fn invert(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    let mut inverse = Array2::zeros((n, n));
    for j in 0..n {
        let mut unit = Array1::zeros(n);
        unit[j] = 1.0;
        let column = solve(a, &unit)?;
        for i in 0..n {
            inverse[[i, j]] = column[i];
        }
    }
    Ok(inverse)
}
