use ndarray::{array, Array1, Array2};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

use crate::data::SubjectStore;
use crate::error::{Error, Result};
use crate::optimization::{LogLikelihood, NewtonRaphson, ObjectiveEval, SolverConfig};

/// Cox proportional-hazards regression on the single treatment covariate
#[derive(Debug, Clone)]
pub struct CoxModel {
    config: SolverConfig,
}

impl Default for CoxModel {
    fn default() -> Self {
        Self {
            config: SolverConfig::default(),
        }
    }
}

impl CoxModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// iteration cap before the fit fails with `NonConvergence`
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// convergence threshold on the coefficient update
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.config.tolerance = tolerance;
        self
    }

    /// maximize the Breslow partial likelihood by Newton-Raphson
    pub fn fit(&self, store: &SubjectStore) -> Result<CoxFit> {
        let n_events = store.n_events();
        if n_events == 0 {
            return Err(Error::insufficient_events(
                "cohort contains no observed events",
            ));
        }

        let objective = PartialLikelihood::new(store);
        let solver = NewtonRaphson::new(self.config.clone());
        let solution = solver.maximize(&objective, Array1::zeros(1))?;

        let information = solution.information[[0, 0]];
        if information <= 0.0 {
            return Err(Error::non_convergence(
                "observed information is non-positive at the optimum",
            ));
        }
        let covariance = 1.0 / information;

        Ok(CoxFit {
            coefficient: solution.theta[0],
            standard_error: covariance.sqrt(),
            log_likelihood: solution.log_likelihood,
            covariance,
            n_events,
        })
    }
}

/// converged Cox fit; hazard ratio and interval are derived on demand
#[derive(Debug, Clone, PartialEq)]
pub struct CoxFit {
    pub coefficient: f64,
    pub standard_error: f64,
    pub log_likelihood: f64,
    /// 1x1 covariance of the coefficient
    pub covariance: f64,
    pub n_events: usize,
}

impl CoxFit {
    pub fn hazard_ratio(&self) -> f64 {
        self.coefficient.exp()
    }

    /// two-sided Wald interval for the hazard ratio at `level` (e.g. 0.95)
    pub fn confidence_interval(&self, level: f64) -> Result<(f64, f64)> {
        let z = critical_value(level)?;
        Ok((
            (self.coefficient - z * self.standard_error).exp(),
            (self.coefficient + z * self.standard_error).exp(),
        ))
    }

    /// Wald p-value against a null hazard ratio of 1
    pub fn p_value(&self) -> f64 {
        let wald = (self.coefficient / self.standard_error).powi(2);
        let chi2 = ChiSquared::new(1.0).expect("freedom = 1");
        1.0 - chi2.cdf(wald)
    }
}

/// standard normal critical value for a two-sided interval at `level`
pub(crate) fn critical_value(level: f64) -> Result<f64> {
    if level <= 0.0 || level >= 1.0 {
        return Err(Error::invalid_input(format!(
            "confidence level must be in (0, 1), got {}",
            level
        )));
    }
    let normal = Normal::new(0.0, 1.0).expect("unit normal");
    Ok(normal.inverse_cdf(0.5 + level / 2.0))
}

/// Breslow partial log-likelihood over the single binary covariate.
///
/// Subjects are walked once per evaluation in descending time order so each
/// risk set is the running suffix; tied event times share one risk-set sum.
struct PartialLikelihood {
    /// (time, event, covariate) sorted by time descending
    records: Vec<(f64, bool, f64)>,
}

impl PartialLikelihood {
    fn new(store: &SubjectStore) -> Self {
        let mut records: Vec<(f64, bool, f64)> = store
            .subjects()
            .iter()
            .map(|s| (s.time, s.event, s.arm.covariate()))
            .collect();
        records.sort_by(|a, b| b.0.partial_cmp(&a.0).expect("times validated finite"));
        Self { records }
    }
}

impl LogLikelihood for PartialLikelihood {
    fn dim(&self) -> usize {
        1
    }

    fn evaluate(&self, theta: &Array1<f64>) -> Result<ObjectiveEval> {
        let beta = theta[0];

        let mut log_likelihood = 0.0;
        let mut gradient = 0.0;
        let mut hessian = 0.0;

        // running risk-set sums: s0 = sum exp(bx), s1 = sum x exp(bx),
        // s2 = sum x^2 exp(bx)
        let mut s0 = 0.0;
        let mut s1 = 0.0;
        let mut s2 = 0.0;

        let n = self.records.len();
        let mut i = 0;
        while i < n {
            let time = self.records[i].0;

            // everyone tied at this time enters the risk set before any of
            // the tied events is scored (Breslow)
            let mut d = 0.0;
            let mut event_x_sum = 0.0;
            let mut j = i;
            while j < n && self.records[j].0 == time {
                let (_, event, x) = self.records[j];
                let weight = (beta * x).exp();
                if !weight.is_finite() {
                    return Err(Error::non_convergence(format!(
                        "risk weight overflow at beta = {}",
                        beta
                    )));
                }
                s0 += weight;
                s1 += x * weight;
                s2 += x * x * weight;
                if event {
                    d += 1.0;
                    event_x_sum += x;
                }
                j += 1;
            }

            if d > 0.0 {
                let mean = s1 / s0;
                log_likelihood += beta * event_x_sum - d * s0.ln();
                gradient += event_x_sum - d * mean;
                hessian -= d * (s2 / s0 - mean * mean);
            }

            i = j;
        }

        Ok(ObjectiveEval {
            log_likelihood,
            gradient: array![gradient],
            hessian: Array2::from_elem((1, 1), hessian),
        })
    }
}
