use ndarray::{s, Array1, Array2};

use crate::cox::critical_value;
use crate::data::SubjectStore;
use crate::error::{Error, Result};
use crate::optimization::{invert, LogLikelihood, NewtonRaphson, ObjectiveEval, SolverConfig};
use crate::spline::SplineBasis;

/// flexible parametric (spline-on-log-cumulative-hazard) survival model with
/// a time-varying treatment coefficient:
/// `log H(t|x) = s0(log t) . gamma + x * s1(log t) . delta`
#[derive(Debug, Clone)]
pub struct FlexibleParametricModel {
    baseline_df: usize,
    tvc_df: usize,
    baseline_knots: Option<Vec<f64>>,
    tvc_knots: Option<Vec<f64>>,
    config: SolverConfig,
}

impl Default for FlexibleParametricModel {
    fn default() -> Self {
        Self {
            baseline_df: 3,
            tvc_df: 2,
            baseline_knots: None,
            tvc_knots: None,
            config: SolverConfig {
                max_iterations: 100,
                tolerance: 1e-8,
            },
        }
    }
}

impl FlexibleParametricModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// degrees of freedom of the baseline log-cumulative-hazard spline
    pub fn with_baseline_df(mut self, df: usize) -> Self {
        self.baseline_df = df;
        self
    }

    /// degrees of freedom of the time-varying treatment term; 0 constrains
    /// the treatment effect to a constant (proportional hazards)
    pub fn with_tvc_df(mut self, df: usize) -> Self {
        self.tvc_df = df;
        self
    }

    /// place the baseline interior knots explicitly (log-time scale) instead
    /// of at event-time quantiles
    pub fn with_baseline_knots(mut self, knots: Vec<f64>) -> Self {
        self.baseline_knots = Some(knots);
        self
    }

    /// place the time-varying-effect interior knots explicitly (log-time
    /// scale) instead of at event-time quantiles
    pub fn with_tvc_knots(mut self, knots: Vec<f64>) -> Self {
        self.tvc_knots = Some(knots);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.config.tolerance = tolerance;
        self
    }

    /// maximize the full censored-data likelihood over all spline
    /// coefficients jointly
    pub fn fit(&self, store: &SubjectStore) -> Result<FlexibleParametricFit> {
        if store.n_events() == 0 {
            return Err(Error::insufficient_events(
                "cohort contains no observed events",
            ));
        }

        let event_log_times: Vec<f64> = store
            .subjects()
            .iter()
            .filter(|s| s.event)
            .map(|s| s.time.ln())
            .collect();

        let boundary = log_time_boundary(&event_log_times)?;
        let baseline_basis = match &self.baseline_knots {
            Some(knots) => SplineBasis::with_knots(boundary, knots.clone())?,
            None => SplineBasis::natural(&event_log_times, self.baseline_df)?,
        };
        let tvc_basis = match (&self.tvc_knots, self.tvc_df) {
            (Some(knots), _) => SplineBasis::with_knots(boundary, knots.clone())?,
            (None, 0) => SplineBasis::constant(),
            (None, df) => SplineBasis::natural(&event_log_times, df)?,
        };

        let objective = FullLikelihood::new(store, &baseline_basis, &tvc_basis);

        // exponential-model start: H(t) = lambda t, i.e. intercept ln(lambda)
        // and unit slope on log time
        let p0 = baseline_basis.n_terms();
        let p1 = tvc_basis.n_terms();
        let mut init = Array1::zeros(p0 + p1);
        init[0] = (store.n_events() as f64 / store.total_follow_up()).ln();
        init[1] = 1.0;

        let solver = NewtonRaphson::new(self.config.clone());
        let solution = solver.maximize(&objective, init)?;
        let covariance = invert(&solution.information)?;

        let times = store.subjects().iter().map(|s| s.time);
        let time_domain = (
            times.clone().fold(f64::INFINITY, f64::min),
            times.fold(f64::NEG_INFINITY, f64::max),
        );

        Ok(FlexibleParametricFit {
            baseline_coefficients: solution.theta.slice(s![..p0]).to_owned(),
            tvc_coefficients: solution.theta.slice(s![p0..]).to_owned(),
            baseline_basis,
            tvc_basis,
            covariance,
            log_likelihood: solution.log_likelihood,
            time_domain,
        })
    }
}

fn log_time_boundary(event_log_times: &[f64]) -> Result<(f64, f64)> {
    let min = event_log_times.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = event_log_times.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !(min.is_finite() && max.is_finite()) || min >= max {
        return Err(Error::invalid_input(
            "event times must include at least two distinct values",
        ));
    }
    Ok((min, max))
}

/// one point of the HR(t) curve with its pointwise confidence band
#[derive(Debug, Clone, PartialEq)]
pub struct HazardRatioPoint {
    pub time: f64,
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
}

/// immutable fitted model; predictions are pure functions of it
#[derive(Debug, Clone)]
pub struct FlexibleParametricFit {
    pub baseline_basis: SplineBasis,
    pub tvc_basis: SplineBasis,
    pub baseline_coefficients: Array1<f64>,
    pub tvc_coefficients: Array1<f64>,
    /// joint covariance of (baseline, tvc) coefficients
    pub covariance: Array2<f64>,
    pub log_likelihood: f64,
    /// observed follow-up range; queries outside it are rejected
    pub time_domain: (f64, f64),
}

impl FlexibleParametricFit {
    fn check_domain(&self, time: f64) -> Result<()> {
        let (min, max) = self.time_domain;
        if !time.is_finite() || time < min || time > max {
            return Err(Error::out_of_range(format!(
                "time {} outside fitted domain [{}, {}]",
                time, min, max
            )));
        }
        Ok(())
    }

    /// time-varying treatment log hazard ratio at `time`
    pub fn log_hazard_ratio_at(&self, time: f64) -> Result<f64> {
        self.check_domain(time)?;
        let row = self.tvc_basis.evaluate(time.ln());
        Ok(row.dot(&self.tvc_coefficients))
    }

    /// HR(t) with a delta-method pointwise interval at `level`
    pub fn hazard_ratio_at(&self, time: f64, level: f64) -> Result<HazardRatioPoint> {
        self.check_domain(time)?;
        let z = critical_value(level)?;

        let row = self.tvc_basis.evaluate(time.ln());
        let log_hr = row.dot(&self.tvc_coefficients);

        // variance of the tvc linear predictor from the tvc block of the
        // joint covariance
        let p0 = self.baseline_basis.n_terms();
        let block = self.covariance.slice(s![p0.., p0..]);
        let variance = row.dot(&block.dot(&row)).max(0.0);
        let half_width = z * variance.sqrt();

        Ok(HazardRatioPoint {
            time,
            estimate: log_hr.exp(),
            lower: (log_hr - half_width).exp(),
            upper: (log_hr + half_width).exp(),
        })
    }

    /// ordered HR(t) curve over the query times
    pub fn hr_curve(&self, times: &[f64], level: f64) -> Result<Vec<HazardRatioPoint>> {
        let mut points = times
            .iter()
            .map(|&t| self.hazard_ratio_at(t, level))
            .collect::<Result<Vec<_>>>()?;
        points.sort_by(|a, b| a.time.partial_cmp(&b.time).expect("domain-checked times"));
        Ok(points)
    }

    /// fitted cumulative hazard for one arm at `time`
    pub fn cumulative_hazard_at(&self, time: f64, treated: bool) -> Result<f64> {
        self.check_domain(time)?;
        let u = time.ln();
        let mut eta = self.baseline_basis.evaluate(u).dot(&self.baseline_coefficients);
        if treated {
            eta += self.tvc_basis.evaluate(u).dot(&self.tvc_coefficients);
        }
        Ok(eta.exp())
    }

    /// fitted survival for one arm at `time`
    pub fn survival_at(&self, time: f64, treated: bool) -> Result<f64> {
        Ok((-self.cumulative_hazard_at(time, treated)?).exp())
    }
}

/// full (not partial) censored-data log-likelihood on the
/// log-cumulative-hazard scale. Events contribute
/// `eta + ln(d eta/d log t) - log t - exp(eta)`, censored subjects
/// `-exp(eta)`.
struct FullLikelihood {
    /// value design rows: [s0(u), x * s1(u)]
    design: Array2<f64>,
    /// derivative (w.r.t. log t) design rows
    derivative_design: Array2<f64>,
    events: Vec<bool>,
    log_times: Vec<f64>,
}

impl FullLikelihood {
    fn new(store: &SubjectStore, baseline: &SplineBasis, tvc: &SplineBasis) -> Self {
        let n = store.len();
        let p0 = baseline.n_terms();
        let p1 = tvc.n_terms();

        let mut design = Array2::zeros((n, p0 + p1));
        let mut derivative_design = Array2::zeros((n, p0 + p1));
        let mut events = Vec::with_capacity(n);
        let mut log_times = Vec::with_capacity(n);

        for (i, subject) in store.subjects().iter().enumerate() {
            let u = subject.time.ln();
            let x = subject.arm.covariate();

            let b0 = baseline.evaluate(u);
            let db0 = baseline.derivative(u);
            let b1 = tvc.evaluate(u);
            let db1 = tvc.derivative(u);

            for j in 0..p0 {
                design[[i, j]] = b0[j];
                derivative_design[[i, j]] = db0[j];
            }
            for j in 0..p1 {
                design[[i, p0 + j]] = x * b1[j];
                derivative_design[[i, p0 + j]] = x * db1[j];
            }

            events.push(subject.event);
            log_times.push(u);
        }

        Self {
            design,
            derivative_design,
            events,
            log_times,
        }
    }
}

impl LogLikelihood for FullLikelihood {
    fn dim(&self) -> usize {
        self.design.ncols()
    }

    fn evaluate(&self, theta: &Array1<f64>) -> Result<ObjectiveEval> {
        let p = self.dim();
        let mut log_likelihood = 0.0;
        let mut gradient = Array1::zeros(p);
        let mut hessian = Array2::zeros((p, p));

        for i in 0..self.events.len() {
            let z = self.design.row(i);
            let eta: f64 = z.dot(theta);
            if eta > 700.0 {
                // exp would overflow; reject the step
                return Err(Error::non_convergence("linear predictor overflow"));
            }
            let hazard_scale = eta.exp();

            log_likelihood -= hazard_scale;
            for j in 0..p {
                gradient[j] -= hazard_scale * z[j];
                for k in 0..p {
                    hessian[[j, k]] -= hazard_scale * z[j] * z[k];
                }
            }

            if self.events[i] {
                let dz = self.derivative_design.row(i);
                let deta: f64 = dz.dot(theta);
                if deta <= 0.0 {
                    // fitted hazard would be non-positive at this event;
                    // outside the valid region
                    return Err(Error::non_convergence(
                        "non-positive fitted hazard at an event time",
                    ));
                }

                log_likelihood += eta + deta.ln() - self.log_times[i];
                for j in 0..p {
                    gradient[j] += z[j] + dz[j] / deta;
                    for k in 0..p {
                        hessian[[j, k]] -= dz[j] * dz[k] / (deta * deta);
                    }
                }
            }
        }

        Ok(ObjectiveEval {
            log_likelihood,
            gradient,
            hessian,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cox::CoxModel;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// exponential two-arm cohort with constant hazard ratio exp(beta) and
    /// administrative censoring
    fn exponential_store(n_per_arm: usize, beta: f64, seed: u64) -> SubjectStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut times = Vec::new();
        let mut events = Vec::new();
        let mut arms = Vec::new();

        for arm in [0u8, 1u8] {
            let hazard = 0.1 * if arm == 1 { beta.exp() } else { 1.0 };
            for _ in 0..n_per_arm {
                let draw: f64 = rng.gen();
                let t = -draw.ln() / hazard;
                let censor = 30.0;
                if t < censor {
                    times.push(t.max(1e-3));
                    events.push(true);
                } else {
                    times.push(censor);
                    events.push(false);
                }
                arms.push(arm);
            }
        }

        SubjectStore::from_columns(&times, &events, &arms).unwrap()
    }

    #[test]
    fn test_fit_converges_on_exponential_data() {
        let store = exponential_store(150, -0.5, 7);
        let fit = FlexibleParametricModel::new()
            .with_baseline_df(2)
            .with_tvc_df(1)
            .fit(&store)
            .unwrap();

        assert!(fit.log_likelihood.is_finite());
        assert_eq!(fit.baseline_coefficients.len(), 3);
        assert_eq!(fit.tvc_coefficients.len(), 2);

        let point = fit.hazard_ratio_at(10.0, 0.95).unwrap();
        assert!(point.estimate > 0.0);
        assert!(point.lower < point.estimate && point.estimate < point.upper);
    }

    #[test]
    fn test_constant_tvc_matches_cox_hazard_ratio() {
        let store = exponential_store(200, -0.5, 11);

        let cox = CoxModel::new().fit(&store).unwrap();
        let flexible = FlexibleParametricModel::new()
            .with_baseline_df(2)
            .with_tvc_df(0)
            .fit(&store)
            .unwrap();

        // tvc df 0 constrains the effect to a constant, which must agree
        // with the proportional-hazards estimate
        let log_hr = flexible.log_hazard_ratio_at(10.0).unwrap();
        assert_relative_eq!(log_hr, cox.coefficient, epsilon = 0.1);

        // and it is the same constant everywhere in the domain
        let elsewhere = flexible.log_hazard_ratio_at(2.0).unwrap();
        assert_relative_eq!(log_hr, elsewhere, epsilon = 1e-12);
    }

    #[test]
    fn test_out_of_range_queries_rejected() {
        let store = exponential_store(100, 0.0, 3);
        let fit = FlexibleParametricModel::new()
            .with_baseline_df(2)
            .with_tvc_df(1)
            .fit(&store)
            .unwrap();

        let (min, max) = fit.time_domain;
        assert!(fit.hazard_ratio_at(max, 0.95).is_ok());
        assert!(matches!(
            fit.hazard_ratio_at(max * 1.01, 0.95),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            fit.hazard_ratio_at(min * 0.5, 0.95),
            Err(Error::OutOfRange { .. })
        ));
        assert!(fit.hr_curve(&[max * 2.0], 0.95).is_err());
    }

    #[test]
    fn test_hr_curve_is_ordered() {
        let store = exponential_store(120, -0.3, 5);
        let fit = FlexibleParametricModel::new()
            .with_baseline_df(2)
            .with_tvc_df(1)
            .fit(&store)
            .unwrap();

        let (min, max) = fit.time_domain;
        let queries = [max * 0.9, min * 1.1, (min + max) / 2.0];
        let curve = fit.hr_curve(&queries, 0.95).unwrap();

        assert_eq!(curve.len(), 3);
        assert!(curve.windows(2).all(|w| w[0].time <= w[1].time));
        for point in &curve {
            assert!(point.lower <= point.estimate && point.estimate <= point.upper);
        }
    }

    #[test]
    fn test_survival_is_monotone_and_bounded() {
        let store = exponential_store(150, -0.4, 9);
        let fit = FlexibleParametricModel::new()
            .with_baseline_df(3)
            .with_tvc_df(1)
            .fit(&store)
            .unwrap();

        let (min, max) = fit.time_domain;
        let mut previous = 1.0;
        for step in 1..=20 {
            let t = min + (max - min) * step as f64 / 20.0;
            let s = fit.survival_at(t, false).unwrap();
            assert!((0.0..=1.0).contains(&s));
            assert!(s <= previous + 1e-8);
            previous = s;
        }
    }

    #[test]
    fn test_explicit_knots_are_honored() {
        let store = exponential_store(150, -0.4, 17);
        let fit = FlexibleParametricModel::new()
            .with_baseline_knots(vec![0.5, 1.5])
            .with_tvc_df(0)
            .fit(&store)
            .unwrap();

        assert_eq!(fit.baseline_basis.interior_knots(), &[0.5, 1.5]);
        assert_eq!(fit.baseline_coefficients.len(), 4);
    }

    #[test]
    fn test_zero_events_fails() {
        let store =
            SubjectStore::from_columns(&[5.0, 6.0], &[false, false], &[0, 1]).unwrap();
        let result = FlexibleParametricModel::new().fit(&store);
        assert!(matches!(result, Err(Error::InsufficientEvents { .. })));
    }

    #[test]
    fn test_iteration_cap_surfaces_non_convergence() {
        let store = exponential_store(80, 0.0, 2);
        let result = FlexibleParametricModel::new()
            .with_max_iterations(1)
            .fit(&store);
        assert!(matches!(result, Err(Error::NonConvergence { .. })));
    }

    #[test]
    fn test_refit_is_identical() {
        let store = exponential_store(100, -0.2, 13);
        let model = FlexibleParametricModel::new().with_baseline_df(2).with_tvc_df(1);
        let a = model.fit(&store).unwrap();
        let b = model.fit(&store).unwrap();
        assert_eq!(a.baseline_coefficients, b.baseline_coefficients);
        assert_eq!(a.tvc_coefficients, b.tvc_coefficients);
    }
}
