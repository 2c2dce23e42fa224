use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::cox::CoxFit;
use crate::data::SubjectStore;
use crate::error::{Error, Result};

/// monotone transform of event time the scaled residuals are regressed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeTransform {
    /// rank order of the event times
    #[default]
    Rank,
    Identity,
    Log,
}

/// one observed event's contribution to the diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct SchoenfeldResidual {
    pub event_time: f64,
    /// raw residual: covariate minus the risk-set weighted mean
    pub residual: f64,
    /// raw residual scaled by n_events * var(beta)
    pub scaled: f64,
}

/// outcome of the proportional-hazards score test. The p-value is advisory
/// output; thresholding it is the caller's concern.
#[derive(Debug, Clone)]
pub struct SchoenfeldTest {
    pub test_statistic: f64,
    pub p_value: f64,
    pub residuals: Vec<SchoenfeldResidual>,
}

/// proportional-hazards diagnostic from a converged Cox fit
#[derive(Debug, Clone, Default)]
pub struct SchoenfeldDiagnostic {
    transform: TimeTransform,
}

impl SchoenfeldDiagnostic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transform(mut self, transform: TimeTransform) -> Self {
        self.transform = transform;
        self
    }

    /// compute scaled residuals and the chi-square(1) test against the
    /// slope of residuals over transformed event time
    pub fn compute(&self, fit: &CoxFit, store: &SubjectStore) -> Result<SchoenfeldTest> {
        if store.n_events() != fit.n_events {
            return Err(Error::invalid_input(format!(
                "fit has {} events but the collection has {}",
                fit.n_events,
                store.n_events()
            )));
        }
        if fit.n_events < 2 {
            return Err(Error::insufficient_events(
                "proportional-hazards test needs at least two events",
            ));
        }

        let residuals = self.residual_series(fit, store);
        debug_assert_eq!(residuals.len(), fit.n_events);

        let d = fit.n_events as f64;
        let transformed: Vec<f64> = residuals
            .iter()
            .enumerate()
            .map(|(k, r)| match self.transform {
                TimeTransform::Rank => (k + 1) as f64,
                TimeTransform::Identity => r.event_time,
                TimeTransform::Log => r.event_time.ln(),
            })
            .collect();
        let g_mean = transformed.iter().sum::<f64>() / d;

        let mut cross = 0.0;
        let mut g_ss = 0.0;
        for (g, r) in transformed.iter().zip(&residuals) {
            cross += (g - g_mean) * r.residual;
            g_ss += (g - g_mean) * (g - g_mean);
        }

        if g_ss <= 0.0 {
            return Err(Error::invalid_input(
                "transformed event times have zero variance",
            ));
        }

        // Grambsch-Therneau score statistic for a single covariate
        let test_statistic = d * fit.covariance * cross * cross / g_ss;
        let chi2 = ChiSquared::new(1.0).expect("freedom = 1");
        let p_value = 1.0 - chi2.cdf(test_statistic);

        Ok(SchoenfeldTest {
            test_statistic,
            p_value,
            residuals,
        })
    }

    /// per-event residuals in ascending event-time order; ties keep the
    /// record order of the store
    fn residual_series(&self, fit: &CoxFit, store: &SubjectStore) -> Vec<SchoenfeldResidual> {
        let beta = fit.coefficient;

        // risk-set weighted covariate mean at each distinct event time
        let distinct = store.distinct_event_times();
        let means: Vec<f64> = distinct
            .iter()
            .map(|&t| {
                let mut s0 = 0.0;
                let mut s1 = 0.0;
                for s in store.subjects().iter().filter(|s| s.time >= t) {
                    let x = s.arm.covariate();
                    let w = (beta * x).exp();
                    s0 += w;
                    s1 += x * w;
                }
                s1 / s0
            })
            .collect();

        let mut events: Vec<&crate::data::Subject> =
            store.subjects().iter().filter(|s| s.event).collect();
        events.sort_by(|a, b| a.time.partial_cmp(&b.time).expect("times validated finite"));

        let scale = fit.n_events as f64 * fit.covariance;
        events
            .into_iter()
            .map(|s| {
                let idx = distinct
                    .binary_search_by(|t| t.partial_cmp(&s.time).expect("finite"))
                    .expect("every event time is a distinct event time");
                let residual = s.arm.covariate() - means[idx];
                SchoenfeldResidual {
                    event_time: s.time,
                    residual,
                    scaled: scale * residual,
                }
            })
            .collect()
    }
}
