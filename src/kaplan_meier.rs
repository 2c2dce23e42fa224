use crate::data::{Arm, SubjectStore};
use crate::error::Result;

/// one step of the product-limit curve, recorded at a distinct event time
#[derive(Debug, Clone, PartialEq)]
pub struct KaplanMeierStep {
    pub time: f64,
    pub survival: f64,
    pub at_risk: usize,
    pub events: usize,
    /// Greenwood pointwise variance of the survival estimate
    pub variance: f64,
}

/// non-parametric survival curve with Greenwood variance
#[derive(Debug, Clone)]
pub struct KaplanMeierCurve {
    steps: Vec<KaplanMeierStep>,
}

/// per-arm curves for a stratified estimate
#[derive(Debug, Clone)]
pub struct StratifiedCurves {
    pub control: KaplanMeierCurve,
    pub treatment: KaplanMeierCurve,
}

pub struct KaplanMeierEstimator;

impl KaplanMeierEstimator {
    /// fit the pooled curve over all subjects
    pub fn fit(store: &SubjectStore) -> Result<KaplanMeierCurve> {
        let mut pairs: Vec<(f64, bool)> = store
            .subjects()
            .iter()
            .map(|s| (s.time, s.event))
            .collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("times validated finite"));

        let n = pairs.len();
        let mut steps = Vec::new();
        let mut survival = 1.0;
        let mut greenwood_sum = 0.0;

        let mut i = 0;
        while i < n {
            let time = pairs[i].0;
            let at_risk = n - i;

            // all subjects tied at this time leave the risk set together
            let mut events = 0;
            let mut j = i;
            while j < n && pairs[j].0 == time {
                if pairs[j].1 {
                    events += 1;
                }
                j += 1;
            }

            // censoring alone shrinks the next risk set but is not a step
            if events > 0 {
                survival *= 1.0 - events as f64 / at_risk as f64;
                if at_risk > events {
                    greenwood_sum +=
                        events as f64 / (at_risk as f64 * (at_risk - events) as f64);
                }
                steps.push(KaplanMeierStep {
                    time,
                    survival,
                    at_risk,
                    events,
                    variance: survival * survival * greenwood_sum,
                });
            }

            i = j;
        }

        Ok(KaplanMeierCurve { steps })
    }

    /// fit one curve per arm
    pub fn fit_stratified(store: &SubjectStore) -> Result<StratifiedCurves> {
        Ok(StratifiedCurves {
            control: Self::fit(&store.restrict_to_arm(Arm::Control)?)?,
            treatment: Self::fit(&store.restrict_to_arm(Arm::Treatment)?)?,
        })
    }
}

impl KaplanMeierCurve {
    pub fn steps(&self) -> &[KaplanMeierStep] {
        &self.steps
    }

    /// step-function lookup: survival at the last event time <= `time`,
    /// 1.0 before the first event time
    pub fn survival_at(&self, time: f64) -> f64 {
        self.last_step_at(time).map_or(1.0, |s| s.survival)
    }

    /// `1 - S(t)` via the same step lookup
    pub fn cumulative_incidence_at(&self, time: f64) -> f64 {
        1.0 - self.survival_at(time)
    }

    /// Greenwood variance at the last event time <= `time`, 0.0 before it
    pub fn variance_at(&self, time: f64) -> f64 {
        self.last_step_at(time).map_or(0.0, |s| s.variance)
    }

    fn last_step_at(&self, time: f64) -> Option<&KaplanMeierStep> {
        self.steps.iter().take_while(|s| s.time <= time).last()
    }
}
