use rayon::prelude::*;

use crate::cox::{CoxFit, CoxModel};
use crate::data::{Subject, SubjectStore};
use crate::error::{Error, Result};

/// early-period sub-cohort: follow-up administratively censored at the
/// landmark. Subjects reaching the landmark (including exact ties) are
/// censored there.
pub fn early_cohort(store: &SubjectStore, landmark: f64) -> Result<SubjectStore> {
    check_landmark(landmark)?;

    let subjects = store
        .subjects()
        .iter()
        .map(|s| {
            if s.time >= landmark {
                Subject {
                    id: s.id,
                    time: landmark,
                    event: false,
                    arm: s.arm,
                }
            } else {
                s.clone()
            }
        })
        .collect();

    SubjectStore::new(subjects)
}

/// late-period sub-cohort: survivors strictly past the landmark, with time
/// re-originated at zero from it. Exact ties did not survive past the
/// landmark and are excluded.
pub fn late_cohort(store: &SubjectStore, landmark: f64) -> Result<SubjectStore> {
    check_landmark(landmark)?;

    let subjects: Vec<Subject> = store
        .subjects()
        .iter()
        .filter(|s| s.time > landmark)
        .map(|s| Subject {
            id: s.id,
            time: s.time - landmark,
            event: s.event,
            arm: s.arm,
        })
        .collect();

    if subjects.is_empty() {
        return Err(Error::degenerate_cohort(format!(
            "no subjects survive past landmark {}",
            landmark
        )));
    }

    SubjectStore::new(subjects)
}

fn check_landmark(landmark: f64) -> Result<()> {
    if !landmark.is_finite() || landmark <= 0.0 {
        return Err(Error::invalid_input(format!(
            "landmark time must be positive and finite, got {}",
            landmark
        )));
    }
    Ok(())
}

/// independent before/after hazard-ratio estimates at one landmark
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkEstimate {
    pub landmark: f64,
    pub early: CoxFit,
    pub late: CoxFit,
}

/// period-specific hazard ratios via independent Cox refits
#[derive(Debug, Clone, Default)]
pub struct LandmarkAnalyzer {
    model: CoxModel,
}

impl LandmarkAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// use a configured Cox model for the per-period refits
    pub fn with_model(mut self, model: CoxModel) -> Self {
        self.model = model;
        self
    }

    /// refit the treatment effect on each side of the landmark; no
    /// parameters are shared between periods
    pub fn analyze(&self, store: &SubjectStore, landmark: f64) -> Result<LandmarkEstimate> {
        let early = self.model.fit(&early_cohort(store, landmark)?)?;
        let late = self.model.fit(&late_cohort(store, landmark)?)?;

        Ok(LandmarkEstimate {
            landmark,
            early,
            late,
        })
    }

    /// repeated independent application over several landmarks; each
    /// landmark is a self-contained fit, so they run in parallel
    pub fn analyze_all(
        &self,
        store: &SubjectStore,
        landmarks: &[f64],
    ) -> Result<Vec<LandmarkEstimate>> {
        landmarks
            .par_iter()
            .map(|&landmark| self.analyze(store, landmark))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn all_events_at_20() -> SubjectStore {
        SubjectStore::from_columns(&[20.0; 6], &[true; 6], &[0, 0, 0, 1, 1, 1]).unwrap()
    }

    #[test]
    fn test_early_transform_caps_and_censors() {
        let early = early_cohort(&all_events_at_20(), 12.0).unwrap();

        assert_eq!(early.len(), 6);
        for subject in early.subjects() {
            assert_relative_eq!(subject.time, 12.0, epsilon = 1e-12);
            assert!(!subject.event);
        }
    }

    #[test]
    fn test_late_transform_reoriginates() {
        let late = late_cohort(&all_events_at_20(), 12.0).unwrap();

        assert_eq!(late.len(), 6);
        for subject in late.subjects() {
            assert_relative_eq!(subject.time, 8.0, epsilon = 1e-12);
            assert!(subject.event);
        }
    }

    #[test]
    fn test_landmark_tie_policy() {
        // one subject exactly at the landmark
        let store = SubjectStore::from_columns(
            &[6.0, 12.0, 20.0],
            &[true, true, true],
            &[0, 1, 0],
        )
        .unwrap();

        let early = early_cohort(&store, 12.0).unwrap();
        let at_landmark = &early.subjects()[1];
        assert_relative_eq!(at_landmark.time, 12.0, epsilon = 1e-12);
        assert!(!at_landmark.event, "tie at the landmark is censored early");

        let late = late_cohort(&store, 12.0).unwrap();
        assert_eq!(late.len(), 1, "tie at the landmark is excluded late");
        assert_relative_eq!(late.subjects()[0].time, 8.0, epsilon = 1e-12);
    }

    #[test]
    fn test_transforms_leave_original_untouched() {
        let store = all_events_at_20();
        let _ = early_cohort(&store, 12.0).unwrap();
        let _ = late_cohort(&store, 12.0).unwrap();

        assert!(store.subjects().iter().all(|s| s.time == 20.0 && s.event));
    }

    #[test]
    fn test_empty_late_cohort_is_degenerate() {
        let result = late_cohort(&all_events_at_20(), 25.0);
        assert!(matches!(result, Err(Error::DegenerateCohort { .. })));
    }

    #[test]
    fn test_invalid_landmark_rejected() {
        let store = all_events_at_20();
        assert!(early_cohort(&store, 0.0).is_err());
        assert!(early_cohort(&store, -3.0).is_err());
        assert!(late_cohort(&store, f64::NAN).is_err());
    }

    #[test]
    fn test_analyze_surfaces_insufficient_events() {
        // every event is at 20, so the early cohort at 12 has none
        let result = LandmarkAnalyzer::new().analyze(&all_events_at_20(), 12.0);
        assert!(matches!(result, Err(Error::InsufficientEvents { .. })));
    }

    #[test]
    fn test_analyze_all_runs_per_landmark() {
        // events spread on both sides of each landmark, both arms
        let times: Vec<f64> = (1..=40).map(|i| i as f64).collect();
        let events = vec![true; 40];
        let arms: Vec<u8> = (0..40).map(|i| (i % 2) as u8).collect();
        let store = SubjectStore::from_columns(&times, &events, &arms).unwrap();

        let estimates = LandmarkAnalyzer::new()
            .analyze_all(&store, &[10.0, 20.0])
            .unwrap();

        assert_eq!(estimates.len(), 2);
        assert_relative_eq!(estimates[0].landmark, 10.0, epsilon = 1e-12);
        assert_relative_eq!(estimates[1].landmark, 20.0, epsilon = 1e-12);
        for estimate in &estimates {
            assert!(estimate.early.hazard_ratio() > 0.0);
            assert!(estimate.late.hazard_ratio() > 0.0);
        }
    }
}
