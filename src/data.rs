use crate::error::{Error, Result};

/// trial arm of a subject - doubles as the single binary covariate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arm {
    Control,
    Treatment,
}

impl Arm {
    /// numeric covariate value used by the models (0 = control, 1 = treatment)
    pub fn covariate(self) -> f64 {
        match self {
            Arm::Control => 0.0,
            Arm::Treatment => 1.0,
        }
    }

    /// decode the 0/1 arm column of a tabular input
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Arm::Control),
            1 => Ok(Arm::Treatment),
            other => Err(Error::invalid_input(format!(
                "arm code must be 0 or 1, got {}",
                other
            ))),
        }
    }
}

/// one right-censored follow-up record
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub id: usize,
    pub time: f64, // follow-up duration, > 0
    pub event: bool, // true = event observed, false = censored
    pub arm: Arm,
}

/// immutable collection of subject records - the single input every
/// estimator in this crate consumes
#[derive(Debug, Clone)]
pub struct SubjectStore {
    subjects: Vec<Subject>,
}

impl SubjectStore {
    /// build a store from records, rejecting non-positive or non-finite times
    pub fn new(subjects: Vec<Subject>) -> Result<Self> {
        if subjects.is_empty() {
            return Err(Error::invalid_input("subject collection is empty"));
        }

        for subject in &subjects {
            if !subject.time.is_finite() || subject.time <= 0.0 {
                return Err(Error::invalid_input(format!(
                    "subject {} has invalid follow-up time {}",
                    subject.id, subject.time
                )));
            }
        }

        Ok(Self { subjects })
    }

    /// build a store from parallel time, event/status and arm columns;
    /// ids are assigned from row order
    pub fn from_columns(times: &[f64], events: &[bool], arms: &[u8]) -> Result<Self> {
        if times.len() != events.len() || times.len() != arms.len() {
            return Err(Error::invalid_input(format!(
                "column lengths differ: {} times, {} events, {} arms",
                times.len(),
                events.len(),
                arms.len()
            )));
        }

        let subjects = times
            .iter()
            .zip(events)
            .zip(arms)
            .enumerate()
            .map(|(id, ((&time, &event), &arm))| {
                Ok(Subject {
                    id,
                    time,
                    event,
                    arm: Arm::from_code(arm)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(subjects)
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// read-only view of the canonical records
    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    /// number of observed (non-censored) events
    pub fn n_events(&self) -> usize {
        self.subjects.iter().filter(|s| s.event).count()
    }

    /// distinct observed event times, ascending (ties collapse to one entry)
    pub fn distinct_event_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .subjects
            .iter()
            .filter(|s| s.event)
            .map(|s| s.time)
            .collect();
        times.sort_by(|a, b| a.partial_cmp(b).expect("times validated finite"));
        times.dedup();
        times
    }

    /// largest observed follow-up time (event or censoring)
    pub fn max_time(&self) -> f64 {
        self.subjects
            .iter()
            .map(|s| s.time)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// total person-time under observation
    pub fn total_follow_up(&self) -> f64 {
        self.subjects.iter().map(|s| s.time).sum()
    }

    /// derive the single-arm sub-collection as a fresh store
    pub fn restrict_to_arm(&self, arm: Arm) -> Result<Self> {
        let subjects: Vec<Subject> = self
            .subjects
            .iter()
            .filter(|s| s.arm == arm)
            .cloned()
            .collect();

        if subjects.is_empty() {
            return Err(Error::invalid_input(format!("no subjects in {:?} arm", arm)));
        }
        Ok(Self { subjects })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_arm_store() -> SubjectStore {
        SubjectStore::from_columns(
            &[1.0, 2.0, 2.0, 3.0, 5.0],
            &[true, true, false, true, false],
            &[0, 1, 0, 1, 1],
        )
        .unwrap()
    }

    #[test]
    fn test_store_creation() {
        let store = two_arm_store();
        assert_eq!(store.len(), 5);
        assert_eq!(store.n_events(), 3);
        assert_eq!(store.distinct_event_times(), vec![1.0, 2.0, 3.0]);
        assert_eq!(store.max_time(), 5.0);
    }

    #[test]
    fn test_zero_time_rejected() {
        let result = SubjectStore::from_columns(&[0.0, 1.0], &[true, true], &[0, 1]);
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[test]
    fn test_negative_and_non_finite_time_rejected() {
        assert!(SubjectStore::from_columns(&[-1.0], &[true], &[0]).is_err());
        assert!(SubjectStore::from_columns(&[f64::NAN], &[true], &[0]).is_err());
        assert!(SubjectStore::from_columns(&[f64::INFINITY], &[true], &[0]).is_err());
    }

    #[test]
    fn test_column_length_mismatch_rejected() {
        let result = SubjectStore::from_columns(&[1.0, 2.0], &[true], &[0, 1]);
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[test]
    fn test_bad_arm_code_rejected() {
        let result = SubjectStore::from_columns(&[1.0], &[true], &[2]);
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[test]
    fn test_empty_store_rejected() {
        assert!(SubjectStore::new(Vec::new()).is_err());
    }

    #[test]
    fn test_arm_restriction_is_a_copy() {
        let store = two_arm_store();
        let control = store.restrict_to_arm(Arm::Control).unwrap();
        assert_eq!(control.len(), 2);
        assert!(control.subjects().iter().all(|s| s.arm == Arm::Control));
        // original untouched
        assert_eq!(store.len(), 5);
    }
}
