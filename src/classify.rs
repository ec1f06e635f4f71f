use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ActivityState, Sample};

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("thresholds must be finite (fidget {fidget}, active {active})")]
    NonFinite { fidget: f64, active: f64 },

    #[error("fidget threshold {fidget} must be below active threshold {active}")]
    Unordered { fidget: f64, active: f64 },
}

/// Acceleration cut points separating the three activity states.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub fidget: f64,
    pub active: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            fidget: 0.020,
            active: 0.040,
        }
    }
}

impl Thresholds {
    pub fn new(fidget: f64, active: f64) -> Result<Self, ThresholdError> {
        if !fidget.is_finite() || !active.is_finite() {
            return Err(ThresholdError::NonFinite { fidget, active });
        }
        if fidget >= active {
            return Err(ThresholdError::Unordered { fidget, active });
        }
        Ok(Self { fidget, active })
    }

    /// Buckets a single magnitude. Both boundaries belong to the lower state.
    pub fn classify(&self, value: f64) -> ActivityState {
        if value > self.active {
            ActivityState::Active
        } else if value > self.fidget {
            ActivityState::Fidget
        } else {
            ActivityState::Sedentary
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub sedentary: usize,
    pub fidget: usize,
    pub active: usize,
}

impl StateCounts {
    pub fn tally(samples: &[Sample], thresholds: &Thresholds) -> Self {
        samples
            .iter()
            .fold(StateCounts::default(), |mut counts, sample| {
                match thresholds.classify(sample.acceleration_val) {
                    ActivityState::Sedentary => counts.sedentary += 1,
                    ActivityState::Fidget => counts.fidget += 1,
                    ActivityState::Active => counts.active += 1,
                }
                counts
            })
    }

    pub fn total(&self) -> usize {
        self.sedentary + self.fidget + self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(value: f64) -> Sample {
        Sample {
            recorded_at: Utc::now(),
            acceleration_val: value,
            state: None,
            timer_seconds: 0,
        }
    }

    #[test]
    fn boundaries_fall_into_lower_bucket() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.classify(0.020), ActivityState::Sedentary);
        assert_eq!(thresholds.classify(0.0200001), ActivityState::Fidget);
        assert_eq!(thresholds.classify(0.040), ActivityState::Fidget);
        assert_eq!(thresholds.classify(0.0400001), ActivityState::Active);
        assert_eq!(thresholds.classify(0.0), ActivityState::Sedentary);
    }

    #[test]
    fn non_numeric_magnitude_counts_as_sedentary() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.classify(f64::NAN), ActivityState::Sedentary);
    }

    #[test]
    fn counts_cover_every_sample() {
        let thresholds = Thresholds::default();
        let samples: Vec<Sample> = [0.005, 0.02, 0.03, 0.04, 0.09]
            .iter()
            .cycle()
            .take(500)
            .map(|value| sample(*value))
            .collect();
        let counts = StateCounts::tally(&samples, &thresholds);
        assert_eq!(counts.total(), samples.len());
        assert_eq!(counts.sedentary, 200);
        assert_eq!(counts.fidget, 200);
        assert_eq!(counts.active, 100);
    }

    #[test]
    fn rejects_unordered_or_non_finite_thresholds() {
        assert_eq!(
            Thresholds::new(0.05, 0.04),
            Err(ThresholdError::Unordered {
                fidget: 0.05,
                active: 0.04
            })
        );
        assert!(Thresholds::new(0.04, 0.04).is_err());
        assert!(matches!(
            Thresholds::new(f64::INFINITY, 0.04),
            Err(ThresholdError::NonFinite { .. })
        ));
        assert!(Thresholds::new(0.01, 0.03).is_ok());
    }
}
