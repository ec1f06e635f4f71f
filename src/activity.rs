use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::classify::StateCounts;
use crate::config::AnalyticsConfig;
use crate::models::{ActivityStats, DominantState, Sample};

/// Continuous sedentary time, in seconds, at which the device raises an alert.
pub const SEDENTARY_ALERT_SECONDS: i32 = 1200;

pub fn summarize(samples: &[Sample], config: &AnalyticsConfig) -> ActivityStats {
    if samples.is_empty() {
        return ActivityStats::default();
    }

    let counts = StateCounts::tally(samples, &config.thresholds);
    let per_minute = f64::from(config.samples_per_minute);

    let sedentary_minutes = round_to(counts.sedentary as f64 / per_minute, 2);
    let fidget_minutes = round_to(counts.fidget as f64 / per_minute, 2);
    let active_minutes = round_to(counts.active as f64 / per_minute, 2);

    let dominant_state = if active_minutes + fidget_minutes > sedentary_minutes {
        DominantState::Active
    } else {
        DominantState::Sedentary
    };

    let alert_count = samples
        .iter()
        .filter(|sample| sample.timer_seconds >= SEDENTARY_ALERT_SECONDS)
        .count();
    let longest_sedentary_period = samples
        .iter()
        .map(|sample| sample.timer_seconds)
        .max()
        .unwrap_or(0);

    let shares = Shares::of(sedentary_minutes, fidget_minutes, active_minutes);

    ActivityStats {
        sedentary_minutes,
        fidget_minutes,
        active_minutes,
        total_minutes: shares.total,
        sedentary_percentage: round_to(shares.sedentary_pct, 2),
        active_percentage: round_to(shares.active_pct, 2),
        dominant_state,
        activity_score: score_from_percentage(shares.active_pct),
        alert_count: i32::try_from(alert_count).unwrap_or(i32::MAX),
        longest_sedentary_period: longest_sedentary_period.max(0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shares {
    pub total: f64,
    pub sedentary_pct: f64,
    pub active_pct: f64,
}

impl Shares {
    pub fn of(sedentary: f64, fidget: f64, active: f64) -> Self {
        let total = sedentary + fidget + active;
        if total > 0.0 {
            Self {
                total,
                sedentary_pct: sedentary / total * 100.0,
                active_pct: (active + fidget) / total * 100.0,
            }
        } else {
            Self {
                total: 0.0,
                sedentary_pct: 0.0,
                active_pct: 0.0,
            }
        }
    }
}

pub fn score_from_percentage(percentage: f64) -> i32 {
    if percentage.is_nan() {
        return 0;
    }
    percentage.clamp(0.0, 100.0) as i32
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn window_start(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    now - Duration::hours(hours.max(1))
}

/// Midnight UTC at the end of `day`.
pub fn end_of_day(day: NaiveDate) -> DateTime<Utc> {
    (day + Duration::days(1))
        .and_time(NaiveTime::MIN)
        .and_utc()
}
