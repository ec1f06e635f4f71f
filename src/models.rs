use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::Thresholds;
use crate::patterns::{DetectedPatterns, PatternReport};

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub recorded_at: DateTime<Utc>,
    pub acceleration_val: f64,
    pub state: Option<String>,
    pub timer_seconds: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityState {
    Sedentary,
    Fidget,
    Active,
}

impl ActivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::Sedentary => "SEDENTARY",
            ActivityState::Fidget => "FIDGET",
            ActivityState::Active => "ACTIVE",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DominantState {
    Active,
    Sedentary,
    #[default]
    Unknown,
}

impl DominantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DominantState::Active => "ACTIVE",
            DominantState::Sedentary => "SEDENTARY",
            DominantState::Unknown => "UNKNOWN",
        }
    }

    /// Parses the stored label; anything unrecognised reads back as `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "ACTIVE" => DominantState::Active,
            "SEDENTARY" => DominantState::Sedentary,
            _ => DominantState::Unknown,
        }
    }
}

impl fmt::Display for DominantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Daily => "daily",
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "daily" => Some(PeriodType::Daily),
            "weekly" => Some(PeriodType::Weekly),
            "monthly" => Some(PeriodType::Monthly),
            _ => None,
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived activity figures for one period. Minutes and percentages are
/// rounded to two decimals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityStats {
    pub sedentary_minutes: f64,
    pub fidget_minutes: f64,
    pub active_minutes: f64,
    pub total_minutes: f64,
    pub sedentary_percentage: f64,
    pub active_percentage: f64,
    pub dominant_state: DominantState,
    pub activity_score: i32,
    pub alert_count: i32,
    pub longest_sedentary_period: i32,
}

/// A row of `activity_summary`, unique per `(user_id, date, period_type)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub user_id: Option<Uuid>,
    pub date: NaiveDate,
    pub period_type: PeriodType,
    #[serde(flatten)]
    pub stats: ActivityStats,
    pub detected_patterns: Option<DetectedPatterns>,
    pub suggested_thresholds: Option<Thresholds>,
}

impl ActivitySummary {
    pub fn daily(
        user_id: Option<Uuid>,
        date: NaiveDate,
        stats: ActivityStats,
        report: PatternReport,
    ) -> Self {
        Self {
            user_id,
            date,
            period_type: PeriodType::Daily,
            stats,
            detected_patterns: report.patterns,
            suggested_thresholds: Some(report.suggested),
        }
    }

    pub fn rollup(
        user_id: Option<Uuid>,
        date: NaiveDate,
        period_type: PeriodType,
        stats: ActivityStats,
    ) -> Self {
        Self {
            user_id,
            date,
            period_type,
            stats,
            detected_patterns: None,
            suggested_thresholds: None,
        }
    }

    pub fn empty(user_id: Option<Uuid>, date: NaiveDate, period_type: PeriodType) -> Self {
        Self::rollup(user_id, date, period_type, ActivityStats::default())
    }

    pub fn key(&self) -> (Option<Uuid>, NaiveDate, PeriodType) {
        (self.user_id, self.date, self.period_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_labels_round_trip() {
        for state in [DominantState::Active, DominantState::Sedentary, DominantState::Unknown] {
            assert_eq!(DominantState::from_label(state.as_str()), state);
        }
        assert_eq!(DominantState::from_label("FIDGET"), DominantState::Unknown);
        assert_eq!(PeriodType::from_label("weekly"), Some(PeriodType::Weekly));
        assert_eq!(PeriodType::from_label("yearly"), None);
    }

    #[test]
    fn sample_state_labels_match_ingested_text() {
        assert_eq!(ActivityState::Sedentary.as_str(), "SEDENTARY");
        assert_eq!(ActivityState::Fidget.as_str(), "FIDGET");
        assert_eq!(ActivityState::Active.as_str(), "ACTIVE");
    }

    #[test]
    fn empty_summary_is_unknown_and_zeroed() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let summary = ActivitySummary::empty(None, date, PeriodType::Daily);
        assert_eq!(summary.stats.dominant_state, DominantState::Unknown);
        assert_eq!(summary.stats.activity_score, 0);
        assert_eq!(summary.stats.total_minutes, 0.0);
        assert!(summary.detected_patterns.is_none());
    }

    #[test]
    fn summary_serializes_flat() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let summary = ActivitySummary::empty(None, date, PeriodType::Weekly);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["period_type"], "weekly");
        assert_eq!(json["dominant_state"], "UNKNOWN");
        assert_eq!(json["date"], "2026-03-02");
        assert!(json["user_id"].is_null());
    }
}
