use std::fmt::Write;

use crate::config::AnalyticsConfig;
use crate::models::{ActivitySummary, DominantState, PeriodType};

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodOverview {
    pub periods: usize,
    pub avg_score: f64,
    pub avg_sedentary_minutes: f64,
    pub avg_active_minutes: f64,
    pub total_alerts: i64,
    pub active_periods: usize,
}

pub fn overview(summaries: &[ActivitySummary]) -> Option<PeriodOverview> {
    if summaries.is_empty() {
        return None;
    }

    let n = summaries.len() as f64;
    Some(PeriodOverview {
        periods: summaries.len(),
        avg_score: summaries
            .iter()
            .map(|s| f64::from(s.stats.activity_score))
            .sum::<f64>()
            / n,
        avg_sedentary_minutes: summaries.iter().map(|s| s.stats.sedentary_minutes).sum::<f64>()
            / n,
        avg_active_minutes: summaries
            .iter()
            .map(|s| s.stats.active_minutes + s.stats.fidget_minutes)
            .sum::<f64>()
            / n,
        total_alerts: summaries
            .iter()
            .map(|s| i64::from(s.stats.alert_count))
            .sum(),
        active_periods: summaries
            .iter()
            .filter(|s| s.stats.dominant_state == DominantState::Active)
            .count(),
    })
}

pub fn build_report(
    subject: Option<&str>,
    period: PeriodType,
    summaries: &[ActivitySummary],
    config: &AnalyticsConfig,
) -> String {
    let mut output = String::new();
    let subject_label = subject.unwrap_or("default user");

    let _ = writeln!(output, "# Sedentary Activity Report");
    let _ = writeln!(
        output,
        "Generated for {} ({} summaries, LOINC {} {})",
        subject_label, period, config.loinc.code, config.loinc.display
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");

    match overview(summaries) {
        None => {
            let _ = writeln!(output, "No summaries recorded for this period.");
        }
        Some(overview) => {
            let _ = writeln!(output, "- Periods analysed: {}", overview.periods);
            let _ = writeln!(output, "- Average activity score: {:.1}/100", overview.avg_score);
            let _ = writeln!(
                output,
                "- Average sedentary time: {:.1} min",
                overview.avg_sedentary_minutes
            );
            let _ = writeln!(
                output,
                "- Average active time: {:.1} min",
                overview.avg_active_minutes
            );
            let _ = writeln!(output, "- Sedentary alerts: {}", overview.total_alerts);
            let _ = writeln!(
                output,
                "- Periods dominated by activity: {} of {}",
                overview.active_periods, overview.periods
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Summaries");

    if summaries.is_empty() {
        let _ = writeln!(output, "Nothing to list.");
    } else {
        for summary in summaries {
            let stats = &summary.stats;
            let _ = writeln!(
                output,
                "- {}: score {}/100, {} ({:.1} min sedentary / {:.1}%, {:.1} min active / {:.1}%), {} alerts, longest still {} s",
                summary.date,
                stats.activity_score,
                stats.dominant_state,
                stats.sedentary_minutes,
                stats.sedentary_percentage,
                stats.active_minutes + stats.fidget_minutes,
                stats.active_percentage,
                stats.alert_count,
                stats.longest_sedentary_period
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Threshold Suggestions");
    let _ = writeln!(
        output,
        "Configured: fidget {:.4}, active {:.4}",
        config.thresholds.fidget, config.thresholds.active
    );

    let latest_suggestion = summaries
        .iter()
        .find_map(|s| s.suggested_thresholds.map(|t| (s.date, t)));
    match latest_suggestion {
        Some((date, suggested)) if suggested != config.thresholds => {
            let _ = writeln!(
                output,
                "Suggested on {}: fidget {:.4}, active {:.4}",
                date, suggested.fidget, suggested.active
            );
        }
        Some(_) => {
            let _ = writeln!(output, "Latest analysis kept the configured thresholds.");
        }
        None => {
            let _ = writeln!(output, "No clustering results for this period.");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Thresholds;
    use crate::models::ActivityStats;
    use chrono::NaiveDate;

    fn summary(day: u32, score: i32, state: DominantState) -> ActivitySummary {
        ActivitySummary {
            user_id: None,
            date: NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
            period_type: PeriodType::Daily,
            stats: ActivityStats {
                sedentary_minutes: 100.0,
                fidget_minutes: 10.0,
                active_minutes: 20.0,
                total_minutes: 130.0,
                sedentary_percentage: 76.92,
                active_percentage: 23.08,
                dominant_state: state,
                activity_score: score,
                alert_count: 2,
                longest_sedentary_period: 1500,
            },
            detected_patterns: None,
            suggested_thresholds: None,
        }
    }

    #[test]
    fn overview_averages_across_periods() {
        let rows = vec![
            summary(2, 20, DominantState::Sedentary),
            summary(1, 60, DominantState::Active),
        ];
        let overview = overview(&rows).unwrap();
        assert_eq!(overview.periods, 2);
        assert_eq!(overview.avg_score, 40.0);
        assert_eq!(overview.avg_active_minutes, 30.0);
        assert_eq!(overview.total_alerts, 4);
        assert_eq!(overview.active_periods, 1);
        assert!(super::overview(&[]).is_none());
    }

    #[test]
    fn report_lists_rows_and_latest_suggestion() {
        let config = AnalyticsConfig::default();
        let mut latest = summary(2, 20, DominantState::Sedentary);
        latest.suggested_thresholds = Some(Thresholds {
            fidget: 0.0175,
            active: 0.0512,
        });
        let rows = vec![latest, summary(1, 60, DominantState::Active)];

        let report = build_report(Some("user-1"), PeriodType::Daily, &rows, &config);
        assert!(report.starts_with("# Sedentary Activity Report"));
        assert!(report.contains("Generated for user-1 (daily summaries"));
        assert!(report.contains("- 2026-10-02: score 20/100, SEDENTARY"));
        assert!(report.contains("Suggested on 2026-10-02: fidget 0.0175, active 0.0512"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = build_report(None, PeriodType::Weekly, &[], &AnalyticsConfig::default());
        assert!(report.contains("default user (weekly summaries"));
        assert!(report.contains("No summaries recorded for this period."));
        assert!(report.contains("No clustering results for this period."));
    }
}
