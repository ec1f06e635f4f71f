use std::collections::HashMap;

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};

use crate::activity::{round_to, score_from_percentage, Shares};
use crate::models::{ActivityStats, ActivitySummary, DominantState, PeriodType};

pub fn period_window(period: PeriodType, start: NaiveDate) -> (NaiveDate, NaiveDate) {
    match period {
        PeriodType::Daily => (start, start),
        PeriodType::Weekly => (start, start + Duration::days(6)),
        PeriodType::Monthly => month_window(start),
    }
}

pub fn month_window(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = day - Duration::days(i64::from(day.day0()));
    let last = first + Months::new(1) - Duration::days(1);
    (first, last)
}

/// Weekly rollups run on Sundays and cover the seven days ending that day.
pub fn weekly_start(today: NaiveDate) -> Option<NaiveDate> {
    (today.weekday() == Weekday::Sun).then(|| today - Duration::days(6))
}

/// Monthly rollups run on the last day of a month.
pub fn monthly_start(today: NaiveDate) -> Option<NaiveDate> {
    let tomorrow = today + Duration::days(1);
    (tomorrow.day() == 1).then(|| month_window(today).0)
}

/// Combines stored daily rows into one period figure; `None` when there is
/// nothing to combine.
pub fn combine_daily(daily: &[ActivitySummary]) -> Option<ActivityStats> {
    if daily.is_empty() {
        return None;
    }

    let n = daily.len() as f64;
    let mean = |field: fn(&ActivityStats) -> f64| {
        daily.iter().map(|row| field(&row.stats)).sum::<f64>() / n
    };

    let sedentary = mean(|s| s.sedentary_minutes);
    let fidget = mean(|s| s.fidget_minutes);
    let active = mean(|s| s.active_minutes);
    let score = mean(|s| f64::from(s.activity_score));

    let alert_count = daily
        .iter()
        .map(|row| i64::from(row.stats.alert_count))
        .sum::<i64>();
    let longest = daily
        .iter()
        .map(|row| row.stats.longest_sedentary_period)
        .max()
        .unwrap_or(0);

    let sedentary_minutes = round_to(sedentary, 2);
    let fidget_minutes = round_to(fidget, 2);
    let active_minutes = round_to(active, 2);
    let shares = Shares::of(sedentary, fidget, active);

    Some(ActivityStats {
        sedentary_minutes,
        fidget_minutes,
        active_minutes,
        total_minutes: round_to(shares.total, 2),
        sedentary_percentage: round_to(shares.sedentary_pct, 2),
        active_percentage: round_to(shares.active_pct, 2),
        dominant_state: most_frequent_state(daily),
        activity_score: score_from_percentage(score),
        alert_count: i32::try_from(alert_count).unwrap_or(i32::MAX),
        longest_sedentary_period: longest,
    })
}

/// Modal dominant state; ties resolve to the alphabetically first label.
fn most_frequent_state(daily: &[ActivitySummary]) -> DominantState {
    let mut tally: HashMap<DominantState, usize> = HashMap::new();
    for row in daily {
        *tally.entry(row.stats.dominant_state).or_insert(0) += 1;
    }

    let mut ranked: Vec<(DominantState, usize)> = tally.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .first()
        .map(|(state, _)| *state)
        .unwrap_or(DominantState::Unknown)
}
