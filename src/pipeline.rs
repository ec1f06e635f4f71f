use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::activity::{self, summarize};
use crate::config::AnalyticsConfig;
use crate::models::{ActivitySummary, PeriodType, Sample};
use crate::patterns::detect_patterns;
use crate::rollup::{combine_daily, monthly_start, period_window, weekly_start};

/// Storage used by the pipeline. `None` as a user id means the single-user
/// stream with no owner.
pub trait AnalyticsStore {
    fn active_users(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> impl Future<Output = anyhow::Result<Vec<Uuid>>> + Send;

    fn load_samples(
        &self,
        user_id: Option<Uuid>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> impl Future<Output = anyhow::Result<Vec<Sample>>> + Send;

    fn upsert_summary(
        &self,
        summary: &ActivitySummary,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn daily_summaries(
        &self,
        user_id: Option<Uuid>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> impl Future<Output = anyhow::Result<Vec<ActivitySummary>>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    /// A specific user, or every user with recent data when `None`.
    pub user_id: Option<Uuid>,
    /// Samples in `(since, until]` are analysed.
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub today: NaiveDate,
}

impl AnalysisRequest {
    pub fn trailing(user_id: Option<Uuid>, hours: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            since: activity::window_start(now, hours),
            until: now,
            today: now.date_naive(),
        }
    }

    /// Window ending at midnight after `day`, stored under `day`.
    pub fn for_day(user_id: Option<Uuid>, hours: i64, day: NaiveDate) -> Self {
        let until = activity::end_of_day(day);
        Self {
            today: day,
            ..Self::trailing(user_id, hours, until)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub users_seen: usize,
    pub skipped: usize,
    pub failures: usize,
    pub written: Vec<ActivitySummary>,
}

pub async fn run_analysis<S>(
    store: &S,
    config: &AnalyticsConfig,
    request: &AnalysisRequest,
) -> RunReport
where
    S: AnalyticsStore + Sync,
{
    info!(
        today = %request.today,
        since = %request.since,
        loinc_code = %config.loinc.code,
        loinc_display = %config.loinc.display,
        "starting sedentary behaviour analysis"
    );

    let mut report = RunReport::default();
    let users = match request.user_id {
        Some(user_id) => vec![Some(user_id)],
        None => match store.active_users(request.since, request.until).await {
            Ok(users) if users.is_empty() => {
                info!("no users with recent data, falling back to the default stream");
                vec![None]
            }
            Ok(users) => users.into_iter().map(Some).collect(),
            Err(err) => {
                error!(error = %err, "failed to list active users");
                report.failures += 1;
                vec![None]
            }
        },
    };

    for user_id in users {
        report.users_seen += 1;
        let span = info_span!("user", user = %user_label(user_id));
        analyze_user(store, config, request, user_id, &mut report)
            .instrument(span)
            .await;
    }

    info!(
        users = report.users_seen,
        written = report.written.len(),
        skipped = report.skipped,
        failures = report.failures,
        "analysis finished"
    );
    report
}

async fn analyze_user<S>(
    store: &S,
    config: &AnalyticsConfig,
    request: &AnalysisRequest,
    user_id: Option<Uuid>,
    report: &mut RunReport,
) where
    S: AnalyticsStore + Sync,
{
    let samples = match store
        .load_samples(user_id, request.since, request.until)
        .await
    {
        Ok(samples) => samples,
        Err(err) => {
            error!(error = %err, "failed to load samples");
            report.failures += 1;
            return;
        }
    };

    if samples.is_empty() {
        info!("skipping, no data in window");
        report.skipped += 1;
        return;
    }
    info!(samples = samples.len(), "loaded samples");

    let stats = summarize(&samples, config);
    let patterns = detect_patterns(&samples, config);
    let summary = ActivitySummary::daily(user_id, request.today, stats, patterns);

    match store.upsert_summary(&summary).await {
        Ok(()) => {
            info!(
                score = summary.stats.activity_score,
                sedentary_minutes = summary.stats.sedentary_minutes,
                sedentary_pct = summary.stats.sedentary_percentage,
                active_minutes = summary.stats.active_minutes,
                active_pct = summary.stats.active_percentage,
                "daily summary saved"
            );
            report.written.push(summary);
        }
        Err(err) => {
            error!(error = %err, "failed to save daily summary");
            report.failures += 1;
        }
    }

    let due = [
        (PeriodType::Weekly, weekly_start(request.today)),
        (PeriodType::Monthly, monthly_start(request.today)),
    ];
    for (period, start) in due {
        let Some(start) = start else { continue };
        match roll_up(store, user_id, period, start).await {
            Ok(Some(rollup)) => report.written.push(rollup),
            Ok(None) => warn!(%period, %start, "no daily rows to roll up"),
            Err(err) => {
                error!(error = %err, %period, %start, "rollup failed");
                report.failures += 1;
            }
        }
    }
}

pub async fn roll_up<S>(
    store: &S,
    user_id: Option<Uuid>,
    period: PeriodType,
    start: NaiveDate,
) -> anyhow::Result<Option<ActivitySummary>>
where
    S: AnalyticsStore + Sync,
{
    if period == PeriodType::Daily {
        anyhow::bail!("daily summaries come from raw samples, not rollups");
    }

    let (from, to) = period_window(period, start);
    let daily = store.daily_summaries(user_id, from, to).await?;
    let Some(stats) = combine_daily(&daily) else {
        return Ok(None);
    };

    let summary = ActivitySummary::rollup(user_id, from, period, stats);
    store.upsert_summary(&summary).await?;
    info!(%period, %from, %to, days = daily.len(), "rollup saved");
    Ok(Some(summary))
}

pub fn user_label(user_id: Option<Uuid>) -> String {
    user_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "default".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DominantState;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// In-memory stand-in for the Postgres store.
    #[derive(Default)]
    struct MemoryStore {
        pub samples: Mutex<HashMap<Option<Uuid>, Vec<Sample>>>,
        pub summaries: Mutex<Vec<ActivitySummary>>,
        pub fail_loads_for: Option<Uuid>,
    }

    impl MemoryStore {
        pub async fn put_samples(&self, user_id: Option<Uuid>, samples: Vec<Sample>) {
            self.samples.lock().await.insert(user_id, samples);
        }
    }

    impl AnalyticsStore for MemoryStore {
        async fn active_users(
            &self,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> anyhow::Result<Vec<Uuid>> {
            let samples = self.samples.lock().await;
            let mut users: Vec<Uuid> = samples
                .iter()
                .filter(|(_, rows)| {
                    rows.iter()
                        .any(|s| s.recorded_at > since && s.recorded_at <= until)
                })
                .filter_map(|(user, _)| *user)
                .collect();
            users.sort();
            Ok(users)
        }

        async fn load_samples(
            &self,
            user_id: Option<Uuid>,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> anyhow::Result<Vec<Sample>> {
            if user_id.is_some() && user_id == self.fail_loads_for {
                anyhow::bail!("connection reset");
            }
            let samples = self.samples.lock().await;
            Ok(samples
                .get(&user_id)
                .map(|rows| {
                    rows.iter()
                        .filter(|s| s.recorded_at > since && s.recorded_at <= until)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn upsert_summary(&self, summary: &ActivitySummary) -> anyhow::Result<()> {
            let mut rows = self.summaries.lock().await;
            rows.retain(|row| row.key() != summary.key());
            rows.push(summary.clone());
            Ok(())
        }

        async fn daily_summaries(
            &self,
            user_id: Option<Uuid>,
            from: NaiveDate,
            to: NaiveDate,
        ) -> anyhow::Result<Vec<ActivitySummary>> {
            let rows = self.summaries.lock().await;
            Ok(rows
                .iter()
                .filter(|row| {
                    row.period_type == PeriodType::Daily
                        && row.user_id == user_id
                        && row.date >= from
                        && row.date <= to
                })
                .cloned()
                .collect())
        }
    }

    fn samples_at(now: DateTime<Utc>, value: f64, count: usize) -> Vec<Sample> {
        (0..count)
            .map(|i| Sample {
                recorded_at: now - Duration::seconds(i as i64 + 1),
                acceleration_val: value,
                state: None,
                timer_seconds: 0,
            })
            .collect()
    }

    fn noon(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn rerunning_a_day_overwrites_the_same_row() {
        let store = MemoryStore::default();
        let config = AnalyticsConfig::default();
        let now = noon(2026, 10, 14);
        let request = AnalysisRequest::trailing(None, 24, now);

        store.put_samples(None, samples_at(now, 0.01, 600)).await;
        run_analysis(&store, &config, &request).await;

        store.put_samples(None, samples_at(now, 0.09, 1200)).await;
        let report = run_analysis(&store, &config, &request).await;

        let rows = store.summaries.lock().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stats.active_minutes, 2.0);
        assert_eq!(rows[0].stats.dominant_state, DominantState::Active);
        assert_eq!(report.written.len(), 1);
    }

    #[tokio::test]
    async fn empty_window_is_skipped_without_failure() {
        let store = MemoryStore::default();
        let request = AnalysisRequest::trailing(None, 24, noon(2026, 10, 14));
        let report = run_analysis(&store, &AnalyticsConfig::default(), &request).await;

        assert_eq!(report.users_seen, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures, 0);
        assert!(store.summaries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn a_failing_user_does_not_stop_the_others() {
        let broken = Uuid::new_v4();
        let healthy = Uuid::new_v4();
        let now = noon(2026, 10, 14);
        let store = MemoryStore {
            fail_loads_for: Some(broken),
            ..MemoryStore::default()
        };
        store.put_samples(Some(broken), samples_at(now, 0.01, 10)).await;
        store.put_samples(Some(healthy), samples_at(now, 0.01, 10)).await;

        let request = AnalysisRequest::trailing(None, 24, now);
        let report = run_analysis(&store, &AnalyticsConfig::default(), &request).await;

        assert_eq!(report.users_seen, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(report.written.len(), 1);
        assert_eq!(report.written[0].user_id, Some(healthy));
    }

    #[tokio::test]
    async fn sunday_run_writes_a_weekly_rollup() {
        let store = MemoryStore::default();
        let config = AnalyticsConfig::default();
        let user = Some(Uuid::new_v4());

        for (day, value) in [(16, 0.01), (17, 0.09), (18, 0.09)] {
            let now = noon(2026, 10, day);
            store.put_samples(user, samples_at(now, value, 600)).await;
            let request = AnalysisRequest::trailing(user, 24, now);
            run_analysis(&store, &config, &request).await;
        }

        let rows = store.summaries.lock().await;
        let weekly: Vec<&ActivitySummary> = rows
            .iter()
            .filter(|row| row.period_type == PeriodType::Weekly)
            .collect();
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].date, NaiveDate::from_ymd_opt(2026, 10, 12).unwrap());
        assert_eq!(weekly[0].stats.dominant_state, DominantState::Active);
        assert_eq!(weekly[0].stats.alert_count, 0);
        assert!(weekly[0].detected_patterns.is_none());
        assert!(rows.iter().all(|row| row.period_type != PeriodType::Monthly));
    }

    #[tokio::test]
    async fn month_end_run_writes_a_monthly_rollup() {
        let store = MemoryStore::default();
        let now = noon(2026, 10, 31);
        store.put_samples(None, samples_at(now, 0.01, 600)).await;

        let request = AnalysisRequest::trailing(None, 24, now);
        let report = run_analysis(&store, &AnalyticsConfig::default(), &request).await;

        let monthly: Vec<&ActivitySummary> = report
            .written
            .iter()
            .filter(|row| row.period_type == PeriodType::Monthly)
            .collect();
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].date, NaiveDate::from_ymd_opt(2026, 10, 1).unwrap());
        assert_eq!(monthly[0].stats.sedentary_minutes, 1.0);
    }

    #[tokio::test]
    async fn daily_rollup_requests_are_rejected() {
        let store = MemoryStore::default();
        let date = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        assert!(roll_up(&store, None, PeriodType::Daily, date).await.is_err());
        assert_eq!(
            roll_up(&store, None, PeriodType::Weekly, date).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn backfilled_day_reads_only_that_day() {
        let store = MemoryStore::default();
        let config = AnalyticsConfig::default();
        let day = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();

        let mut samples = samples_at(noon(2026, 10, 1), 0.09, 600);
        samples.extend(samples_at(noon(2026, 10, 17), 0.01, 1200));
        store.put_samples(None, samples).await;

        let request = AnalysisRequest::for_day(None, 24, day);
        assert_eq!(request.until, Utc.with_ymd_and_hms(2026, 10, 2, 0, 0, 0).unwrap());
        assert_eq!(request.since, Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap());

        let report = run_analysis(&store, &config, &request).await;
        assert_eq!(report.written.len(), 1);
        assert_eq!(report.written[0].date, day);
        assert_eq!(report.written[0].stats.active_minutes, 1.0);
        assert_eq!(report.written[0].stats.sedentary_minutes, 0.0);
    }

    #[tokio::test]
    async fn backfilled_sunday_rolls_up_its_own_week() {
        let store = MemoryStore::default();
        let config = AnalyticsConfig::default();
        let user = Some(Uuid::new_v4());
        let sunday = NaiveDate::from_ymd_opt(2026, 10, 4).unwrap();

        store.put_samples(user, samples_at(noon(2026, 10, 4), 0.01, 600)).await;
        let request = AnalysisRequest::for_day(user, 24, sunday);
        let report = run_analysis(&store, &config, &request).await;

        let weekly: Vec<&ActivitySummary> = report
            .written
            .iter()
            .filter(|row| row.period_type == PeriodType::Weekly)
            .collect();
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].date, NaiveDate::from_ymd_opt(2026, 9, 28).unwrap());
        assert_eq!(weekly[0].stats.sedentary_minutes, 1.0);
    }
}
