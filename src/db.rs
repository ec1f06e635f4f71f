use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::activity::SEDENTARY_ALERT_SECONDS;
use crate::classify::Thresholds;
use crate::models::{
    ActivityState, ActivityStats, ActivitySummary, DominantState, PeriodType, Sample,
};
use crate::patterns::DetectedPatterns;
use crate::pipeline::AnalyticsStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const UPSERT_SUMMARY: &str = r#"
    INSERT INTO activity_summary (
        user_id, date, period_type,
        sedentary_minutes, fidget_minutes, active_minutes, total_minutes,
        sedentary_percentage, active_percentage,
        dominant_state, activity_score,
        alert_count, longest_sedentary_period,
        detected_patterns, suggested_fidget_threshold, suggested_active_threshold
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
    ON CONFLICT (user_id, date, period_type) DO UPDATE
    SET sedentary_minutes = EXCLUDED.sedentary_minutes,
        fidget_minutes = EXCLUDED.fidget_minutes,
        active_minutes = EXCLUDED.active_minutes,
        total_minutes = EXCLUDED.total_minutes,
        sedentary_percentage = EXCLUDED.sedentary_percentage,
        active_percentage = EXCLUDED.active_percentage,
        dominant_state = EXCLUDED.dominant_state,
        activity_score = EXCLUDED.activity_score,
        alert_count = EXCLUDED.alert_count,
        longest_sedentary_period = EXCLUDED.longest_sedentary_period,
        detected_patterns = EXCLUDED.detected_patterns,
        suggested_fidget_threshold = EXCLUDED.suggested_fidget_threshold,
        suggested_active_threshold = EXCLUDED.suggested_active_threshold,
        updated_at = NOW()
"#;

const SUMMARY_COLUMNS: &str = "user_id, date, period_type, \
     sedentary_minutes, fidget_minutes, active_minutes, total_minutes, \
     sedentary_percentage, active_percentage, dominant_state, activity_score, \
     alert_count, longest_sedentary_period, detected_patterns, \
     suggested_fidget_threshold, suggested_active_threshold";

impl AnalyticsStore for PgStore {
    async fn active_users(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT user_id
            FROM sensor_data
            WHERE "timestamp" > $1 AND "timestamp" <= $2 AND user_id IS NOT NULL
            ORDER BY user_id
            "#,
        )
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .context("failed to list active users")?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(row.try_get("user_id")?);
        }
        Ok(users)
    }

    async fn load_samples(
        &self,
        user_id: Option<Uuid>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Sample>> {
        let rows = match user_id {
            Some(user_id) => {
                sqlx::query(
                    r#"
                    SELECT "timestamp" AS recorded_at, acceleration_val, state,
                           COALESCE(timer_seconds, 0) AS timer_seconds
                    FROM sensor_data
                    WHERE user_id = $1 AND "timestamp" > $2 AND "timestamp" <= $3
                    ORDER BY "timestamp" ASC
                    "#,
                )
                .bind(user_id)
                .bind(since)
                .bind(until)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT created_at AS recorded_at, acceleration_val, state,
                           COALESCE(timer_seconds, 0) AS timer_seconds
                    FROM sedentary_log
                    WHERE created_at > $1 AND created_at <= $2
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(since)
                .bind(until)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("failed to load samples")?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            samples.push(Sample {
                recorded_at: row.try_get("recorded_at")?,
                acceleration_val: row.try_get("acceleration_val")?,
                state: row.try_get("state")?,
                timer_seconds: row.try_get("timer_seconds")?,
            });
        }
        Ok(samples)
    }

    async fn upsert_summary(&self, summary: &ActivitySummary) -> anyhow::Result<()> {
        let stats = &summary.stats;
        let mut tx = self.pool.begin().await?;

        // an uncommitted transaction rolls back when dropped
        sqlx::query(UPSERT_SUMMARY)
            .bind(summary.user_id)
            .bind(summary.date)
            .bind(summary.period_type.as_str())
            .bind(stats.sedentary_minutes)
            .bind(stats.fidget_minutes)
            .bind(stats.active_minutes)
            .bind(stats.total_minutes)
            .bind(stats.sedentary_percentage)
            .bind(stats.active_percentage)
            .bind(stats.dominant_state.as_str())
            .bind(stats.activity_score)
            .bind(stats.alert_count)
            .bind(stats.longest_sedentary_period)
            .bind(summary.detected_patterns.as_ref().map(Json))
            .bind(summary.suggested_thresholds.map(|t| t.fidget))
            .bind(summary.suggested_thresholds.map(|t| t.active))
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "failed to upsert {} summary for {}",
                    summary.period_type, summary.date
                )
            })?;

        tx.commit().await?;
        debug!(key = ?summary.key(), "summary upserted");
        Ok(())
    }

    async fn daily_summaries(
        &self,
        user_id: Option<Uuid>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<ActivitySummary>> {
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM activity_summary \
             WHERE period_type = 'daily' AND date BETWEEN $1 AND $2 \
             AND user_id IS NOT DISTINCT FROM $3 \
             ORDER BY date ASC"
        );
        let rows = sqlx::query(&query)
            .bind(from)
            .bind(to)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| summary_from_row(row).map_err(anyhow::Error::from))
            .collect()
    }
}

pub async fn fetch_summaries(
    pool: &PgPool,
    user_id: Option<Uuid>,
    period: PeriodType,
    limit: i64,
) -> Result<Vec<ActivitySummary>, sqlx::Error> {
    let query = format!(
        "SELECT {SUMMARY_COLUMNS} FROM activity_summary \
         WHERE period_type = $1 AND user_id IS NOT DISTINCT FROM $2 \
         ORDER BY date DESC \
         LIMIT $3"
    );
    let rows = sqlx::query(&query)
        .bind(period.as_str())
        .bind(user_id)
        .bind(limit.max(1))
        .fetch_all(pool)
        .await?;

    rows.iter().map(summary_from_row).collect()
}

pub async fn latest_summary(
    pool: &PgPool,
    user_id: Option<Uuid>,
    period: PeriodType,
) -> Result<Option<ActivitySummary>, sqlx::Error> {
    Ok(fetch_summaries(pool, user_id, period, 1)
        .await?
        .into_iter()
        .next())
}

/// Newest stored row of one period for every user.
pub async fn latest_per_user(
    pool: &PgPool,
    period: PeriodType,
    limit: i64,
) -> Result<Vec<ActivitySummary>, sqlx::Error> {
    let query = format!(
        "SELECT DISTINCT ON (user_id) {SUMMARY_COLUMNS} FROM activity_summary \
         WHERE period_type = $1 \
         ORDER BY user_id, date DESC \
         LIMIT $2"
    );
    let rows = sqlx::query(&query)
        .bind(period.as_str())
        .bind(limit.max(1))
        .fetch_all(pool)
        .await?;

    rows.iter().map(summary_from_row).collect()
}

fn summary_from_row(row: &PgRow) -> Result<ActivitySummary, sqlx::Error> {
    let period_label: String = row.try_get("period_type")?;
    let period_type =
        PeriodType::from_label(&period_label).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "period_type".to_string(),
            source: format!("unknown period type {period_label:?}").into(),
        })?;
    let dominant_label: String = row.try_get("dominant_state")?;
    let patterns: Option<Json<DetectedPatterns>> = row.try_get("detected_patterns")?;
    let suggested_fidget: Option<f64> = row.try_get("suggested_fidget_threshold")?;
    let suggested_active: Option<f64> = row.try_get("suggested_active_threshold")?;

    Ok(ActivitySummary {
        user_id: row.try_get("user_id")?,
        date: row.try_get("date")?,
        period_type,
        stats: ActivityStats {
            sedentary_minutes: row.try_get("sedentary_minutes")?,
            fidget_minutes: row.try_get("fidget_minutes")?,
            active_minutes: row.try_get("active_minutes")?,
            total_minutes: row.try_get("total_minutes")?,
            sedentary_percentage: row.try_get("sedentary_percentage")?,
            active_percentage: row.try_get("active_percentage")?,
            dominant_state: DominantState::from_label(&dominant_label),
            activity_score: row.try_get("activity_score")?,
            alert_count: row.try_get("alert_count")?,
            longest_sedentary_period: row.try_get("longest_sedentary_period")?,
        },
        detected_patterns: patterns.map(|json| json.0),
        suggested_thresholds: match (suggested_fidget, suggested_active) {
            (Some(fidget), Some(active)) => Some(Thresholds { fidget, active }),
            _ => None,
        },
    })
}

/// Writes samples in one round trip; a user id routes them to `sensor_data`,
/// otherwise to the single-user `sedentary_log`.
pub async fn insert_samples(
    pool: &PgPool,
    user_id: Option<Uuid>,
    samples: &[Sample],
) -> anyhow::Result<u64> {
    let timestamps: Vec<DateTime<Utc>> = samples.iter().map(|s| s.recorded_at).collect();
    let values: Vec<f64> = samples.iter().map(|s| s.acceleration_val).collect();
    let states: Vec<Option<String>> = samples.iter().map(|s| s.state.clone()).collect();
    let timers: Vec<i32> = samples.iter().map(|s| s.timer_seconds).collect();

    let result = match user_id {
        Some(user_id) => {
            let alerts: Vec<bool> = timers
                .iter()
                .map(|timer| *timer >= SEDENTARY_ALERT_SECONDS)
                .collect();
            sqlx::query(
                r#"
                INSERT INTO sensor_data
                (user_id, "timestamp", acceleration_val, state, timer_seconds, alert_triggered)
                SELECT $1, * FROM UNNEST($2::timestamptz[], $3::float8[], $4::text[], $5::int4[], $6::bool[])
                "#,
            )
            .bind(user_id)
            .bind(&timestamps)
            .bind(&values)
            .bind(&states)
            .bind(&timers)
            .bind(&alerts)
            .execute(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO sedentary_log (created_at, acceleration_val, state, timer_seconds)
                SELECT * FROM UNNEST($1::timestamptz[], $2::float8[], $3::text[], $4::int4[])
                "#,
            )
            .bind(&timestamps)
            .bind(&values)
            .bind(&states)
            .bind(&timers)
            .execute(pool)
            .await?
        }
    };

    Ok(result.rows_affected())
}

pub async fn seed(
    pool: &PgPool,
    user_id: Option<Uuid>,
    thresholds: &Thresholds,
    samples_per_minute: u32,
) -> anyhow::Result<u64> {
    let end = Utc::now();
    let samples = synthetic_samples(end, 30, samples_per_minute, thresholds, 42);
    insert_samples(pool, user_id, &samples).await
}

/// Deterministic stretch of readings ending at `end`: alternating blocks of
/// stillness, fidgeting and movement, with a sedentary timer that counts up
/// while still and resets otherwise.
pub fn synthetic_samples(
    end: DateTime<Utc>,
    minutes: u32,
    samples_per_minute: u32,
    thresholds: &Thresholds,
    seed: u64,
) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let per_minute = samples_per_minute.max(1);
    let total = sample_count(minutes, per_minute);
    let step_ms = 60_000 / i64::from(per_minute);
    let start = end - Duration::minutes(i64::from(minutes));

    let mut samples = Vec::with_capacity(total);
    let mut still_since: Option<usize> = None;

    for idx in 0..total {
        let minute = idx / per_minute as usize;
        // 0-5 still, 6-7 fidget, 8-9 moving, repeating every ten minutes
        let (low, high, label) = match minute % 10 {
            0..=5 => (0.0, thresholds.fidget, ActivityState::Sedentary),
            6..=7 => (thresholds.fidget, thresholds.active, ActivityState::Fidget),
            _ => (thresholds.active, thresholds.active * 3.0, ActivityState::Active),
        };
        let value = low + (high - low) * rng.gen_range(0.05..0.95);

        let timer_seconds = if label == ActivityState::Sedentary {
            let since = *still_since.get_or_insert(idx);
            ((idx - since) / per_minute as usize * 60) as i32
        } else {
            still_since = None;
            0
        };

        samples.push(Sample {
            recorded_at: start + Duration::milliseconds(step_ms * idx as i64),
            acceleration_val: value,
            state: Some(label.as_str().to_string()),
            timer_seconds,
        });
    }

    samples
}

fn sample_count(minutes: u32, samples_per_minute: u32) -> usize {
    minutes as usize * samples_per_minute as usize
}

pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    user_id: Option<Uuid>,
) -> anyhow::Result<u64> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        timestamp: DateTime<Utc>,
        acceleration_val: f64,
        state: Option<String>,
        timer_seconds: Option<i32>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut samples = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid row {}", line + 2))?;
        samples.push(Sample {
            recorded_at: row.timestamp,
            acceleration_val: row.acceleration_val,
            state: row.state.filter(|s| !s.is_empty()),
            timer_seconds: row.timer_seconds.unwrap_or(0),
        });
    }

    if samples.is_empty() {
        return Ok(0);
    }
    insert_samples(pool, user_id, &samples).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::summarize;
    use crate::config::AnalyticsConfig;
    use crate::models::DominantState;

    #[test]
    fn synthetic_day_is_deterministic_and_spans_every_state() {
        let end = Utc::now();
        let thresholds = Thresholds::default();
        let first = synthetic_samples(end, 30, 60, &thresholds, 7);
        let second = synthetic_samples(end, 30, 60, &thresholds, 7);
        assert_eq!(first, second);
        assert_eq!(first.len(), 1800);
        assert!(first.windows(2).all(|w| w[0].recorded_at < w[1].recorded_at));

        let mut config = AnalyticsConfig::default();
        config.samples_per_minute = 60;
        let stats = summarize(&first, &config);
        assert_eq!(stats.sedentary_minutes, 18.0);
        assert_eq!(stats.fidget_minutes, 6.0);
        assert_eq!(stats.active_minutes, 6.0);
        assert_eq!(stats.dominant_state, DominantState::Sedentary);
        assert_eq!(stats.activity_score, 40);
    }

    #[test]
    fn synthetic_timer_counts_up_while_still() {
        let samples = synthetic_samples(Utc::now(), 12, 10, &Thresholds::default(), 1);
        assert_eq!(samples[0].timer_seconds, 0);
        assert_eq!(samples[59].timer_seconds, 300);
        // minute 6 starts fidgeting
        assert_eq!(samples[60].timer_seconds, 0);
        assert_eq!(samples[100].timer_seconds, 0);
        assert_eq!(samples[110].timer_seconds, 60);
    }

    #[test]
    fn sample_count_widens_before_multiplying() {
        assert_eq!(sample_count(30, 600), 18_000);
        assert_eq!(
            sample_count(1_440, 4_000_000) as u64,
            1_440u64 * 4_000_000
        );
    }
}
