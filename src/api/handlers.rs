use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::error::ApiResult;
use super::realtime::RealtimeEvent;
use super::AppState;
use crate::classify::Thresholds;
use crate::db::{self, PgStore};
use crate::models::{ActivitySummary, PeriodType};
use crate::patterns::DetectedPatterns;
use crate::pipeline::{self, user_label, AnalysisRequest};

const TRIGGER_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub loinc_code: String,
    pub loinc_display: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        loinc_code: state.config.loinc.code.clone(),
        loinc_display: state.config.loinc.display.clone(),
    })
}

pub async fn period_summary(
    State(state): State<AppState>,
    Path(period): Path<PeriodType>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<ActivitySummary>> {
    let summary = db::latest_summary(&state.pool, query.user_id, period)
        .await?
        .unwrap_or_else(|| ActivitySummary::empty(query.user_id, Utc::now().date_naive(), period));
    Ok(Json(summary))
}

#[derive(Debug, PartialEq, Serialize)]
pub struct SuggestedThresholds {
    pub fidget: Option<f64>,
    pub active: Option<f64>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct PatternsResponse {
    pub date: Option<NaiveDate>,
    pub patterns: Option<DetectedPatterns>,
    pub suggested_thresholds: SuggestedThresholds,
    pub current_thresholds: Thresholds,
}

impl PatternsResponse {
    pub fn from_latest(latest: Option<ActivitySummary>, current: Thresholds) -> Self {
        match latest {
            Some(summary) => Self {
                date: Some(summary.date),
                suggested_thresholds: SuggestedThresholds {
                    fidget: summary.suggested_thresholds.map(|t| t.fidget),
                    active: summary.suggested_thresholds.map(|t| t.active),
                },
                patterns: summary.detected_patterns,
                current_thresholds: current,
            },
            None => Self {
                date: None,
                patterns: None,
                suggested_thresholds: SuggestedThresholds {
                    fidget: None,
                    active: None,
                },
                current_thresholds: current,
            },
        }
    }
}

pub async fn patterns(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<PatternsResponse>> {
    let latest = db::latest_summary(&state.pool, query.user_id, PeriodType::Daily).await?;
    Ok(Json(PatternsResponse::from_latest(
        latest,
        state.config.thresholds,
    )))
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub message: &'static str,
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub async fn trigger(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> (StatusCode, Json<TriggerResponse>) {
    let now = Utc::now();
    let request = AnalysisRequest::trailing(query.user_id, TRIGGER_WINDOW_HOURS, now);
    info!(user = %user_label(query.user_id), "analysis triggered");

    tokio::spawn(async move {
        let store = PgStore::new(state.pool.clone());
        let report = pipeline::run_analysis(&store, &state.config, &request).await;

        let event = RealtimeEvent::new(
            "analytics_update",
            json!({
                "user_id": request.user_id,
                "users": report.users_seen,
                "written": report.written.len(),
                "skipped": report.skipped,
                "failures": report.failures,
                "summaries": report.written,
            }),
        );
        let reached = state.registry.broadcast(event).await;
        info!(clients = reached, "analysis update broadcast");
    });

    (
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            message: "Analysis triggered",
            status: "queued",
            timestamp: now,
        }),
    )
}
