use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::config::LoincConfig;
use crate::db;
use crate::models::{ActivitySummary, DominantState, PeriodType};

const CUSTOM_SYSTEM: &str = "http://loinc.org";

#[derive(Debug, Deserialize)]
pub struct FhirQuery {
    #[serde(default = "default_period")]
    pub period: PeriodType,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_period() -> PeriodType {
    PeriodType::Daily
}

fn default_limit() -> i64 {
    30
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub resource_type: &'static str,
    pub id: String,
    pub status: &'static str,
    pub code: CodeableConcept,
    pub subject: Reference,
    pub effective_date_time: String,
    pub value_quantity: Option<ValueQuantity>,
    pub component: Vec<ObservationComponent>,
}

#[derive(Debug, Serialize)]
pub struct CodeableConcept {
    pub coding: Vec<Coding>,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct Coding {
    pub system: String,
    pub code: String,
    pub display: String,
}

#[derive(Debug, Serialize)]
pub struct Reference {
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct ValueQuantity {
    pub value: f64,
    pub unit: String,
    pub system: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationComponent {
    pub code: CodeableConcept,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<ValueQuantity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_integer: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Bundle {
    #[serde(rename = "resourceType")]
    pub resource_type: &'static str,
    #[serde(rename = "type")]
    pub bundle_type: &'static str,
    pub total: usize,
    pub entry: Vec<BundleEntry>,
}

#[derive(Debug, Serialize)]
pub struct BundleEntry {
    pub resource: Observation,
}

fn concept(code: &str, display: &str, text: &str) -> CodeableConcept {
    CodeableConcept {
        coding: vec![Coding {
            system: CUSTOM_SYSTEM.to_string(),
            code: code.to_string(),
            display: display.to_string(),
        }],
        text: text.to_string(),
    }
}

pub fn sedentary_hours_per_day(summary: &ActivitySummary) -> f64 {
    if summary.stats.total_minutes > 0.0 {
        summary.stats.sedentary_minutes / summary.stats.total_minutes * 24.0
    } else {
        0.0
    }
}

pub fn observation(summary: &ActivitySummary, subject: Uuid, loinc: &LoincConfig) -> Observation {
    let stats = &summary.stats;
    let per_day = "h/(24.h)".to_string();

    Observation {
        resource_type: "Observation",
        id: format!(
            "activity-summary-{}-{}-{}",
            subject, summary.period_type, summary.date
        ),
        status: "final",
        code: CodeableConcept {
            coding: vec![Coding {
                system: loinc.system.clone(),
                code: loinc.code.clone(),
                display: loinc.display.clone(),
            }],
            text: loinc.display.clone(),
        },
        subject: Reference {
            reference: format!("Patient/{subject}"),
        },
        effective_date_time: summary.date.to_string(),
        value_quantity: Some(ValueQuantity {
            value: sedentary_hours_per_day(summary),
            unit: per_day.clone(),
            system: loinc.unit_system.clone(),
            code: per_day,
        }),
        component: vec![
            ObservationComponent {
                code: concept(
                    "CUSTOM-ACTIVITY-SCORE",
                    "Activity Score",
                    "Activity Score (0-100)",
                ),
                value_quantity: None,
                value_integer: Some(stats.activity_score),
                value_string: None,
            },
            ObservationComponent {
                code: concept(
                    "CUSTOM-DOMINANT-STATE",
                    "Dominant Activity State",
                    "Dominant State",
                ),
                value_quantity: None,
                value_integer: None,
                value_string: Some(stats.dominant_state.to_string()),
            },
            ObservationComponent {
                code: concept(
                    "CUSTOM-ALERT-COUNT",
                    "Sedentary Alert Count",
                    "Number of 20-minute sedentary alerts",
                ),
                value_quantity: None,
                value_integer: Some(stats.alert_count),
                value_string: None,
            },
            ObservationComponent {
                code: concept(
                    "CUSTOM-ACTIVE-MINUTES",
                    "Active Minutes",
                    "Total active minutes",
                ),
                value_quantity: Some(ValueQuantity {
                    value: stats.active_minutes,
                    unit: "min".to_string(),
                    system: loinc.unit_system.clone(),
                    code: "min".to_string(),
                }),
                value_integer: None,
                value_string: None,
            },
        ],
    }
}

pub fn bundle(summaries: &[ActivitySummary], subject: Uuid, loinc: &LoincConfig) -> Bundle {
    let entry: Vec<BundleEntry> = summaries
        .iter()
        .map(|summary| BundleEntry {
            resource: observation(summary, subject, loinc),
        })
        .collect();

    Bundle {
        resource_type: "Bundle",
        bundle_type: "searchset",
        total: entry.len(),
        entry,
    }
}

pub async fn user_observations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<FhirQuery>,
) -> ApiResult<Json<Bundle>> {
    let subject = Uuid::parse_str(&user_id)
        .map_err(|_| ApiError::BadRequest("Invalid user ID format".to_string()))?;

    let summaries =
        db::fetch_summaries(&state.pool, Some(subject), query.period, query.limit).await?;
    Ok(Json(bundle(&summaries, subject, &state.config.loinc)))
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestSummary {
    pub user_id: Option<Uuid>,
    pub date: NaiveDate,
    pub activity_score: i32,
    pub dominant_state: DominantState,
    #[serde(rename = "sedentaryHours24h")]
    pub sedentary_hours_24h: f64,
    pub loinc_code: String,
}

impl LatestSummary {
    pub fn from_summary(summary: &ActivitySummary, loinc: &LoincConfig) -> Self {
        Self {
            user_id: summary.user_id,
            date: summary.date,
            activity_score: summary.stats.activity_score,
            dominant_state: summary.stats.dominant_state,
            sedentary_hours_24h: summary.stats.sedentary_minutes / 60.0,
            loinc_code: loinc.code.clone(),
        }
    }
}

pub async fn latest_observations(
    State(state): State<AppState>,
    Query(query): Query<FhirQuery>,
) -> ApiResult<Json<Vec<LatestSummary>>> {
    let summaries = db::latest_per_user(&state.pool, query.period, query.limit).await?;
    Ok(Json(
        summaries
            .iter()
            .map(|summary| LatestSummary::from_summary(summary, &state.config.loinc))
            .collect(),
    ))
}
