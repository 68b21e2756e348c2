use std::collections::HashSet;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::cache;
use crate::db::{self, NewTimesheet, NewTimesheetRow, TimesheetSummary};
use crate::hours;
use crate::model::{Project, SundryUsage};
use crate::recon::{self, merge_painter_record, merge_project_record};

use super::auth::{require_bearer, CurrentUser};
use super::error::{AppError, AppResult, FieldError};
use super::state::AppState;

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub job_id: String,
    pub job_name: String,
    pub date: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub change_order: Option<String>,
    pub painters: Vec<PainterRowInput>,
    #[serde(default)]
    pub sundry_items: Vec<SundryItemInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PainterRowInput {
    #[serde(default)]
    pub painter_id: String,
    #[serde(default)]
    pub painter_name: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub lunch_start: Option<String>,
    #[serde(default)]
    pub lunch_end: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SundryItemInput {
    pub sundry_item: String,
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub id: i64,
    pub job_id: String,
    pub date: String,
    pub total_crew_hours: f64,
    pub synced: bool,
}

/// POST /time-entries
///
/// Writes the timesheet durably, answers 201, and only then fires the CRM
/// sync as a detached task. CRM availability never delays or fails the
/// response.
#[instrument(skip_all, fields(email = %user.email))]
pub async fn submit_time_entry(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<SubmitRequest>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let new_ts = validate_submission(&user.email, &req)?;

    db::get_or_create_user(&state.pool, &user.email, None)
        .await
        .map_err(AppError::Internal)?;
    let id = db::insert_timesheet(&state.pool, &new_ts)
        .await
        .map_err(AppError::Internal)?;

    let engine = state.sync.clone();
    let email = user.email.clone();
    tokio::spawn(async move {
        engine.run_after_submission(&email, id).await;
    });

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            id,
            job_id: new_ts.job_id,
            date: new_ts.work_date,
            total_crew_hours: new_ts.total_crew_hours,
            synced: false,
        }),
    ))
}

/// Turn a raw submission into a storable timesheet, collecting every field
/// error rather than stopping at the first.
fn validate_submission(email: &str, req: &SubmitRequest) -> Result<NewTimesheet, AppError> {
    let mut errors: Vec<FieldError> = Vec::new();

    if req.job_id.trim().is_empty() {
        errors.push(FieldError::new("jobId", "required"));
    }
    if req.job_name.trim().is_empty() {
        errors.push(FieldError::new("jobName", "required"));
    }
    if NaiveDate::parse_from_str(&req.date, "%Y-%m-%d").is_err() {
        errors.push(FieldError::new("date", "expected YYYY-MM-DD"));
    }
    if req.painters.is_empty() {
        errors.push(FieldError::new("painters", "at least one crew row required"));
    }

    let mut seen_painters: HashSet<&str> = HashSet::new();
    let mut rows: Vec<NewTimesheetRow> = Vec::new();
    let mut total_crew_hours = 0.0;

    for (i, painter) in req.painters.iter().enumerate() {
        let field = |name: &str| format!("painters[{i}].{name}");

        if painter.painter_id.trim().is_empty() {
            errors.push(FieldError::new(field("painterId"), "required"));
        } else if !seen_painters.insert(painter.painter_id.trim()) {
            errors.push(FieldError::new(
                field("painterId"),
                "painter appears more than once",
            ));
        }

        let start = normalize_time_field(&painter.start_time, &field("startTime"), &mut errors);
        let end = normalize_time_field(&painter.end_time, &field("endTime"), &mut errors);
        let lunch_start =
            normalize_optional_time(&painter.lunch_start, &field("lunchStart"), &mut errors);
        let lunch_end =
            normalize_optional_time(&painter.lunch_end, &field("lunchEnd"), &mut errors);

        if let (Some(start), Some(end)) = (start, end) {
            let total = hours::compute_hours(
                &start,
                &end,
                lunch_start.as_deref(),
                lunch_end.as_deref(),
            )
            .unwrap_or(0.0);
            total_crew_hours += total;
            rows.push(NewTimesheetRow {
                painter_id: painter.painter_id.trim().to_string(),
                painter_name: painter.painter_name.trim().to_string(),
                start_time: start,
                end_time: end,
                lunch_start,
                lunch_end,
                total_hours: total,
            });
        }
    }

    let mut sundries = SundryUsage::default();
    for (i, item) in req.sundry_items.iter().enumerate() {
        if item.quantity < 0 {
            errors.push(FieldError::new(
                format!("sundryItems[{i}].quantity"),
                "must not be negative",
            ));
            continue;
        }
        if !sundries.set(&item.sundry_item, item.quantity) {
            errors.push(FieldError::new(
                format!("sundryItems[{i}].sundryItem"),
                "unknown sundry item",
            ));
        }
    }

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    Ok(NewTimesheet {
        user_email: email.to_string(),
        job_id: req.job_id.trim().to_string(),
        job_name: req.job_name.trim().to_string(),
        work_date: req.date.clone(),
        notes: req.notes.clone().filter(|n| !n.trim().is_empty()),
        change_order: req.change_order.clone().filter(|c| !c.trim().is_empty()),
        total_crew_hours: hours::round2(total_crew_hours),
        sundries,
        rows,
    })
}

fn normalize_time_field(
    value: &str,
    field: &str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "required"));
        return None;
    }
    match hours::normalize_hhmm(value) {
        Ok(t) => Some(t),
        Err(_) => {
            errors.push(FieldError::new(field, "expected HH:MM"));
            None
        }
    }
}

fn normalize_optional_time(
    value: &Option<String>,
    field: &str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    let raw = value.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }
    match hours::normalize_hhmm(raw) {
        Ok(t) => Some(t),
        Err(_) => {
            errors.push(FieldError::new(field, "expected HH:MM"));
            None
        }
    }
}

/// GET /time-entries: the caller's submission history, with the pending
/// sync indicator.
pub async fn list_time_entries(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<TimesheetSummary>>> {
    let entries = db::list_timesheets_for_user(&state.pool, &user.email)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(entries))
}

/// GET /projects: the jobs this user may log time against.
pub async fn list_projects(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Json<Vec<Project>> {
    Json(cache::visible_projects(&state.cache, &state.pool, &user.email).await)
}

/// POST /admin/reconcile: cron-invoked reconciliation pass.
pub async fn reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<recon::ReconSummary>> {
    require_bearer(&headers, &state.config.auth.cron_secret)?;
    let summary = recon::run_reconciliation(&state.pool, &state.cache, state.zoho.as_ref()).await;
    Ok(Json(summary))
}

/// POST /webhooks/projects: single-record push update from the CRM.
/// Merges into the stored snapshot; fields absent from the payload survive.
pub async fn webhook_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> AppResult<StatusCode> {
    require_bearer(&headers, &state.config.auth.webhook_secret)?;

    let Some(id) = payload.get("id").and_then(Value::as_str) else {
        return Err(AppError::Validation(vec![FieldError::new("id", "required")]));
    };
    let existing = db::get_project(&state.pool, id)
        .await
        .map_err(AppError::Internal)?;
    let Some(merged) = merge_project_record(existing, &payload) else {
        warn!(id, "project webhook payload unusable; ignoring");
        return Err(AppError::Validation(vec![FieldError::new(
            "Deal_Name",
            "required for unknown project",
        )]));
    };
    db::upsert_project(&state.pool, &merged)
        .await
        .map_err(AppError::Internal)?;
    state.cache.upsert_project(merged).await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /webhooks/painters: same merge semantics for the crew directory.
pub async fn webhook_painter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> AppResult<StatusCode> {
    require_bearer(&headers, &state.config.auth.webhook_secret)?;

    let Some(id) = payload.get("id").and_then(Value::as_str) else {
        return Err(AppError::Validation(vec![FieldError::new("id", "required")]));
    };
    let existing = db::get_painter(&state.pool, id)
        .await
        .map_err(AppError::Internal)?;
    let Some(merged) = merge_painter_record(existing, &payload) else {
        warn!(id, "painter webhook payload unusable; ignoring");
        return Err(AppError::Validation(vec![FieldError::new(
            "Name",
            "required for unknown painter",
        )]));
    };
    db::upsert_painter(&state.pool, &merged)
        .await
        .map_err(AppError::Internal)?;
    Ok(StatusCode::NO_CONTENT)
}
