//! View models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business
//! logic lives in the sync engine and HTTP handlers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::SundryUsage;

/// A validated submission ready to be written in one transaction.
#[derive(Debug, Clone)]
pub struct NewTimesheet {
    pub user_email: String,
    pub job_id: String,
    pub job_name: String,
    pub work_date: String,
    pub notes: Option<String>,
    pub change_order: Option<String>,
    pub total_crew_hours: f64,
    pub sundries: SundryUsage,
    pub rows: Vec<NewTimesheetRow>,
}

#[derive(Debug, Clone)]
pub struct NewTimesheetRow {
    pub painter_id: String,
    pub painter_name: String,
    pub start_time: String,
    pub end_time: String,
    pub lunch_start: Option<String>,
    pub lunch_end: Option<String>,
    pub total_hours: f64,
}

/// Timesheet slice used by the sync engine to decide what to push.
#[derive(Debug, Clone)]
pub struct TimesheetForSync {
    pub id: i64,
    pub user_email: String,
    pub job_id: String,
    pub job_name: String,
    pub work_date: String,
    pub notes: Option<String>,
    pub change_order: Option<String>,
    pub total_crew_hours: f64,
    pub sundries: SundryUsage,
    pub zoho_record_id: Option<String>,
    pub synced: bool,
}

/// Crew row slice used when pushing junction records.
#[derive(Debug, Clone)]
pub struct RowForSync {
    pub id: i64,
    pub painter_id: String,
    pub painter_name: String,
    pub start_time: String,
    pub end_time: String,
    pub lunch_start: Option<String>,
    pub lunch_end: Option<String>,
    pub total_hours: f64,
    pub zoho_junction_id: Option<String>,
}

/// History listing entry; `synced` doubles as the pending-sync indicator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimesheetSummary {
    pub id: i64,
    pub job_id: String,
    pub job_name: String,
    pub date: String,
    pub total_crew_hours: f64,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
}
