use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a timesheet sits in the CRM mirroring protocol. Derived from the
/// stored parent/junction ids, never persisted directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncState {
    /// No CRM parent record yet.
    Unsynced,
    /// Parent record exists, at least one junction record still pending.
    ParentCreated,
    /// Parent and every junction record exist; `synced` flag is set.
    FullySynced,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Unsynced => "UNSYNCED",
            SyncState::ParentCreated => "PARENT_CREATED",
            SyncState::FullySynced => "FULLY_SYNCED",
        }
    }

    /// Classify from the persisted parent id and junction-id completeness.
    pub fn derive(parent_id: Option<&str>, pending_rows: usize) -> Self {
        match (parent_id, pending_rows) {
            (None, _) => SyncState::Unsynced,
            (Some(_), 0) => SyncState::FullySynced,
            (Some(_), _) => SyncState::ParentCreated,
        }
    }
}

/// Fixed set of named consumable quantities tracked per timesheet.
///
/// The portal accepts the camelCase names; the CRM payload uses the
/// underscored field names. Zero quantities are never sent outbound.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SundryUsage {
    pub tape: i64,
    pub masking_paper: i64,
    pub plastic: i64,
    pub caulk_tube: i64,
    pub tip: i64,
}

impl SundryUsage {
    /// Record a quantity by its portal item name. Returns false for names
    /// outside the fixed set so callers can reject the payload.
    pub fn set(&mut self, item: &str, quantity: i64) -> bool {
        match item {
            "tape" => self.tape = quantity,
            "maskingPaper" => self.masking_paper = quantity,
            "plastic" => self.plastic = quantity,
            "caulkTube" => self.caulk_tube = quantity,
            "tip" => self.tip = quantity,
            _ => return false,
        }
        true
    }

    /// CRM field name / quantity pairs for items actually used.
    pub fn crm_fields(&self) -> Vec<(&'static str, i64)> {
        [
            ("Tape", self.tape),
            ("Masking_Paper", self.masking_paper),
            ("Plastic", self.plastic),
            ("Caulk_Tube", self.caulk_tube),
            ("Tip", self.tip),
        ]
        .into_iter()
        .filter(|(_, qty)| *qty > 0)
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: Option<String>,
    pub zoho_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Denormalized snapshot of a CRM deal record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub status: Option<String>,
    pub project_date: Option<String>,
    pub address: Option<String>,
    pub color_notes: Option<String>,
    pub material_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Painter {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timesheet {
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
    pub created_at: DateTime<Utc>,
}

/// One painter's start/end/lunch times within a timesheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimesheetRow {
    pub id: i64,
    pub timesheet_id: i64,
    pub painter_id: String,
    pub painter_name: String,
    pub start_time: String,
    pub end_time: String,
    pub lunch_start: Option<String>,
    pub lunch_end: Option<String>,
    pub total_hours: f64,
    pub zoho_junction_id: Option<String>,
}
