//! CRM sync engine: mirrors one durable timesheet into a CRM parent record
//! plus one junction record per crew row, resumable from any partial state.
//!
//! Retry is piggybacked on submission: after a new timesheet's own attempt,
//! the engine re-attempts every other unsynced timesheet belonging to the
//! same user. A timesheet whose user never submits again stays partially
//! synced until someone runs a manual attempt; adding a scheduled sweep is a
//! pending product decision (see DESIGN.md).

use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::db::{self, Pool};
use crate::model::SyncState;
use crate::zoho::{build_junction_record, build_parent_record, ZohoService};

/// Shape of a CRM record id. Painter rows whose id does not match were
/// seeded locally and have no CRM counterpart; they are skipped rather than
/// guessed at, which keeps their timesheet in `ParentCreated` forever.
static CRM_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{15,20}$").expect("valid regex"));

pub fn is_crm_id(id: &str) -> bool {
    CRM_ID_RE.is_match(id)
}

pub struct SyncEngine {
    pool: Pool,
    zoho: Arc<dyn ZohoService>,
}

impl SyncEngine {
    pub fn new(pool: Pool, zoho: Arc<dyn ZohoService>) -> Self {
        Self { pool, zoho }
    }

    /// Run one sync attempt for one timesheet and report the state it ends
    /// in. Already-synced timesheets return immediately without touching
    /// the CRM. A CRM failure aborts the attempt with an error; everything
    /// persisted so far stays persisted, so the next attempt resumes where
    /// this one stopped.
    #[instrument(skip_all)]
    pub async fn sync_timesheet(&self, timesheet_id: i64) -> Result<SyncState> {
        let ts = db::fetch_timesheet_for_sync(&self.pool, timesheet_id).await?;
        if ts.synced {
            return Ok(SyncState::FullySynced);
        }

        // Phase 1: parent record, only when absent.
        let parent_id = match ts.zoho_record_id.clone() {
            Some(id) => id,
            None => {
                let Some(foreman_id) = db::user_zoho_id(&self.pool, &ts.user_email).await? else {
                    warn!(
                        timesheet_id,
                        email = %ts.user_email,
                        "foreman has no CRM user id; leaving timesheet unsynced"
                    );
                    return Ok(SyncState::Unsynced);
                };
                let record = build_parent_record(&ts, &foreman_id);
                let id = self.zoho.create_timesheet_record(record).await?;
                // Persist before phase 2 so a crash between phases resumes
                // without creating a duplicate parent.
                db::set_timesheet_parent_id(&self.pool, timesheet_id, &id).await?;
                info!(timesheet_id, parent_id = %id, "created CRM parent record");
                id
            }
        };

        // Phase 2: one junction record per pending row. Row failures are
        // independent; each success is persisted immediately.
        let rows = db::fetch_rows_for_sync(&self.pool, timesheet_id).await?;
        for row in rows.iter().filter(|r| r.zoho_junction_id.is_none()) {
            if !is_crm_id(&row.painter_id) {
                warn!(
                    timesheet_id,
                    row_id = row.id,
                    painter_id = %row.painter_id,
                    "painter id has no CRM shape; skipping row"
                );
                continue;
            }
            let record = match build_junction_record(&parent_id, row, &ts.work_date) {
                Ok(record) => record,
                Err(err) => {
                    warn!(timesheet_id, row_id = row.id, ?err, "junction payload build failed");
                    continue;
                }
            };
            match self.zoho.create_junction_record(record).await {
                Ok(junction_id) => {
                    db::set_row_junction_id(&self.pool, row.id, &junction_id).await?;
                    info!(timesheet_id, row_id = row.id, %junction_id, "created CRM junction record");
                }
                Err(err) => {
                    warn!(timesheet_id, row_id = row.id, ?err, "junction create failed; will retry");
                }
            }
        }

        // Phase 3: completion check against the re-read rows.
        let rows = db::fetch_rows_for_sync(&self.pool, timesheet_id).await?;
        let pending = rows.iter().filter(|r| r.zoho_junction_id.is_none()).count();
        if pending == 0 {
            db::mark_timesheet_synced(&self.pool, timesheet_id).await?;
            info!(timesheet_id, "timesheet fully synced");
            return Ok(SyncState::FullySynced);
        }
        Ok(SyncState::derive(Some(parent_id.as_str()), pending))
    }

    /// Submission-triggered sync: the freshly submitted timesheet first,
    /// then the same user's remaining unsynced backlog. Failures are logged
    /// and never propagate; the caller has already answered the client.
    #[instrument(skip_all)]
    pub async fn run_after_submission(&self, user_email: &str, timesheet_id: i64) {
        if let Err(err) = self.sync_timesheet(timesheet_id).await {
            warn!(timesheet_id, ?err, "sync attempt failed for new submission");
        }

        let backlog = match db::unsynced_timesheet_ids(&self.pool, user_email).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(?err, user_email, "could not list unsynced timesheets");
                return;
            }
        };
        for id in backlog.into_iter().filter(|id| *id != timesheet_id) {
            if let Err(err) = self.sync_timesheet(id).await {
                warn!(timesheet_id = id, ?err, "retry sync attempt failed");
            }
        }
    }
}
