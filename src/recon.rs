//! Reconciliation job: re-derives the local project tables, user directory,
//! and per-user authorization sets from the CRM's current state.
//!
//! Each step tolerates failure independently. A dead projects fetch must
//! not stop assignment rebuilding for users we already know. Running the
//! job twice against unchanged CRM data leaves the store byte-identical:
//! projects and painters are keyed upserts, assignments are a wholesale
//! per-user replace.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::cache::AuthCache;
use crate::db::{self, Pool};
use crate::model::{Painter, Project};
use crate::zoho::ZohoService;

/// Counters returned to the cron caller.
#[derive(Debug, Default, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconSummary {
    pub projects_count: usize,
    pub users_synced: usize,
    pub connections_processed: usize,
}

#[instrument(skip_all)]
pub async fn run_reconciliation(
    pool: &Pool,
    cache: &AuthCache,
    zoho: &dyn ZohoService,
) -> ReconSummary {
    let mut summary = ReconSummary::default();

    // Step 1: project snapshots into the store and the cache detail table.
    let mut project_ids: HashSet<String> = HashSet::new();
    match zoho.fetch_projects().await {
        Ok(records) => {
            for record in &records {
                let Some(project) = project_from_record(record) else {
                    warn!("skipping CRM project record without id/name");
                    continue;
                };
                if let Err(err) = db::upsert_project(pool, &project).await {
                    error!(?err, project_id = %project.id, "project upsert failed");
                    continue;
                }
                project_ids.insert(project.id.clone());
                cache.upsert_project(project).await;
                summary.projects_count += 1;
            }
        }
        Err(err) => error!(?err, "project fetch failed; keeping existing snapshots"),
    }
    // A failed fetch leaves the known-project set empty; fall back to the
    // store so connection resolution still works.
    if project_ids.is_empty() {
        match db::list_project_ids(pool).await {
            Ok(ids) => project_ids.extend(ids),
            Err(err) => error!(?err, "could not load stored project ids"),
        }
    }

    // Step 2: portal users, keyed by email, mapped from CRM user id.
    let mut users_by_zoho_id: HashMap<String, String> = HashMap::new();
    match zoho.fetch_portal_users().await {
        Ok(records) => {
            for record in &records {
                let (Some(id), Some(email)) = (
                    record.get("id").and_then(Value::as_str),
                    record.get("email").and_then(Value::as_str),
                ) else {
                    warn!("skipping CRM user record without id/email");
                    continue;
                };
                let full_name = record.get("full_name").and_then(Value::as_str);
                if let Err(err) = db::upsert_user(pool, email, full_name, id).await {
                    error!(?err, email, "user upsert failed");
                    continue;
                }
                users_by_zoho_id.insert(id.to_string(), email.to_string());
            }
        }
        Err(err) => error!(?err, "user fetch failed; skipping assignment rebuild"),
    }

    // Step 3: user-to-project junction links, grouped per user email.
    let mut assignments: HashMap<String, HashSet<String>> = HashMap::new();
    match zoho.fetch_connections().await {
        Ok(records) => {
            for record in &records {
                let user_id = record
                    .pointer("/Portal_User/id")
                    .and_then(Value::as_str);
                let project_id = record.pointer("/Project/id").and_then(Value::as_str);
                let (Some(user_id), Some(project_id)) = (user_id, project_id) else {
                    warn!("skipping CRM connection record with missing lookups");
                    continue;
                };
                let Some(email) = users_by_zoho_id.get(user_id) else {
                    warn!(user_id, "connection references unknown portal user");
                    continue;
                };
                if !project_ids.contains(project_id) {
                    warn!(project_id, "connection references unknown project");
                    continue;
                }
                assignments
                    .entry(email.clone())
                    .or_default()
                    .insert(project_id.to_string());
                summary.connections_processed += 1;
            }
        }
        Err(err) => error!(?err, "connection fetch failed; skipping assignment rebuild"),
    }

    // Step 4: wholesale replace per known user, store and cache alike. A
    // user with no surviving connections gets an empty set, which is how
    // revoked access disappears.
    if !users_by_zoho_id.is_empty() {
        for email in users_by_zoho_id.values() {
            let ids: Vec<String> = assignments
                .get(email)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            if let Err(err) = db::replace_user_assignments(pool, email, &ids).await {
                error!(?err, email, "assignment replace failed");
                continue;
            }
            cache
                .replace_user_projects(email, ids.into_iter().collect())
                .await;
            summary.users_synced += 1;
        }
    }

    // Step 5: crew directory.
    match zoho.fetch_painters().await {
        Ok(records) => {
            for record in &records {
                let Some(painter) = painter_from_record(record) else {
                    warn!("skipping CRM painter record without id/name");
                    continue;
                };
                if let Err(err) = db::upsert_painter(pool, &painter).await {
                    error!(?err, painter_id = %painter.id, "painter upsert failed");
                }
            }
        }
        Err(err) => error!(?err, "painter fetch failed; keeping existing directory"),
    }

    info!(
        projects = summary.projects_count,
        users = summary.users_synced,
        connections = summary.connections_processed,
        "reconciliation pass complete"
    );
    summary
}

/// Map a CRM deal record onto a project snapshot. Requires id and name.
pub fn project_from_record(record: &Value) -> Option<Project> {
    let id = record.get("id")?.as_str()?.to_string();
    let name = record.get("Deal_Name")?.as_str()?.to_string();
    Some(Project {
        id,
        name,
        status: field_str(record, "Stage"),
        project_date: field_str(record, "Project_Date"),
        address: field_str(record, "Address"),
        color_notes: field_str(record, "Colors"),
        material_notes: field_str(record, "Materials"),
    })
}

/// Overlay a partial CRM payload onto an existing snapshot. Fields absent
/// from the payload keep their stored value; this is what webhook updates
/// use so a single-field push cannot blank the rest of the record.
pub fn merge_project_record(existing: Option<Project>, record: &Value) -> Option<Project> {
    let id = record.get("id")?.as_str()?.to_string();
    let base = existing.unwrap_or(Project {
        id: id.clone(),
        name: String::new(),
        status: None,
        project_date: None,
        address: None,
        color_notes: None,
        material_notes: None,
    });
    let merged = Project {
        id,
        name: field_str(record, "Deal_Name").unwrap_or(base.name),
        status: field_str(record, "Stage").or(base.status),
        project_date: field_str(record, "Project_Date").or(base.project_date),
        address: field_str(record, "Address").or(base.address),
        color_notes: field_str(record, "Colors").or(base.color_notes),
        material_notes: field_str(record, "Materials").or(base.material_notes),
    };
    if merged.name.is_empty() {
        return None;
    }
    Some(merged)
}

pub fn painter_from_record(record: &Value) -> Option<Painter> {
    let id = record.get("id")?.as_str()?.to_string();
    let name = record.get("Name")?.as_str()?.to_string();
    Some(Painter {
        id,
        name,
        email: field_str(record, "Email"),
        phone: field_str(record, "Phone"),
        active: record
            .get("Active")
            .and_then(Value::as_bool)
            .unwrap_or(true),
    })
}

pub fn merge_painter_record(existing: Option<Painter>, record: &Value) -> Option<Painter> {
    let id = record.get("id")?.as_str()?.to_string();
    let base = existing.unwrap_or(Painter {
        id: id.clone(),
        name: String::new(),
        email: None,
        phone: None,
        active: true,
    });
    let merged = Painter {
        id,
        name: field_str(record, "Name").unwrap_or(base.name),
        email: field_str(record, "Email").or(base.email),
        phone: field_str(record, "Phone").or(base.phone),
        active: record
            .get("Active")
            .and_then(Value::as_bool)
            .unwrap_or(base.active),
    };
    if merged.name.is_empty() {
        return None;
    }
    Some(merged)
}

fn field_str(record: &Value, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}
