use super::model::{NewTimesheet, RowForSync, TimesheetForSync, TimesheetSummary};
use crate::model::{Painter, Project, SundryUsage};
use anyhow::{anyhow, Context, Result};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON;").execute(&pool).await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and make sure the
/// parent directory exists. In-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{expanded}?{q}"),
        None => format!("sqlite://{expanded}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---- users ----

#[instrument(skip_all)]
pub async fn get_or_create_user(pool: &Pool, email: &str, full_name: Option<&str>) -> Result<i64> {
    if let Some(id) = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }

    let rec = sqlx::query("INSERT INTO users (email, full_name) VALUES (?, ?) RETURNING id")
        .bind(email)
        .bind(full_name)
        .fetch_one(pool)
        .await?;
    Ok(rec.get::<i64, _>("id"))
}

/// Reconciliation upsert: keyed by email, refreshes the CRM-side user id.
#[instrument(skip_all)]
pub async fn upsert_user(
    pool: &Pool,
    email: &str,
    full_name: Option<&str>,
    zoho_user_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO users (email, full_name, zoho_user_id) VALUES (?, ?, ?) \
         ON CONFLICT(email) DO UPDATE SET \
           full_name = COALESCE(excluded.full_name, full_name), \
           zoho_user_id = excluded.zoho_user_id",
    )
    .bind(email)
    .bind(full_name)
    .bind(zoho_user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn user_zoho_id(pool: &Pool, email: &str) -> Result<Option<String>> {
    let id: Option<Option<String>> =
        sqlx::query_scalar("SELECT zoho_user_id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(pool)
            .await?;
    Ok(id.flatten())
}

// ---- timesheets ----

/// Insert a timesheet and all of its crew rows in one transaction.
/// Nothing is visible unless every row lands.
#[instrument(skip_all)]
pub async fn insert_timesheet(pool: &Pool, ts: &NewTimesheet) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let timesheet_id: i64 = sqlx::query(
        "INSERT INTO timesheets (user_email, job_id, job_name, work_date, notes, change_order, \
           total_crew_hours, tape, masking_paper, plastic, caulk_tube, tip) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&ts.user_email)
    .bind(&ts.job_id)
    .bind(&ts.job_name)
    .bind(&ts.work_date)
    .bind(&ts.notes)
    .bind(&ts.change_order)
    .bind(ts.total_crew_hours)
    .bind(ts.sundries.tape)
    .bind(ts.sundries.masking_paper)
    .bind(ts.sundries.plastic)
    .bind(ts.sundries.caulk_tube)
    .bind(ts.sundries.tip)
    .fetch_one(&mut *tx)
    .await?
    .get("id");

    for row in &ts.rows {
        sqlx::query(
            "INSERT INTO timesheet_rows (timesheet_id, painter_id, painter_name, start_time, \
               end_time, lunch_start, lunch_end, total_hours) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(timesheet_id)
        .bind(&row.painter_id)
        .bind(&row.painter_name)
        .bind(&row.start_time)
        .bind(&row.end_time)
        .bind(&row.lunch_start)
        .bind(&row.lunch_end)
        .bind(row.total_hours)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(timesheet_id)
}

pub async fn fetch_timesheet_for_sync(pool: &Pool, timesheet_id: i64) -> Result<TimesheetForSync> {
    let row = sqlx::query(
        "SELECT id, user_email, job_id, job_name, work_date, notes, change_order, \
                total_crew_hours, tape, masking_paper, plastic, caulk_tube, tip, \
                zoho_record_id, synced \
         FROM timesheets WHERE id = ?",
    )
    .bind(timesheet_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Err(anyhow!("timesheet {} not found", timesheet_id));
    };

    Ok(TimesheetForSync {
        id: row.get("id"),
        user_email: row.get("user_email"),
        job_id: row.get("job_id"),
        job_name: row.get("job_name"),
        work_date: row.get("work_date"),
        notes: row.get("notes"),
        change_order: row.get("change_order"),
        total_crew_hours: row.get("total_crew_hours"),
        sundries: SundryUsage {
            tape: row.get("tape"),
            masking_paper: row.get("masking_paper"),
            plastic: row.get("plastic"),
            caulk_tube: row.get("caulk_tube"),
            tip: row.get("tip"),
        },
        zoho_record_id: row
            .get::<Option<String>, _>("zoho_record_id")
            .filter(|s| !s.trim().is_empty()),
        synced: row.get::<i64, _>("synced") != 0,
    })
}

pub async fn fetch_rows_for_sync(pool: &Pool, timesheet_id: i64) -> Result<Vec<RowForSync>> {
    let rows = sqlx::query(
        "SELECT id, painter_id, painter_name, start_time, end_time, lunch_start, lunch_end, \
                total_hours, zoho_junction_id \
         FROM timesheet_rows WHERE timesheet_id = ? ORDER BY id",
    )
    .bind(timesheet_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| RowForSync {
            id: row.get("id"),
            painter_id: row.get("painter_id"),
            painter_name: row.get("painter_name"),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            lunch_start: row.get("lunch_start"),
            lunch_end: row.get("lunch_end"),
            total_hours: row.get("total_hours"),
            zoho_junction_id: row
                .get::<Option<String>, _>("zoho_junction_id")
                .filter(|s| !s.trim().is_empty()),
        })
        .collect())
}

/// Ids of a user's timesheets still awaiting full CRM mirroring, oldest
/// first. Used by the submission-piggyback retry.
pub async fn unsynced_timesheet_ids(pool: &Pool, user_email: &str) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT id FROM timesheets WHERE user_email = ? AND synced = 0 ORDER BY id",
    )
    .bind(user_email)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[instrument(skip_all)]
pub async fn set_timesheet_parent_id(pool: &Pool, timesheet_id: i64, zoho_id: &str) -> Result<()> {
    sqlx::query("UPDATE timesheets SET zoho_record_id = ? WHERE id = ?")
        .bind(zoho_id)
        .bind(timesheet_id)
        .execute(pool)
        .await
        .context("failed to persist timesheet parent record id")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_row_junction_id(pool: &Pool, row_id: i64, zoho_id: &str) -> Result<()> {
    sqlx::query("UPDATE timesheet_rows SET zoho_junction_id = ? WHERE id = ?")
        .bind(zoho_id)
        .bind(row_id)
        .execute(pool)
        .await
        .context("failed to persist junction record id")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn mark_timesheet_synced(pool: &Pool, timesheet_id: i64) -> Result<()> {
    sqlx::query("UPDATE timesheets SET synced = 1 WHERE id = ?")
        .bind(timesheet_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_timesheets_for_user(pool: &Pool, email: &str) -> Result<Vec<TimesheetSummary>> {
    let rows = sqlx::query(
        "SELECT id, job_id, job_name, work_date, total_crew_hours, synced, created_at \
         FROM timesheets WHERE user_email = ? ORDER BY id DESC",
    )
    .bind(email)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| TimesheetSummary {
            id: row.get("id"),
            job_id: row.get("job_id"),
            job_name: row.get("job_name"),
            date: row.get("work_date"),
            total_crew_hours: row.get("total_crew_hours"),
            synced: row.get::<i64, _>("synced") != 0,
            created_at: row.get("created_at"),
        })
        .collect())
}

// ---- projects ----

#[instrument(skip_all)]
pub async fn upsert_project(pool: &Pool, project: &Project) -> Result<()> {
    sqlx::query(
        "INSERT INTO projects (id, name, status, project_date, address, color_notes, material_notes, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(id) DO UPDATE SET \
           name = excluded.name, \
           status = excluded.status, \
           project_date = excluded.project_date, \
           address = excluded.address, \
           color_notes = excluded.color_notes, \
           material_notes = excluded.material_notes, \
           updated_at = CURRENT_TIMESTAMP",
    )
    .bind(&project.id)
    .bind(&project.name)
    .bind(&project.status)
    .bind(&project.project_date)
    .bind(&project.address)
    .bind(&project.color_notes)
    .bind(&project.material_notes)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_project(pool: &Pool, id: &str) -> Result<Option<Project>> {
    let row = sqlx::query(
        "SELECT id, name, status, project_date, address, color_notes, material_notes \
         FROM projects WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(project_from_row))
}

/// Projects visible to one user via the assignment join. This is the
/// relational fallback behind the authorization cache.
pub async fn projects_for_user(pool: &Pool, email: &str) -> Result<Vec<Project>> {
    let rows = sqlx::query(
        "SELECT p.id, p.name, p.status, p.project_date, p.address, p.color_notes, p.material_notes \
         FROM projects p JOIN user_projects up ON up.project_id = p.id \
         WHERE up.user_email = ? ORDER BY p.name",
    )
    .bind(email)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(project_from_row).collect())
}

pub async fn list_project_ids(pool: &Pool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT id FROM projects")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

fn project_from_row(row: sqlx::sqlite::SqliteRow) -> Project {
    Project {
        id: row.get("id"),
        name: row.get("name"),
        status: row.get("status"),
        project_date: row.get("project_date"),
        address: row.get("address"),
        color_notes: row.get("color_notes"),
        material_notes: row.get("material_notes"),
    }
}

// ---- user/project assignments ----

/// Replace one user's assignment rows wholesale. Delete and insert run in a
/// single transaction so a crash mid-replace cannot strand the user with a
/// half-written set.
#[instrument(skip_all)]
pub async fn replace_user_assignments(
    pool: &Pool,
    email: &str,
    project_ids: &[String],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM user_projects WHERE user_email = ?")
        .bind(email)
        .execute(&mut *tx)
        .await?;
    for pid in project_ids {
        sqlx::query("INSERT INTO user_projects (user_email, project_id) VALUES (?, ?)")
            .bind(email)
            .bind(pid)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn count_user_assignments(pool: &Pool, email: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_projects WHERE user_email = ?")
        .bind(email)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// ---- painters ----

#[instrument(skip_all)]
pub async fn upsert_painter(pool: &Pool, painter: &Painter) -> Result<()> {
    sqlx::query(
        "INSERT INTO painters (id, name, email, phone, active, updated_at) \
         VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(id) DO UPDATE SET \
           name = excluded.name, \
           email = excluded.email, \
           phone = excluded.phone, \
           active = excluded.active, \
           updated_at = CURRENT_TIMESTAMP",
    )
    .bind(&painter.id)
    .bind(&painter.name)
    .bind(&painter.email)
    .bind(&painter.phone)
    .bind(painter.active as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_painter(pool: &Pool, id: &str) -> Result<Option<Painter>> {
    let row = sqlx::query("SELECT id, name, email, phone, active FROM painters WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| Painter {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        active: row.get::<i64, _>("active") != 0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::model::NewTimesheetRow;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_timesheet() -> NewTimesheet {
        NewTimesheet {
            user_email: "foreman@example.com".into(),
            job_id: "1001".into(),
            job_name: "Elm St repaint".into(),
            work_date: "2026-03-02".into(),
            notes: Some("second coat".into()),
            change_order: None,
            total_crew_hours: 15.5,
            sundries: SundryUsage {
                caulk_tube: 2,
                ..Default::default()
            },
            rows: vec![
                NewTimesheetRow {
                    painter_id: "111111111111111111".into(),
                    painter_name: "Ana".into(),
                    start_time: "08:00".into(),
                    end_time: "16:00".into(),
                    lunch_start: Some("12:00".into()),
                    lunch_end: Some("12:30".into()),
                    total_hours: 7.5,
                },
                NewTimesheetRow {
                    painter_id: "222222222222222222".into(),
                    painter_name: "Ben".into(),
                    start_time: "08:00".into(),
                    end_time: "16:00".into(),
                    lunch_start: None,
                    lunch_end: None,
                    total_hours: 8.0,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_timesheet() {
        let pool = setup_pool().await;
        let id = insert_timesheet(&pool, &sample_timesheet()).await.unwrap();

        let ts = fetch_timesheet_for_sync(&pool, id).await.unwrap();
        assert_eq!(ts.job_id, "1001");
        assert!(!ts.synced);
        assert!(ts.zoho_record_id.is_none());
        assert_eq!(ts.sundries.caulk_tube, 2);

        let rows = fetch_rows_for_sync(&pool, id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.zoho_junction_id.is_none()));
    }

    #[tokio::test]
    async fn test_duplicate_painter_rejected_by_schema() {
        let pool = setup_pool().await;
        let mut ts = sample_timesheet();
        ts.rows[1].painter_id = ts.rows[0].painter_id.clone();
        assert!(insert_timesheet(&pool, &ts).await.is_err());
        // All-or-nothing: the parent row must not survive the failed insert.
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM timesheets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_sync_id_persistence() {
        let pool = setup_pool().await;
        let id = insert_timesheet(&pool, &sample_timesheet()).await.unwrap();

        set_timesheet_parent_id(&pool, id, "z-parent").await.unwrap();
        let ts = fetch_timesheet_for_sync(&pool, id).await.unwrap();
        assert_eq!(ts.zoho_record_id.as_deref(), Some("z-parent"));

        let rows = fetch_rows_for_sync(&pool, id).await.unwrap();
        set_row_junction_id(&pool, rows[0].id, "z-j1").await.unwrap();
        let rows = fetch_rows_for_sync(&pool, id).await.unwrap();
        assert_eq!(rows[0].zoho_junction_id.as_deref(), Some("z-j1"));
        assert!(rows[1].zoho_junction_id.is_none());

        mark_timesheet_synced(&pool, id).await.unwrap();
        assert!(fetch_timesheet_for_sync(&pool, id).await.unwrap().synced);
    }

    #[tokio::test]
    async fn test_unsynced_ids_ordering() {
        let pool = setup_pool().await;
        let first = insert_timesheet(&pool, &sample_timesheet()).await.unwrap();
        let second = insert_timesheet(&pool, &sample_timesheet()).await.unwrap();
        mark_timesheet_synced(&pool, second).await.unwrap();
        let third = insert_timesheet(&pool, &sample_timesheet()).await.unwrap();

        let ids = unsynced_timesheet_ids(&pool, "foreman@example.com")
            .await
            .unwrap();
        assert_eq!(ids, vec![first, third]);
    }

    #[tokio::test]
    async fn test_replace_user_assignments_is_wholesale() {
        let pool = setup_pool().await;
        for pid in ["p1", "p2", "p3"] {
            upsert_project(
                &pool,
                &Project {
                    id: pid.into(),
                    name: format!("Job {pid}"),
                    status: None,
                    project_date: None,
                    address: None,
                    color_notes: None,
                    material_notes: None,
                },
            )
            .await
            .unwrap();
        }

        replace_user_assignments(&pool, "a@x.com", &["p1".into(), "p2".into()])
            .await
            .unwrap();
        assert_eq!(count_user_assignments(&pool, "a@x.com").await.unwrap(), 2);

        // Revocation: p2 disappears, p3 appears, no duplicates.
        replace_user_assignments(&pool, "a@x.com", &["p1".into(), "p3".into()])
            .await
            .unwrap();
        let visible = projects_for_user(&pool, "a@x.com").await.unwrap();
        let mut ids: Vec<_> = visible.iter().map(|p| p.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["p1", "p3"]);
    }

    #[tokio::test]
    async fn test_upsert_user_keeps_name_when_absent() {
        let pool = setup_pool().await;
        upsert_user(&pool, "f@x.com", Some("Flo"), "900000000000000001")
            .await
            .unwrap();
        upsert_user(&pool, "f@x.com", None, "900000000000000002")
            .await
            .unwrap();

        let zid = user_zoho_id(&pool, "f@x.com").await.unwrap();
        assert_eq!(zid.as_deref(), Some("900000000000000002"));
        let name: Option<String> =
            sqlx::query_scalar("SELECT full_name FROM users WHERE email = 'f@x.com'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(name.as_deref(), Some("Flo"));
    }
}
