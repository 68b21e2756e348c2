use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use crewsheet::config::{self, Config};
use crewsheet::db;
use crewsheet::http::{build_router, AppState};
use crewsheet::zoho::ZohoService;

const CRON_SECRET: &str = "CRON_SHARED_SECRET";
const WEBHOOK_SECRET: &str = "WEBHOOK_SHARED_SECRET";

/// CRM double that counts create calls and stalls briefly before doing so,
/// proving the submission response never waits on the CRM.
#[derive(Default)]
struct SlowZoho {
    creates: AtomicUsize,
}

#[async_trait::async_trait]
impl ZohoService for SlowZoho {
    async fn create_timesheet_record(&self, _record: Value) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok("z-parent".into())
    }
    async fn create_junction_record(&self, _record: Value) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok("z-junction".into())
    }
    async fn fetch_projects(&self) -> Result<Vec<Value>> {
        Ok(vec![json!({"id": "p1", "Deal_Name": "Elm St"})])
    }
    async fn fetch_portal_users(&self) -> Result<Vec<Value>> {
        Ok(vec![json!({"id": "u1", "email": "f@x.com"})])
    }
    async fn fetch_connections(&self) -> Result<Vec<Value>> {
        Ok(vec![json!({"Portal_User": {"id": "u1"}, "Project": {"id": "p1"}})])
    }
    async fn fetch_painters(&self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

async fn setup_app() -> (Router, sqlx::SqlitePool, Arc<SlowZoho>) {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    let zoho = Arc::new(SlowZoho::default());
    let state = AppState::new(pool.clone(), zoho.clone(), Arc::new(cfg));
    (build_router(state), pool, zoho)
}

fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
    req.header("x-portal-user-id", "u1")
        .header("x-portal-user-email", "f@x.com")
}

fn submission_body() -> Value {
    json!({
        "jobId": "500000000000000001",
        "jobName": "Elm St repaint",
        "date": "2026-03-02",
        "notes": "second coat",
        "painters": [
            {
                "painterId": "111111111111111111",
                "painterName": "Ana",
                "startTime": "09:00",
                "endTime": "17:00",
                "lunchStart": "12:00",
                "lunchEnd": "12:30"
            }
        ],
        "sundryItems": [
            {"sundryItem": "tip", "quantity": 0},
            {"sundryItem": "caulkTube", "quantity": 3}
        ]
    })
}

async fn json_body(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_open() {
    let (app, _pool, _zoho) = setup_app().await;
    let res = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn submission_requires_identity_headers() {
    let (app, pool, _zoho) = setup_app().await;
    let res = app
        .oneshot(
            Request::post("/time-entries")
                .header("content-type", "application/json")
                .body(Body::from(submission_body().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM timesheets")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn valid_submission_responds_before_any_crm_call() {
    let (app, pool, zoho) = setup_app().await;
    let res = app
        .oneshot(
            authed(Request::post("/time-entries"))
                .header("content-type", "application/json")
                .body(Body::from(submission_body().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    // The background sync has not reached the CRM yet.
    assert_eq!(zoho.creates.load(Ordering::SeqCst), 0);

    let body = json_body(res).await;
    assert_eq!(body["synced"], false);
    assert_eq!(body["totalCrewHours"], 7.5);
    assert_eq!(body["date"], "2026-03-02");

    let ts = db::fetch_timesheet_for_sync(&pool, body["id"].as_i64().unwrap())
        .await
        .unwrap();
    assert_eq!(ts.sundries.caulk_tube, 3);
    assert_eq!(ts.sundries.tip, 0);
    assert!(!ts.synced);
}

#[tokio::test]
async fn duplicate_painter_is_rejected_before_persisting() {
    let (app, pool, _zoho) = setup_app().await;
    let mut body = submission_body();
    let row = body["painters"][0].clone();
    body["painters"].as_array_mut().unwrap().push(row);

    let res = app
        .oneshot(
            authed(Request::post("/time-entries"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let payload = json_body(res).await;
    assert_eq!(payload["code"], "VALIDATION_ERROR");
    let fields = payload["fields"].as_array().unwrap();
    assert!(fields
        .iter()
        .any(|f| f["field"] == "painters[1].painterId"));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM timesheets")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn bad_sundry_items_are_rejected() {
    let (app, pool, _zoho) = setup_app().await;
    let mut body = submission_body();
    body["sundryItems"] = json!([
        {"sundryItem": "tape", "quantity": -1},
        {"sundryItem": "rollerSleeve", "quantity": 2}
    ]);

    let res = app
        .oneshot(
            authed(Request::post("/time-entries"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let payload = json_body(res).await;
    assert_eq!(payload["code"], "VALIDATION_ERROR");
    let fields: Vec<&str> = payload["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"sundryItems[0].quantity"));
    assert!(fields.contains(&"sundryItems[1].sundryItem"));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM timesheets")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn validation_collects_field_errors() {
    let (app, _pool, _zoho) = setup_app().await;
    let body = json!({
        "jobId": "",
        "jobName": "Elm St",
        "date": "03/02/2026",
        "painters": [
            {"painterId": "1", "startTime": "breakfast", "endTime": ""}
        ]
    });
    let res = app
        .oneshot(
            authed(Request::post("/time-entries"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let payload = json_body(res).await;
    let fields: Vec<&str> = payload["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"jobId"));
    assert!(fields.contains(&"date"));
    assert!(fields.contains(&"painters[0].startTime"));
    assert!(fields.contains(&"painters[0].endTime"));
}

#[tokio::test]
async fn history_lists_pending_sync_indicator() {
    let (app, _pool, _zoho) = setup_app().await;
    let res = app
        .clone()
        .oneshot(
            authed(Request::post("/time-entries"))
                .header("content-type", "application/json")
                .body(Body::from(submission_body().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = app
        .oneshot(
            authed(Request::get("/time-entries"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let list = json_body(res).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["jobName"], "Elm St repaint");
    assert_eq!(list[0]["synced"], false);
}

#[tokio::test]
async fn projects_read_falls_back_to_store_and_repopulates() {
    let (app, pool, _zoho) = setup_app().await;
    db::upsert_project(
        &pool,
        &crewsheet::model::Project {
            id: "p1".into(),
            name: "Elm St".into(),
            status: Some("Scheduled".into()),
            project_date: None,
            address: None,
            color_notes: None,
            material_notes: None,
        },
    )
    .await
    .unwrap();
    db::replace_user_assignments(&pool, "f@x.com", &["p1".into()])
        .await
        .unwrap();

    let res = app
        .clone()
        .oneshot(authed(Request::get("/projects")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let list = json_body(res).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["id"], "p1");

    // Once cached, the store is no longer consulted.
    sqlx::query("DELETE FROM user_projects")
        .execute(&pool)
        .await
        .unwrap();
    let res = app
        .oneshot(authed(Request::get("/projects")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let list = json_body(res).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn reconcile_requires_cron_secret() {
    let (app, _pool, _zoho) = setup_app().await;
    let res = app
        .clone()
        .oneshot(
            Request::post("/admin/reconcile")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app
        .oneshot(
            Request::post("/admin/reconcile")
                .header("authorization", format!("Bearer {CRON_SECRET}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let summary = json_body(res).await;
    assert_eq!(summary["projectsCount"], 1);
    assert_eq!(summary["usersSynced"], 1);
    assert_eq!(summary["connectionsProcessed"], 1);
}

#[tokio::test]
async fn project_webhook_merges_partial_payload() {
    let (app, pool, _zoho) = setup_app().await;
    db::upsert_project(
        &pool,
        &crewsheet::model::Project {
            id: "p9".into(),
            name: "Oak Ave".into(),
            status: Some("Scheduled".into()),
            project_date: None,
            address: Some("9 Oak Ave".into()),
            color_notes: None,
            material_notes: None,
        },
    )
    .await
    .unwrap();

    let res = app
        .clone()
        .oneshot(
            Request::post("/webhooks/projects")
                .header("authorization", format!("Bearer {WEBHOOK_SECRET}"))
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"id": "p9", "Stage": "In Progress"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let project = db::get_project(&pool, "p9").await.unwrap().unwrap();
    assert_eq!(project.status.as_deref(), Some("In Progress"));
    // Fields absent from the push survive.
    assert_eq!(project.name, "Oak Ave");
    assert_eq!(project.address.as_deref(), Some("9 Oak Ave"));

    // Wrong secret is rejected.
    let res = app
        .oneshot(
            Request::post("/webhooks/projects")
                .header("authorization", "Bearer nope")
                .header("content-type", "application/json")
                .body(Body::from(json!({"id": "p9"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn painter_webhook_updates_directory() {
    let (app, pool, _zoho) = setup_app().await;
    let res = app
        .oneshot(
            Request::post("/webhooks/painters")
                .header("authorization", format!("Bearer {WEBHOOK_SECRET}"))
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"id": "pt1", "Name": "Carlos", "Phone": "555-0100"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let painter = db::get_painter(&pool, "pt1").await.unwrap().unwrap();
    assert_eq!(painter.name, "Carlos");
    assert_eq!(painter.phone.as_deref(), Some("555-0100"));
    assert!(painter.active);
}
