//! HTTP surface: router, shared state, error envelope, identity checks.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error;
pub mod handlers;
pub mod state;

pub use state::AppState;

/// Build the application router. Used by `main` and by the integration
/// tests so both exercise the same middleware stack.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/time-entries",
            post(handlers::submit_time_entry).get(handlers::list_time_entries),
        )
        .route("/projects", get(handlers::list_projects))
        .route("/admin/reconcile", post(handlers::reconcile))
        .route("/webhooks/projects", post(handlers::webhook_project))
        .route("/webhooks/painters", post(handlers::webhook_painter))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
