//! Identity and shared-secret checks.
//!
//! Session handling lives in an upstream identity layer; its contract here
//! is two trusted headers carrying the current user's id and email. The
//! operational endpoints (cron, webhooks) use plain bearer secrets instead.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use super::error::AppError;

pub const USER_ID_HEADER: &str = "x-portal-user-id";
pub const USER_EMAIL_HEADER: &str = "x-portal-user-email";

/// The authenticated foreman, as reported by the identity layer.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        match (header(USER_ID_HEADER), header(USER_EMAIL_HEADER)) {
            (Some(id), Some(email)) => Ok(CurrentUser { id, email }),
            _ => Err(AppError::Unauthorized),
        }
    }
}

/// Constant-shape bearer check for the cron and webhook endpoints.
pub fn require_bearer(headers: &HeaderMap, expected: &str) -> Result<(), AppError> {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}
