use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

/// One field-level validation failure, addressed by its JSON path.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent JSON error envelopes.
/// Storage and other internal failures never leak details to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "validation failed",
                    "code": "VALIDATION_ERROR",
                    "fields": fields,
                }),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({
                    "error": "authentication required",
                    "code": "UNAUTHORIZED",
                }),
            ),
            AppError::Internal(err) => {
                tracing::error!(?err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "an internal error occurred",
                        "code": "INTERNAL_ERROR",
                    }),
                )
            }
        };
        (status, axum::Json(body)).into_response()
    }
}
