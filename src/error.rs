use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Message store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Authentication failed")]
    AuthError,
    #[error("Session closed")]
    SessionClosed,
    #[error("Not found")]
    NotFound,
    #[error("You can only delete your own content")]
    PermissionDenied,
    #[error("Couldn't find who to reply to (missing user id on the other side)")]
    NoCounterpart,
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Internal server error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            Self::StoreUnavailable(msg) => {
                tracing::warn!(message = %msg, "Message store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "Message store unavailable".to_string())
            }
            Self::AuthError => {
                tracing::debug!("Authentication failed");
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            Self::SessionClosed => {
                tracing::debug!("Session closed during request");
                (StatusCode::GONE, "Session closed".to_string())
            }
            Self::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Not found".to_string())
            }
            Self::PermissionDenied => {
                tracing::debug!("Store rejected a mutation (zero rows affected)");
                (StatusCode::FORBIDDEN, "You can only delete your own content".to_string())
            }
            Self::NoCounterpart => {
                tracing::debug!("Counterpart resolution failed");
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Couldn't find who to reply to (missing user id on the other side)".to_string(),
                )
            }
            Self::Validation(msg) => {
                tracing::debug!(message = %msg, "Validation failed");
                (StatusCode::BAD_REQUEST, msg)
            }
            Self::Internal => {
                tracing::error!("Internal server error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
