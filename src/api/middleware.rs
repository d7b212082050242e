use crate::api::AppState;
use crate::error::AppError;
use crate::services::registry::UserSession;
use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};
use std::sync::Arc;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Resolves the caller's live session from the opaque identity header.
/// Authentication itself is an external capability; this layer only maps
/// an already-established identity to its session state.
#[derive(Debug)]
pub struct SessionUser {
    pub user_id: Uuid,
    pub session: Arc<UserSession>,
}

impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(USER_ID_HEADER).ok_or(AppError::AuthError)?;
        let raw = header.to_str().map_err(|_| AppError::AuthError)?;
        let user_id = Uuid::parse_str(raw).map_err(|_| AppError::AuthError)?;

        let session = state.registry.get(user_id).ok_or(AppError::AuthError)?;
        Ok(Self { user_id, session })
    }
}
