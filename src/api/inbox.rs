use crate::api::AppState;
use crate::api::middleware::SessionUser;
use crate::api::schemas::{
    DeleteThreadResponse, LoginRequest, LoginResponse, MarkReadResponse, ReplyRequest, SendMessageRequest,
    ThreadResponse,
};
use crate::domain::{Message, ThreadSummary};
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

/// Establishes an inbox session for an authenticated identity and returns
/// the initial thread list.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let session = state.registry.login(req.user_id, req.label).await?;
    let threads = session.controller().threads().await;
    Ok((StatusCode::CREATED, Json(LoginResponse { user_id: req.user_id, threads })))
}

/// Tears down the caller's session, cancelling its realtime subscription.
pub async fn logout(State(state): State<AppState>, user: SessionUser) -> Result<impl IntoResponse> {
    state.registry.logout(user.user_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Current per-conversation thread summaries, newest first.
pub async fn list_threads(user: SessionUser) -> Result<Json<Vec<ThreadSummary>>> {
    Ok(Json(user.session.controller().threads().await))
}

/// Opens a conversation. Viewing acknowledges: unread messages addressed
/// to the caller are marked read as a side effect.
pub async fn open_thread(
    user: SessionUser,
    Path(conversation_key): Path<Uuid>,
) -> Result<Json<ThreadResponse>> {
    let messages = user.session.open_thread(conversation_key).await?;
    Ok(Json(ThreadResponse { conversation_key, messages }))
}

/// Closes the caller's open conversation view, discarding any in-flight
/// fetch for it.
pub async fn close_thread(user: SessionUser) -> Result<impl IntoResponse> {
    user.session.close_thread().await;
    Ok(StatusCode::NO_CONTENT)
}

/// Replies into a conversation; the counterpart is resolved from the
/// thread's own messages.
pub async fn reply(
    user: SessionUser,
    Path(conversation_key): Path<Uuid>,
    Json(req): Json<ReplyRequest>,
) -> Result<impl IntoResponse> {
    let sent = user.session.reply(conversation_key, &req.body).await?;
    Ok((StatusCode::CREATED, Json(sent)))
}

/// First-contact send: the recipient is named explicitly (the listing
/// owner), unlike a reply.
pub async fn send_message(
    user: SessionUser,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let sent: Message =
        user.session.controller().send(req.conversation_key, req.to_user, &req.body).await?;
    Ok((StatusCode::CREATED, Json(sent)))
}

/// Explicit read acknowledgement without opening the conversation.
pub async fn mark_read(
    user: SessionUser,
    Path(conversation_key): Path<Uuid>,
) -> Result<Json<MarkReadResponse>> {
    let updated = user.session.controller().mark_thread_read(conversation_key).await?;
    Ok(Json(MarkReadResponse { updated }))
}

pub async fn delete_message(user: SessionUser, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    user.session.controller().delete_message(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_thread(
    user: SessionUser,
    Path(conversation_key): Path<Uuid>,
) -> Result<Json<DeleteThreadResponse>> {
    let deleted = user.session.delete_thread(conversation_key).await?;
    Ok(Json(DeleteThreadResponse { deleted }))
}
