use crate::domain::{Message, ThreadSummary};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Opaque user identity from the external auth capability.
    pub user_id: Uuid,
    /// Display label captured at login (e.g. the user's email).
    pub label: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub threads: Vec<ThreadSummary>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Listing the conversation is about.
    pub conversation_key: Uuid,
    /// Recipient (the listing owner on first contact).
    pub to_user: Uuid,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub conversation_key: Uuid,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}

#[derive(Debug, Serialize)]
pub struct DeleteThreadResponse {
    pub deleted: u64,
}
