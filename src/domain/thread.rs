use crate::domain::message::Message;
use serde::Serialize;
use uuid::Uuid;

/// Derived per-viewer summary of one conversation: the latest message under
/// a conversation key, unread state, and the counterpart's display label.
/// Never stored; recomputed from the raw message set after every mutation.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub conversation_key: Uuid,
    pub latest: Message,
    pub has_unread: bool,
    pub counterpart_label: String,
}
