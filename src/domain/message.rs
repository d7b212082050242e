use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A single message row. Immutable once created, except for the one-time
/// `read_at` transition performed by the recipient.
///
/// `from_user` and `to_user` are nullable: legacy rows exist without a
/// participant id recorded, and nothing in the store prevents a row where
/// both sides are the same user. Consumers must handle both cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Identifier of the listing the conversation is about.
    pub conversation_key: Uuid,
    pub from_user: Option<Uuid>,
    pub to_user: Option<Uuid>,
    /// Display label of the sender, captured at send time.
    pub from_label: Option<String>,
    pub body: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
}

impl Message {
    #[must_use]
    pub fn involves(&self, user: Uuid) -> bool {
        self.from_user == Some(user) || self.to_user == Some(user)
    }

    #[must_use]
    pub fn is_unread_for(&self, user: Uuid) -> bool {
        self.to_user == Some(user) && self.read_at.is_none()
    }

    /// Returns the other participant's id relative to `me`, if one is
    /// recorded. A row where the other side is missing or is `me` itself
    /// yields `None`.
    #[must_use]
    pub fn counterpart_of(&self, me: Uuid) -> Option<Uuid> {
        if self.from_user == Some(me) {
            self.to_user.filter(|&other| other != me)
        } else if self.to_user == Some(me) {
            self.from_user.filter(|&other| other != me)
        } else {
            None
        }
    }
}

/// Payload for a message insert. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_key: Uuid,
    pub from_user: Uuid,
    pub to_user: Uuid,
    pub from_label: Option<String>,
    pub body: String,
}
