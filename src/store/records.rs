use crate::domain::Message;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageRecord {
    pub(crate) id: Uuid,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) conversation_key: Uuid,
    pub(crate) from_user: Option<Uuid>,
    pub(crate) to_user: Option<Uuid>,
    pub(crate) from_label: Option<String>,
    pub(crate) body: String,
    pub(crate) read_at: Option<OffsetDateTime>,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            conversation_key: record.conversation_key,
            from_user: record.from_user,
            to_user: record.to_user,
            from_label: record.from_label,
            body: record.body,
            read_at: record.read_at,
        }
    }
}
