use crate::domain::{Message, NewMessage};
use crate::error::Result;
use crate::store::MessageStore;
use async_trait::async_trait;
use dashmap::DashMap;
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

/// In-process message store with the same observable semantics as the
/// Postgres implementation: store-assigned ids, per-row monotonic
/// timestamps, participant-scoped deletes, and at-least-once realtime
/// delivery to the recipient's channel. Used by the integration tests and
/// for local development without a database.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    channels: DashMap<Uuid, broadcast::Sender<Message>>,
    channel_capacity: usize,
}

#[derive(Debug)]
struct Inner {
    rows: Vec<Message>,
    last_created_at: OffsetDateTime,
}

impl MemoryStore {
    #[must_use]
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { rows: Vec::new(), last_created_at: OffsetDateTime::UNIX_EPOCH }),
            channels: DashMap::new(),
            channel_capacity,
        }
    }

    /// Inserts fully-formed rows, bypassing id and timestamp assignment.
    /// Lets fixtures reproduce legacy rows (missing participant ids) and
    /// exact timestamps.
    pub async fn seed(&self, rows: impl IntoIterator<Item = Message>) {
        let mut inner = self.inner.lock().await;
        for row in rows {
            inner.last_created_at = inner.last_created_at.max(row.created_at);
            inner.rows.push(row);
        }
    }

    /// Number of rows currently held. Test observability helper.
    pub async fn row_count(&self) -> usize {
        self.inner.lock().await.rows.len()
    }

    /// Number of live receivers on `user`'s insert channel. Test
    /// observability helper.
    #[must_use]
    pub fn subscriber_count(&self, user: Uuid) -> usize {
        self.channels.get(&user).map_or(0, |tx| tx.receiver_count())
    }

    fn notify(&self, message: &Message) {
        let Some(recipient) = message.to_user else {
            return;
        };
        let stale = self
            .channels
            .get(&recipient)
            .is_some_and(|tx| tx.send(message.clone()).is_err());
        if stale {
            self.channels.remove(&recipient);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn list_for_user(&self, user: Uuid, limit: i64) -> Result<Vec<Message>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Message> = inner.rows.iter().filter(|m| m.involves(user)).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(rows)
    }

    async fn list_thread(&self, user: Uuid, conversation_key: Uuid) -> Result<Vec<Message>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Message> = inner
            .rows
            .iter()
            .filter(|m| m.conversation_key == conversation_key && m.involves(user))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn insert(&self, new: NewMessage) -> Result<Message> {
        let message = {
            let mut inner = self.inner.lock().await;
            // Timestamps are monotonic per row, mirroring the store's
            // assignment; ties across writers are still possible and are
            // resolved downstream by the id tie-break.
            let now = OffsetDateTime::now_utc().max(inner.last_created_at + Duration::microseconds(1));
            inner.last_created_at = now;

            let message = Message {
                id: Uuid::new_v4(),
                created_at: now,
                conversation_key: new.conversation_key,
                from_user: Some(new.from_user),
                to_user: Some(new.to_user),
                from_label: new.from_label,
                body: new.body,
                read_at: None,
            };
            inner.rows.push(message.clone());
            message
        };

        self.notify(&message);
        Ok(message)
    }

    async fn mark_read(&self, user: Uuid, conversation_key: Uuid, read_at: OffsetDateTime) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut affected = 0;
        for row in &mut inner.rows {
            if row.conversation_key == conversation_key && row.to_user == Some(user) && row.read_at.is_none() {
                row.read_at = Some(read_at);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete_message(&self, user: Uuid, id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.rows.len();
        inner.rows.retain(|m| !(m.id == id && m.involves(user)));
        Ok((before - inner.rows.len()) as u64)
    }

    async fn delete_thread(&self, user: Uuid, conversation_key: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.rows.len();
        inner.rows.retain(|m| !(m.conversation_key == conversation_key && m.involves(user)));
        Ok((before - inner.rows.len()) as u64)
    }

    async fn subscribe(&self, user: Uuid) -> Result<broadcast::Receiver<Message>> {
        let tx = self
            .channels
            .entry(user)
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0);
        Ok(tx.subscribe())
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}
