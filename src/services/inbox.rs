use crate::domain::{Message, NewMessage, ThreadSummary};
use crate::error::{AppError, Result};
use crate::services::aggregator::aggregate;
use crate::store::MessageStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Canonical in-memory inbox state for one user session.
///
/// All mutation paths (full refresh, realtime insert, optimistic send,
/// read-mark, delete) funnel through one write lock and recompute the
/// derived thread list before releasing it, so a reader never observes raw
/// messages and threads out of step. Unread state is always derived from
/// the `read_at` field of each cached message, never from a cached flag.
#[derive(Debug)]
pub struct InboxController {
    me: Uuid,
    my_label: Option<String>,
    store: Arc<dyn MessageStore>,
    fetch_limit: i64,
    state: RwLock<InboxState>,
    refresh_in_flight: AtomicBool,
    refresh_queued: AtomicBool,
}

#[derive(Debug, Default)]
struct InboxState {
    raw: HashMap<Uuid, Message>,
    /// Optimistic sends awaiting store confirmation, keyed by the
    /// provisional id. Survive a concurrent refresh's replace pass.
    pending: HashSet<Uuid>,
    threads: Vec<ThreadSummary>,
}

impl InboxState {
    fn recompute(&mut self, me: Uuid, my_label: Option<&str>) {
        self.threads = aggregate(self.raw.values(), me, my_label);
    }
}

impl InboxController {
    #[must_use]
    pub fn new(me: Uuid, my_label: Option<String>, store: Arc<dyn MessageStore>, fetch_limit: i64) -> Self {
        Self {
            me,
            my_label,
            store,
            fetch_limit,
            state: RwLock::new(InboxState::default()),
            refresh_in_flight: AtomicBool::new(false),
            refresh_queued: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn me(&self) -> Uuid {
        self.me
    }

    /// Current thread list snapshot.
    pub async fn threads(&self) -> Vec<ThreadSummary> {
        self.state.read().await.threads.clone()
    }

    /// Full fetch of the most recent messages involving `me`, replacing the
    /// cache. Single-flight: a refresh requested while one is running is
    /// queued and executed afterwards rather than racing or being dropped.
    /// The replace pass keeps cached entries that arrived while the fetch
    /// was in the air (realtime inserts, optimistic sends), so a slow
    /// refresh cannot erase a newer insert.
    #[tracing::instrument(err(level = "warn"), skip(self), fields(user_id = %self.me))]
    pub async fn refresh(&self) -> Result<()> {
        if self.refresh_in_flight.swap(true, Ordering::SeqCst) {
            self.refresh_queued.store(true, Ordering::SeqCst);
            return Ok(());
        }

        let result = loop {
            let outcome = self.refresh_once().await;
            if outcome.is_err() || !self.refresh_queued.swap(false, Ordering::SeqCst) {
                break outcome;
            }
        };

        self.refresh_in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn refresh_once(&self) -> Result<()> {
        let fetch_started = OffsetDateTime::now_utc();
        let fetched = self.store.list_for_user(self.me, self.fetch_limit).await?;

        let mut state = self.state.write().await;
        let state = &mut *state;
        let mut raw: HashMap<Uuid, Message> = fetched.into_iter().map(|m| (m.id, m)).collect();

        for (id, message) in state.raw.drain() {
            if raw.contains_key(&id) {
                continue;
            }
            // Keep what the fetch could not have seen yet; everything else
            // absent from the store result is gone (deleted remotely).
            if state.pending.contains(&id) || message.created_at >= fetch_started {
                raw.insert(id, message);
            }
        }

        state.raw = raw;
        state.pending.retain(|id| state.raw.contains_key(id));
        state.recompute(self.me, self.my_label.as_deref());
        tracing::debug!(cached = state.raw.len(), threads = state.threads.len(), "Inbox refreshed");
        Ok(())
    }

    /// Merges one realtime insert. Idempotent by id; events not involving
    /// `me` are ignored (the subscription filter is not trusted).
    pub async fn apply_insert(&self, message: Message) {
        if !message.involves(self.me) {
            return;
        }

        let mut state = self.state.write().await;
        if state.raw.contains_key(&message.id) {
            return;
        }
        state.raw.insert(message.id, message);
        state.recompute(self.me, self.my_label.as_deref());
    }

    /// Optimistic send: the message appears in the local state immediately
    /// under a provisional id, then is replaced by the store-assigned row on
    /// success or rolled back on failure.
    #[tracing::instrument(err(level = "warn"), skip(self, body), fields(user_id = %self.me, conversation_key = %conversation_key))]
    pub async fn send(&self, conversation_key: Uuid, to_user: Uuid, body: &str) -> Result<Message> {
        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::Validation("message body must not be empty".to_string()));
        }

        let provisional = Message {
            id: Uuid::new_v4(),
            created_at: OffsetDateTime::now_utc(),
            conversation_key,
            from_user: Some(self.me),
            to_user: Some(to_user),
            from_label: self.my_label.clone(),
            body: body.to_string(),
            read_at: None,
        };
        let provisional_id = provisional.id;

        {
            let mut state = self.state.write().await;
            state.raw.insert(provisional_id, provisional);
            state.pending.insert(provisional_id);
            state.recompute(self.me, self.my_label.as_deref());
        }

        let new = NewMessage {
            conversation_key,
            from_user: self.me,
            to_user,
            from_label: self.my_label.clone(),
            body: body.to_string(),
        };

        match self.store.insert(new).await {
            Ok(stored) => {
                let mut state = self.state.write().await;
                state.raw.remove(&provisional_id);
                state.pending.remove(&provisional_id);
                state.raw.insert(stored.id, stored.clone());
                state.recompute(self.me, self.my_label.as_deref());
                Ok(stored)
            }
            Err(e) => {
                let mut state = self.state.write().await;
                state.raw.remove(&provisional_id);
                state.pending.remove(&provisional_id);
                state.recompute(self.me, self.my_label.as_deref());
                Err(e)
            }
        }
    }

    /// Marks every cached unread message to `me` in the conversation as
    /// read, then issues the matching store update. The local mark is
    /// optimistic; a store failure reverts exactly the entries this call
    /// touched, so an insert that raced in between keeps its own state.
    #[tracing::instrument(err(level = "warn"), skip(self), fields(user_id = %self.me, conversation_key = %conversation_key))]
    pub async fn mark_thread_read(&self, conversation_key: Uuid) -> Result<u64> {
        let read_at = OffsetDateTime::now_utc();

        let marked: Vec<Uuid> = {
            let mut state = self.state.write().await;
            let marked: Vec<Uuid> = state
                .raw
                .values_mut()
                .filter(|m| m.conversation_key == conversation_key && m.is_unread_for(self.me))
                .map(|m| {
                    m.read_at = Some(read_at);
                    m.id
                })
                .collect();
            state.recompute(self.me, self.my_label.as_deref());
            marked
        };

        match self.store.mark_read(self.me, conversation_key, read_at).await {
            Ok(affected) => Ok(affected),
            Err(e) => {
                let mut state = self.state.write().await;
                for id in &marked {
                    if let Some(m) = state.raw.get_mut(id) {
                        m.read_at = None;
                    }
                }
                state.recompute(self.me, self.my_label.as_deref());
                Err(e)
            }
        }
    }

    /// Removes one message locally, then issues the store delete. Zero
    /// affected rows for a message we held locally means the store refused
    /// the delete; the removal is rolled back (the store still holds the
    /// row) and the refusal is surfaced as `PermissionDenied`. A failed
    /// store call rolls back the same way.
    #[tracing::instrument(err(level = "warn"), skip(self), fields(user_id = %self.me, message_id = %id))]
    pub async fn delete_message(&self, id: Uuid) -> Result<()> {
        let removed = {
            let mut state = self.state.write().await;
            let state = &mut *state;
            let removed = state.raw.remove(&id).map(|m| (m, state.pending.remove(&id)));
            if removed.is_some() {
                state.recompute(self.me, self.my_label.as_deref());
            }
            removed
        };

        match self.store.delete_message(self.me, id).await {
            Ok(0) => {
                let existed_locally = removed.is_some();
                self.restore(removed).await;
                Err(if existed_locally { AppError::PermissionDenied } else { AppError::NotFound })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                self.restore(removed).await;
                Err(e)
            }
        }
    }

    /// Removes a whole conversation locally, then issues the store delete
    /// with the same participant scope. Rolls the removal back when the
    /// store refuses or fails, like `delete_message`.
    #[tracing::instrument(err(level = "warn"), skip(self), fields(user_id = %self.me, conversation_key = %conversation_key))]
    pub async fn delete_thread(&self, conversation_key: Uuid) -> Result<u64> {
        let removed: Vec<(Message, bool)> = {
            let mut state = self.state.write().await;
            let state = &mut *state;
            let doomed: Vec<Uuid> = state
                .raw
                .values()
                .filter(|m| m.conversation_key == conversation_key)
                .map(|m| m.id)
                .collect();
            let removed: Vec<(Message, bool)> = doomed
                .into_iter()
                .filter_map(|id| state.raw.remove(&id).map(|m| (m, state.pending.remove(&id))))
                .collect();
            if !removed.is_empty() {
                state.recompute(self.me, self.my_label.as_deref());
            }
            removed
        };

        match self.store.delete_thread(self.me, conversation_key).await {
            Ok(0) => {
                let existed_locally = !removed.is_empty();
                self.restore(removed).await;
                Err(if existed_locally { AppError::PermissionDenied } else { AppError::NotFound })
            }
            Ok(affected) => Ok(affected),
            Err(e) => {
                self.restore(removed).await;
                Err(e)
            }
        }
    }

    /// Puts rows a failed delete removed back into the cache, pending flag
    /// included.
    async fn restore(&self, rows: impl IntoIterator<Item = (Message, bool)>) {
        let mut state = self.state.write().await;
        let mut changed = false;
        for (message, was_pending) in rows {
            if was_pending {
                state.pending.insert(message.id);
            }
            state.raw.insert(message.id, message);
            changed = true;
        }
        if changed {
            state.recompute(self.me, self.my_label.as_deref());
        }
    }

    /// Fetches one conversation ascending. Kept out of the inbox cache: the
    /// thread view owns its own message list, like the inbox owns the
    /// summaries.
    pub async fn load_thread(&self, conversation_key: Uuid) -> Result<Vec<Message>> {
        self.store.list_thread(self.me, conversation_key).await
    }
}
