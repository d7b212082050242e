use crate::config::InboxConfig;
use crate::domain::Message;
use crate::error::{AppError, Result};
use crate::services::inbox::InboxController;
use crate::services::thread::ThreadSession;
use crate::store::MessageStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use time::OffsetDateTime;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// One authenticated user's inbox session: the cached state, the single
/// live insert subscription, and the currently opened thread. Created at
/// login, torn down at logout; the cancellation token kills the
/// subscription consumer and invalidates in-flight thread fetches.
#[derive(Debug)]
pub struct UserSession {
    controller: Arc<InboxController>,
    active_thread: RwLock<Option<ThreadSession>>,
    /// Bumped on every open/close; a fetch whose epoch is stale by the time
    /// it completes is discarded instead of resurrecting a closed view.
    thread_epoch: AtomicU64,
    cancel: CancellationToken,
    last_seen_unix: AtomicI64,
}

impl UserSession {
    #[must_use]
    pub fn controller(&self) -> &Arc<InboxController> {
        &self.controller
    }

    pub(crate) fn touch(&self) {
        self.last_seen_unix.store(OffsetDateTime::now_utc().unix_timestamp(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn idle_secs(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp() - self.last_seen_unix.load(Ordering::Relaxed)
    }

    /// Opens a conversation: loads it ascending, acknowledges unread
    /// messages, and makes it the session's active thread unless a newer
    /// open or a close superseded this one while the fetch was in flight.
    pub async fn open_thread(&self, conversation_key: Uuid) -> Result<Vec<Message>> {
        self.touch();
        let epoch = self.thread_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let session = ThreadSession::open(Arc::clone(&self.controller), conversation_key).await?;
        let messages = session.messages().to_vec();

        if self.cancel.is_cancelled() {
            return Err(AppError::SessionClosed);
        }

        let mut slot = self.active_thread.write().await;
        if self.thread_epoch.load(Ordering::SeqCst) == epoch {
            *slot = Some(session);
        }
        Ok(messages)
    }

    /// Replies into a conversation, opening it first if it is not the
    /// active thread.
    pub async fn reply(&self, conversation_key: Uuid, body: &str) -> Result<Message> {
        self.touch();
        let mut slot = self.active_thread.write().await;

        let is_active = slot.as_ref().is_some_and(|t| t.conversation_key() == conversation_key);
        if !is_active {
            *slot = Some(ThreadSession::open(Arc::clone(&self.controller), conversation_key).await?);
        }

        match slot.as_mut() {
            Some(thread) => thread.reply(body).await,
            None => Err(AppError::Internal),
        }
    }

    /// Deletes a whole conversation; if it is the open thread, the view is
    /// closed with it.
    pub async fn delete_thread(&self, conversation_key: Uuid) -> Result<u64> {
        self.touch();
        let affected = self.controller.delete_thread(conversation_key).await?;

        let mut slot = self.active_thread.write().await;
        if slot.as_ref().is_some_and(|t| t.conversation_key() == conversation_key) {
            self.thread_epoch.fetch_add(1, Ordering::SeqCst);
            *slot = None;
        }
        Ok(affected)
    }

    pub async fn close_thread(&self) {
        self.thread_epoch.fetch_add(1, Ordering::SeqCst);
        *self.active_thread.write().await = None;
    }

    /// Conversation key of the currently open thread view, if any.
    pub async fn active_thread_key(&self) -> Option<Uuid> {
        self.active_thread.read().await.as_ref().map(ThreadSession::conversation_key)
    }

    pub(crate) fn shutdown(&self) {
        self.thread_epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

/// Owns every live `UserSession`. Exactly one session (and therefore one
/// insert subscription) per user id: logging in again replaces and tears
/// down the previous session first.
#[derive(Debug)]
pub struct SessionRegistry {
    store: Arc<dyn MessageStore>,
    sessions: DashMap<Uuid, Arc<UserSession>>,
    config: InboxConfig,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, config: InboxConfig) -> Arc<Self> {
        Arc::new(Self { store, sessions: DashMap::new(), config })
    }

    /// Creates a session for `user`: subscribes to their realtime inserts,
    /// spawns the sequential event consumer, and performs the initial full
    /// fetch. A fetch failure leaves an empty inbox behind a live
    /// subscription rather than failing the login; the periodic refresh
    /// retries it.
    #[tracing::instrument(err(level = "warn"), skip(self, label), fields(user_id = %user))]
    pub async fn login(&self, user: Uuid, label: Option<String>) -> Result<Arc<UserSession>> {
        if let Some((_, old)) = self.sessions.remove(&user) {
            tracing::debug!("Replacing existing session");
            old.shutdown();
        }

        let controller =
            Arc::new(InboxController::new(user, label, Arc::clone(&self.store), self.config.fetch_limit));
        let cancel = CancellationToken::new();
        let rx = self.store.subscribe(user).await?;

        spawn_realtime_consumer(user, rx, Arc::clone(&controller), cancel.clone());

        if let Err(e) = controller.refresh().await {
            tracing::warn!(error = %e, "Initial inbox fetch failed; starting empty");
        }

        let session = Arc::new(UserSession {
            controller,
            active_thread: RwLock::new(None),
            thread_epoch: AtomicU64::new(0),
            cancel,
            last_seen_unix: AtomicI64::new(OffsetDateTime::now_utc().unix_timestamp()),
        });
        // Two logins for the same user can race past the removal above;
        // whichever inserts last wins, and the displaced session must be
        // torn down or its consumer task leaks.
        if let Some(displaced) = self.sessions.insert(user, Arc::clone(&session)) {
            tracing::debug!("Concurrent login displaced another session");
            displaced.shutdown();
        }
        Ok(session)
    }

    #[must_use]
    pub fn get(&self, user: Uuid) -> Option<Arc<UserSession>> {
        let session = self.sessions.get(&user).map(|s| Arc::clone(&s));
        if let Some(session) = &session {
            session.touch();
        }
        session
    }

    /// Tears down the user's session. Returns whether one existed.
    pub fn logout(&self, user: Uuid) -> bool {
        self.sessions.remove(&user).inspect(|(_, session)| session.shutdown()).is_some()
    }

    #[must_use]
    pub fn live_sessions(&self) -> Vec<(Uuid, Arc<UserSession>)> {
        self.sessions.iter().map(|entry| (*entry.key(), Arc::clone(entry.value()))).collect()
    }

    /// Drops every session. Used by the health guard's one-time recovery
    /// and during shutdown.
    pub fn shutdown_all(&self) {
        let users: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for user in users {
            if let Some((_, session)) = self.sessions.remove(&user) {
                session.shutdown();
            }
        }
    }
}

/// Consumes the realtime insert stream one event at a time, which keeps
/// every state transition atomic without an extra lock. A lagged receiver
/// falls back to a full refresh since delivery is only at-least-once.
fn spawn_realtime_consumer(
    user: Uuid,
    mut rx: broadcast::Receiver<Message>,
    controller: Arc<InboxController>,
    cancel: CancellationToken,
) {
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    res = rx.recv() => match res {
                        Ok(message) => controller.apply_insert(message).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Realtime stream lagged; refreshing");
                            if let Err(e) = controller.refresh().await {
                                tracing::warn!(error = %e, "Catch-up refresh failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Realtime consumer stopped");
        }
        .instrument(tracing::debug_span!("realtime_consumer", user_id = %user)),
    );
}
