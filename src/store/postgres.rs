use crate::config::InboxConfig;
use crate::domain::{Message, NewMessage};
use crate::error::{AppError, Result};
use crate::store::records::MessageRecord;
use crate::store::{DbPool, MessageStore};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use dashmap::DashMap;
use sqlx::postgres::PgListener;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use tracing::Instrument;
use uuid::Uuid;

const NOTIFY_CHANNEL: &str = "tradepost_message_insert";

/// Postgres-backed message store.
///
/// Realtime delivery rides the `pg_notify` trigger installed by the
/// migrations: a single listener task decodes each payload and fans it out
/// to the per-user broadcast channel of the recipient.
#[derive(Debug)]
pub struct PgStore {
    pool: DbPool,
    channels: Arc<DashMap<Uuid, broadcast::Sender<Message>>>,
    channel_capacity: usize,
    call_timeout: Duration,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: DbPool, config: &InboxConfig, shutdown: watch::Receiver<bool>) -> Arc<Self> {
        let channels = Arc::new(DashMap::new());

        let store = Arc::new(Self {
            pool: pool.clone(),
            channels: Arc::clone(&channels),
            channel_capacity: config.channel_capacity,
            call_timeout: Duration::from_secs(config.store_timeout_secs),
        });

        tokio::spawn(
            run_insert_listener(pool, channels, shutdown).instrument(tracing::info_span!("insert_listener")),
        );

        store
    }

    /// Bounds a store call by the configured timeout. An elapsed timeout is
    /// reported as `StoreUnavailable`, never as a hang.
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(res) => res.map_err(AppError::from),
            Err(_) => Err(AppError::StoreUnavailable("store call timed out".to_string())),
        }
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn list_for_user(&self, user: Uuid, limit: i64) -> Result<Vec<Message>> {
        let records = self
            .bounded(
                sqlx::query_as::<_, MessageRecord>(
                    r"
                    SELECT id, created_at, conversation_key, from_user, to_user, from_label, body, read_at
                    FROM messages
                    WHERE from_user = $1 OR to_user = $1
                    ORDER BY created_at DESC, id ASC
                    LIMIT $2
                    ",
                )
                .bind(user)
                .bind(limit)
                .fetch_all(&self.pool),
            )
            .await?;

        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn list_thread(&self, user: Uuid, conversation_key: Uuid) -> Result<Vec<Message>> {
        let records = self
            .bounded(
                sqlx::query_as::<_, MessageRecord>(
                    r"
                    SELECT id, created_at, conversation_key, from_user, to_user, from_label, body, read_at
                    FROM messages
                    WHERE conversation_key = $1 AND (from_user = $2 OR to_user = $2)
                    ORDER BY created_at ASC, id ASC
                    ",
                )
                .bind(conversation_key)
                .bind(user)
                .fetch_all(&self.pool),
            )
            .await?;

        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn insert(&self, new: NewMessage) -> Result<Message> {
        let record = self
            .bounded(
                sqlx::query_as::<_, MessageRecord>(
                    r"
                    INSERT INTO messages (conversation_key, from_user, to_user, from_label, body)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING id, created_at, conversation_key, from_user, to_user, from_label, body, read_at
                    ",
                )
                .bind(new.conversation_key)
                .bind(new.from_user)
                .bind(new.to_user)
                .bind(new.from_label)
                .bind(new.body)
                .fetch_one(&self.pool),
            )
            .await?;

        Ok(Message::from(record))
    }

    async fn mark_read(&self, user: Uuid, conversation_key: Uuid, read_at: OffsetDateTime) -> Result<u64> {
        let result = self
            .bounded(
                sqlx::query(
                    r"
                    UPDATE messages
                    SET read_at = $3
                    WHERE conversation_key = $1 AND to_user = $2 AND read_at IS NULL
                    ",
                )
                .bind(conversation_key)
                .bind(user)
                .bind(read_at)
                .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_message(&self, user: Uuid, id: Uuid) -> Result<u64> {
        let result = self
            .bounded(
                sqlx::query("DELETE FROM messages WHERE id = $1 AND (from_user = $2 OR to_user = $2)")
                    .bind(id)
                    .bind(user)
                    .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_thread(&self, user: Uuid, conversation_key: Uuid) -> Result<u64> {
        let result = self
            .bounded(
                sqlx::query(
                    "DELETE FROM messages WHERE conversation_key = $1 AND (from_user = $2 OR to_user = $2)",
                )
                .bind(conversation_key)
                .bind(user)
                .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected())
    }

    async fn subscribe(&self, user: Uuid) -> Result<broadcast::Receiver<Message>> {
        let tx = self
            .channels
            .entry(user)
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0);
        Ok(tx.subscribe())
    }

    async fn probe(&self) -> Result<()> {
        self.bounded(sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool)).await?;
        Ok(())
    }
}

/// Consumes the NOTIFY channel and routes each decoded row to its
/// recipient's broadcast channel. Reconnects with exponential backoff when
/// the listener connection drops.
async fn run_insert_listener(
    pool: DbPool,
    channels: Arc<DashMap<Uuid, broadcast::Sender<Message>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let retry_strategy = ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(30));

    while !*shutdown.borrow() {
        let connect = (|| async {
            let mut listener = PgListener::connect_with(&pool).await?;
            listener.listen(NOTIFY_CHANNEL).await?;
            Ok::<PgListener, sqlx::Error>(listener)
        })
        .retry(&retry_strategy)
        .when(|e| {
            tracing::warn!(error = %e, "Failed to attach insert listener, retrying...");
            true
        });

        let mut listener = tokio::select! {
            _ = shutdown.changed() => return,
            res = connect => match res {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(error = %e, "Insert listener could not connect, backing off");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            },
        };

        tracing::info!(channel = NOTIFY_CHANNEL, "Insert listener attached");

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                res = listener.recv() => match res {
                    Ok(notification) => route_insert(&channels, notification.payload()),
                    Err(e) => {
                        tracing::warn!(error = %e, "Insert listener connection lost, reconnecting");
                        break;
                    }
                },
            }
        }
    }

    tracing::info!("Insert listener shutting down...");
}

fn route_insert(channels: &DashMap<Uuid, broadcast::Sender<Message>>, payload: &str) {
    let message: Message = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding undecodable insert notification");
            return;
        }
    };

    let Some(recipient) = message.to_user else {
        return;
    };

    let stale = channels.get(&recipient).is_some_and(|tx| tx.send(message).is_err());
    if stale {
        // Every receiver is gone; drop the channel so it can be recreated.
        channels.remove(&recipient);
    }
}
