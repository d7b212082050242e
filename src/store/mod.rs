use crate::domain::{Message, NewMessage};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod records;

pub type DbPool = Pool<Postgres>;

/// Initializes the database connection pool.
///
/// # Errors
/// Returns `sqlx::Error` if the connection fails.
pub async fn init_pool(database_url: &str) -> std::result::Result<DbPool, sqlx::Error> {
    PgPoolOptions::new().max_connections(20).connect(database_url).await
}

/// The remote append-only message store.
///
/// `subscribe` delivers inserts addressed to a user at least once, with no
/// ordering guarantee relative to `list_for_user`. Mutating calls return the
/// number of affected rows so callers can distinguish a store-side rejection
/// (zero rows despite a local match) from a genuine success.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// All messages involving `user` as sender or recipient, newest first,
    /// bounded by `limit`.
    async fn list_for_user(&self, user: Uuid, limit: i64) -> Result<Vec<Message>>;

    /// One conversation involving `user`, oldest first.
    async fn list_thread(&self, user: Uuid, conversation_key: Uuid) -> Result<Vec<Message>>;

    /// Inserts a message; the store assigns `id` and `created_at`.
    async fn insert(&self, new: NewMessage) -> Result<Message>;

    /// Sets `read_at` on every unread message in the conversation addressed
    /// to `user`. Returns the number of rows updated.
    async fn mark_read(&self, user: Uuid, conversation_key: Uuid, read_at: OffsetDateTime) -> Result<u64>;

    /// Deletes one message, scoped to conversations `user` participates in.
    /// Returns the number of rows deleted.
    async fn delete_message(&self, user: Uuid, id: Uuid) -> Result<u64>;

    /// Deletes every message between `user` and anyone else under the
    /// conversation key. Returns the number of rows deleted.
    async fn delete_thread(&self, user: Uuid, conversation_key: Uuid) -> Result<u64>;

    /// Subscribes to inserts addressed to `user`.
    async fn subscribe(&self, user: Uuid) -> Result<broadcast::Receiver<Message>>;

    /// Cheap reachability check.
    async fn probe(&self) -> Result<()>;
}
