use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Once;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tradepost::api;
use tradepost::config::{Config, InboxConfig, LogFormat, ServerConfig, TelemetryConfig};
use tradepost::domain::{Message, NewMessage};
use tradepost::error::{AppError, Result};
use tradepost::services::SessionRegistry;
use tradepost::store::memory::MemoryStore;
use tradepost::store::MessageStore;
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("tradepost=debug".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap());

        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

#[allow(dead_code)]
pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        server: ServerConfig { host: "127.0.0.1".to_string(), port: 0, shutdown_timeout_secs: 1 },
        inbox: test_inbox_config(),
        telemetry: TelemetryConfig { log_format: LogFormat::Text },
    }
}

pub fn test_inbox_config() -> InboxConfig {
    InboxConfig {
        fetch_limit: 200,
        refresh_interval_secs: 30,
        store_timeout_secs: 3,
        channel_capacity: 16,
        session_idle_secs: 1800,
        session_gc_interval_secs: 60,
    }
}

/// Fully-formed row for seeding the in-memory store.
#[allow(dead_code, clippy::too_many_arguments)]
pub fn seeded_msg(
    id: u128,
    created_at: i64,
    conversation_key: Uuid,
    from: Option<Uuid>,
    to: Option<Uuid>,
    from_label: Option<&str>,
    body: &str,
    read_at: Option<i64>,
) -> Message {
    Message {
        id: Uuid::from_u128(id),
        created_at: OffsetDateTime::from_unix_timestamp(created_at).expect("valid timestamp"),
        conversation_key,
        from_user: from,
        to_user: to,
        from_label: from_label.map(str::to_string),
        body: body.to_string(),
        read_at: read_at.map(|t| OffsetDateTime::from_unix_timestamp(t).expect("valid timestamp")),
    }
}

/// Polls an async condition until it holds or the deadline passes.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if condition().await {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Store wrapper with injectable failures and delays, for exercising
/// rollback, recovery, and cancellation paths.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_inserts: AtomicBool,
    pub fail_updates: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub fail_probes: AtomicBool,
    /// Simulates a store-side authorization rejection: deletes succeed at
    /// the protocol level but affect zero rows.
    pub zero_deletes: AtomicBool,
    /// Delays, in milliseconds, for widening race windows.
    pub subscribe_delay_ms: AtomicU64,
    pub list_thread_delay_ms: AtomicU64,
}

impl FlakyStore {
    fn unavailable() -> AppError {
        AppError::StoreUnavailable("injected failure".to_string())
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn list_for_user(&self, user: Uuid, limit: i64) -> Result<Vec<Message>> {
        self.inner.list_for_user(user, limit).await
    }

    async fn list_thread(&self, user: Uuid, conversation_key: Uuid) -> Result<Vec<Message>> {
        let delay = self.list_thread_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.list_thread(user, conversation_key).await
    }

    async fn insert(&self, new: NewMessage) -> Result<Message> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.insert(new).await
    }

    async fn mark_read(&self, user: Uuid, conversation_key: Uuid, read_at: OffsetDateTime) -> Result<u64> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.mark_read(user, conversation_key, read_at).await
    }

    async fn delete_message(&self, user: Uuid, id: Uuid) -> Result<u64> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        if self.zero_deletes.load(Ordering::SeqCst) {
            return Ok(0);
        }
        self.inner.delete_message(user, id).await
    }

    async fn delete_thread(&self, user: Uuid, conversation_key: Uuid) -> Result<u64> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        if self.zero_deletes.load(Ordering::SeqCst) {
            return Ok(0);
        }
        self.inner.delete_thread(user, conversation_key).await
    }

    async fn subscribe(&self, user: Uuid) -> Result<broadcast::Receiver<Message>> {
        let delay = self.subscribe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.subscribe(user).await
    }

    async fn probe(&self) -> Result<()> {
        if self.fail_probes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.probe().await
    }
}

/// Full application spun up on an ephemeral port against the in-memory
/// store.
#[allow(dead_code)]
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<SessionRegistry>,
}

#[allow(dead_code)]
impl TestApp {
    pub async fn spawn() -> Self {
        setup_tracing();

        let store = Arc::new(MemoryStore::default());
        let dyn_store: Arc<dyn MessageStore> = Arc::clone(&store) as Arc<dyn MessageStore>;
        let registry = SessionRegistry::new(Arc::clone(&dyn_store), test_inbox_config());

        let app = api::app_router(test_config(), Arc::clone(&registry), dyn_store);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server");
        });

        Self { addr, client: reqwest::Client::new(), store, registry }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}
