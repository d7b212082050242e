#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tradepost::config::Config;
use tradepost::services::{SessionRegistry, StoreHealthGuard};
use tradepost::store::MessageStore;
use tradepost::store::postgres::PgStore;
use tradepost::workers::{InboxRefreshWorker, SessionGcWorker};
use tradepost::{api, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    telemetry::init_telemetry(&config.telemetry);

    // Infrastructure
    let pool = tradepost::store::init_pool(&config.database_url).await?;
    tradepost::run_migrations(&pool).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tradepost::spawn_signal_handler(shutdown_tx.clone());

    // Component wiring
    let store: Arc<dyn MessageStore> = PgStore::new(pool, &config.inbox, shutdown_rx.clone());
    let registry = SessionRegistry::new(Arc::clone(&store), config.inbox.clone());
    let guard = Arc::new(StoreHealthGuard::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Duration::from_secs(config.inbox.store_timeout_secs),
    ));
    guard.ensure_healthy().await;

    let refresh_worker = InboxRefreshWorker::new(Arc::clone(&registry), Arc::clone(&guard), config.inbox.clone());
    let gc_worker = SessionGcWorker::new(Arc::clone(&registry), config.inbox.clone());
    let worker_tasks = vec![
        tokio::spawn(refresh_worker.run(shutdown_rx.clone())),
        tokio::spawn(gc_worker.run(shutdown_rx.clone())),
    ];

    // Runtime
    let app = api::app_router(config.clone(), Arc::clone(&registry), Arc::clone(&store));
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "listening");

    let mut serve_rx = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = serve_rx.wait_for(|&s| s).await;
    });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "Server error");
    }

    // Graceful shutdown
    let _ = shutdown_tx.send(true);
    registry.shutdown_all();
    tokio::select! {
        () = async {
            futures::future::join_all(worker_tasks).await;
        } => {
            tracing::info!("Background tasks finished.");
        }
        () = tokio::time::sleep(Duration::from_secs(config.server.shutdown_timeout_secs)) => {
            tracing::warn!("Timeout waiting for background tasks to finish.");
        }
    }

    Ok(())
}
