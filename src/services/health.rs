use crate::services::registry::SessionRegistry;
use crate::store::MessageStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Watchdog for a wedged store client. A probe that hangs past its timeout
/// triggers a recovery pass: every cached session is dropped and the store
/// is probed again. Recovery runs at most once per process lifetime so a
/// persistently broken store cannot put the service into a teardown loop.
#[derive(Debug)]
pub struct StoreHealthGuard {
    store: Arc<dyn MessageStore>,
    registry: Arc<SessionRegistry>,
    probe_timeout: Duration,
    checked: AtomicBool,
    recovered: AtomicBool,
}

impl StoreHealthGuard {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, registry: Arc<SessionRegistry>, probe_timeout: Duration) -> Self {
        Self {
            store,
            registry,
            probe_timeout,
            checked: AtomicBool::new(false),
            recovered: AtomicBool::new(false),
        }
    }

    /// One-shot boot check: probes the store under a timeout and recovers
    /// if it hangs or errors. Subsequent calls are no-ops.
    pub async fn ensure_healthy(&self) {
        if self.checked.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.probe().await {
            tracing::debug!("Store health check passed");
        } else {
            self.recover_once().await;
        }
    }

    /// Drops all sessions and re-probes. At most once per process; later
    /// calls are ignored.
    pub async fn recover_once(&self) {
        if self.recovered.swap(true, Ordering::SeqCst) {
            tracing::debug!("Store recovery already attempted this process; skipping");
            return;
        }

        tracing::warn!("Store unresponsive; dropping cached sessions and re-probing");
        self.registry.shutdown_all();

        if self.probe().await {
            tracing::info!("Store recovered after session reset");
        } else {
            tracing::error!("Store still unresponsive after recovery attempt");
        }
    }

    async fn probe(&self) -> bool {
        match tokio::time::timeout(self.probe_timeout, self.store.probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Store probe failed");
                false
            }
            Err(_) => {
                tracing::warn!("Store probe timed out");
                false
            }
        }
    }
}
