use crate::config::InboxConfig;
use crate::services::health::StoreHealthGuard;
use crate::services::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Periodically re-fetches the inbox for every live session. The realtime
/// stream is only at-least-once, so this is the convergence backstop for
/// missed events, oversized notifications, and remote deletes.
#[derive(Debug)]
pub struct InboxRefreshWorker {
    registry: Arc<SessionRegistry>,
    guard: Arc<StoreHealthGuard>,
    config: InboxConfig,
}

impl InboxRefreshWorker {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, guard: Arc<StoreHealthGuard>, config: InboxConfig) -> Self {
        Self { registry, guard, config }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.refresh_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    self.refresh_all()
                        .instrument(tracing::debug_span!("inbox_refresh_iteration"))
                        .await;
                }
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("Inbox refresh loop shutting down...");
    }

    async fn refresh_all(&self) {
        let sessions = self.registry.live_sessions();
        if sessions.is_empty() {
            return;
        }

        let mut failures = 0usize;
        for (user, session) in &sessions {
            if let Err(e) = session.controller().refresh().await {
                failures += 1;
                tracing::warn!(error = %e, user_id = %user, "Periodic inbox refresh failed");
            }
        }

        // Every session failing at once points at the store itself, not at
        // any one inbox; hand it to the one-shot recovery.
        if failures == sessions.len() {
            self.guard.recover_once().await;
        }
    }
}
