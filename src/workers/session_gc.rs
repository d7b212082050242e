use crate::config::InboxConfig;
use crate::services::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Tears down sessions that have been idle past the configured TTL, so an
/// abandoned login does not hold a subscription and cache forever.
#[derive(Debug)]
pub struct SessionGcWorker {
    registry: Arc<SessionRegistry>,
    config: InboxConfig,
}

impl SessionGcWorker {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, config: InboxConfig) -> Self {
        Self { registry, config }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.session_gc_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep().instrument(tracing::debug_span!("session_gc_iteration")).await;
                }
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("Session GC loop shutting down...");
    }

    async fn sweep(&self) {
        let idle_limit = i64::try_from(self.config.session_idle_secs).unwrap_or(i64::MAX);
        let mut reclaimed = 0u64;

        for (user, session) in self.registry.live_sessions() {
            if session.idle_secs() > idle_limit && self.registry.logout(user) {
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            tracing::info!(count = %reclaimed, "Reclaimed idle sessions");
        }
    }
}
