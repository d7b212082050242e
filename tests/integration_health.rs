mod common;

use common::{FlakyStore, test_inbox_config};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tradepost::services::{SessionRegistry, StoreHealthGuard};
use tradepost::store::MessageStore;
use uuid::Uuid;

fn u1() -> Uuid {
    Uuid::from_u128(1)
}

fn guarded(store: &Arc<FlakyStore>) -> (Arc<SessionRegistry>, StoreHealthGuard) {
    common::setup_tracing();
    let registry =
        SessionRegistry::new(Arc::clone(store) as Arc<dyn MessageStore>, test_inbox_config());
    let guard = StoreHealthGuard::new(
        Arc::clone(store) as Arc<dyn MessageStore>,
        Arc::clone(&registry),
        Duration::from_millis(200),
    );
    (registry, guard)
}

#[tokio::test]
async fn healthy_probe_leaves_sessions_alone() {
    let store = Arc::new(FlakyStore::default());
    let (registry, guard) = guarded(&store);
    registry.login(u1(), None).await.expect("login");

    guard.ensure_healthy().await;
    assert!(registry.get(u1()).is_some());
}

#[tokio::test]
async fn recovery_drops_sessions_at_most_once_per_process() {
    let store = Arc::new(FlakyStore::default());
    store.fail_probes.store(true, Ordering::SeqCst);
    let (registry, guard) = guarded(&store);
    registry.login(u1(), None).await.expect("login");

    guard.recover_once().await;
    assert!(registry.get(u1()).is_none(), "first recovery drops every session");

    registry.login(u1(), None).await.expect("re-login");
    guard.recover_once().await;
    assert!(registry.get(u1()).is_some(), "a second recovery must not run");
}

#[tokio::test]
async fn failing_boot_probe_spends_the_one_recovery() {
    let store = Arc::new(FlakyStore::default());
    store.fail_probes.store(true, Ordering::SeqCst);
    let (registry, guard) = guarded(&store);
    registry.login(u1(), None).await.expect("login");

    guard.ensure_healthy().await;
    assert!(registry.get(u1()).is_none(), "unhealthy boot probe recovers by dropping sessions");

    // Later failures find the one-shot recovery already spent.
    registry.login(u1(), None).await.expect("re-login");
    guard.recover_once().await;
    assert!(registry.get(u1()).is_some());
}
