//! Cross-tab propagation: two tabs of one profile, each with its own
//! engine, transport and `CrossTabSync`.

use jobdesk_link::{
    ConnectionState, CredentialStore, CrossTabSync, ProfileStorage, RealtimeEngine, SignalBus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

mod common;

use common::{credential, init_logger, test_timeouts, wait_until, FakeApi, MockTransport};

struct Tab {
    engine: Arc<RealtimeEngine>,
    transport: MockTransport,
    credentials: CredentialStore,
    sync: Option<CrossTabSync>,
}

impl Tab {
    fn open(profile: &ProfileStorage) -> Self {
        let storage = profile.open_tab();
        let transport = MockTransport::new();
        let engine = Arc::new(
            RealtimeEngine::builder()
                .api(Arc::new(FakeApi::new()))
                .transport(Arc::new(transport.clone()))
                .storage(storage.clone())
                .timeouts(test_timeouts())
                .build()
                .unwrap(),
        );
        let credentials = CredentialStore::new(storage, SignalBus::new());
        let sync = CrossTabSync::spawn(Arc::clone(&engine), credentials.clone());
        Self {
            engine,
            transport,
            credentials,
            sync: Some(sync),
        }
    }

    fn is_connected(&self) -> bool {
        self.engine.connection_state().is_connected()
    }

    fn active_for(&self, user: &str) -> bool {
        self.is_connected() && self.engine.credential() == Some(credential(user))
    }

    fn logged_out(&self) -> bool {
        self.engine.credential().is_none()
            && self.engine.connection_state() == ConnectionState::Disconnected
    }
}

#[tokio::test]
async fn test_login_in_one_tab_connects_both() {
    init_logger();
    let profile = ProfileStorage::in_memory();
    let a = Tab::open(&profile);
    let b = Tab::open(&profile);

    a.credentials.save(&credential("42")).unwrap();

    // Tab A reacts to the in-process signal, tab B to the storage change
    assert!(wait_until(|| a.active_for("42") && b.active_for("42")).await);
    assert!(wait_until(|| !a.transport.subscribes().is_empty()).await);
    assert!(wait_until(|| !b.transport.subscribes().is_empty()).await);
    assert_eq!(a.transport.opens(), 1);
    assert_eq!(b.transport.opens(), 1);
}

#[tokio::test]
async fn test_logout_in_other_tab_disconnects() {
    init_logger();
    let profile = ProfileStorage::in_memory();
    let a = Tab::open(&profile);
    let b = Tab::open(&profile);

    a.credentials.save(&credential("42")).unwrap();
    assert!(wait_until(|| a.active_for("42") && b.active_for("42")).await);

    b.credentials.clear().unwrap();
    assert!(wait_until(|| a.logged_out() && b.logged_out()).await);
    assert!(wait_until(|| a.transport.live() == 0 && b.transport.live() == 0).await);
    assert_eq!(a.engine.counter().get(), 0);
}

#[tokio::test]
async fn test_feed_changes_rehydrate_other_tabs() {
    init_logger();
    let profile = ProfileStorage::in_memory();
    let a = Tab::open(&profile);
    let b = Tab::open(&profile);

    a.credentials.save(&credential("42")).unwrap();
    assert!(wait_until(|| !a.transport.subscribes().is_empty()).await);

    a.transport.emit(
        "user.42",
        "notification.sent",
        json!({"id": 1, "title": "Shared"}),
    );
    assert!(wait_until(|| a.engine.notifications().len() == 1).await);
    assert!(wait_until(|| b.engine.notifications().len() == 1).await);
    assert_eq!(b.engine.notifications().snapshot()[0].title, "Shared");

    // Read state travels too
    a.engine.notifications().mark_all_as_read();
    assert!(wait_until(|| b.engine.notifications().derived_unread_count() == 0).await);
}

#[tokio::test]
async fn test_corrupt_credential_counts_as_logout() {
    init_logger();
    let profile = ProfileStorage::in_memory();
    let a = Tab::open(&profile);
    let writer = profile.open_tab();

    a.credentials.save(&credential("42")).unwrap();
    assert!(wait_until(|| a.active_for("42")).await);

    writer.set("auth_token", "{\"token\":").unwrap();
    assert!(wait_until(|| a.logged_out()).await);
}

#[tokio::test]
async fn test_credential_switch_in_other_tab() {
    init_logger();
    let profile = ProfileStorage::in_memory();
    let a = Tab::open(&profile);
    let b = Tab::open(&profile);

    a.credentials.save(&credential("1")).unwrap();
    assert!(wait_until(|| b.engine.credential() == Some(credential("1"))).await);

    a.credentials.save(&credential("2")).unwrap();
    assert!(wait_until(|| b.active_for("2")).await);
    assert!(wait_until(|| b.transport.live() == 1).await);
    assert_eq!(b.transport.max_live(), 1);
    assert_eq!(b.transport.opened_for().last(), Some(&credential("2")));
}

#[tokio::test]
async fn test_unrelated_keys_are_ignored() {
    init_logger();
    let profile = ProfileStorage::in_memory();
    let a = Tab::open(&profile);
    let writer = profile.open_tab();

    writer.set("theme", "dark").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.transport.opens(), 0);
    assert!(a.engine.credential().is_none());
}

#[tokio::test]
async fn test_stopped_sync_no_longer_reacts() {
    init_logger();
    let profile = ProfileStorage::in_memory();
    let a = Tab::open(&profile);
    let mut b = Tab::open(&profile);

    if let Some(sync) = b.sync.take() {
        sync.stop();
    }

    a.credentials.save(&credential("42")).unwrap();
    assert!(wait_until(|| a.active_for("42")).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b.engine.credential().is_none());
    assert_eq!(b.transport.opens(), 0);
}

#[tokio::test]
async fn test_dropped_sync_no_longer_reacts() {
    init_logger();
    let profile = ProfileStorage::in_memory();
    let a = Tab::open(&profile);
    let mut b = Tab::open(&profile);

    drop(b.sync.take());

    a.credentials.save(&credential("42")).unwrap();
    assert!(wait_until(|| a.active_for("42")).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b.engine.credential().is_none());
    assert_eq!(b.transport.opens(), 0);
}
