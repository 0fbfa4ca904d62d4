//! Multiplexing of many listeners over one physical channel subscription.

use jobdesk_link::{
    subscription::ChannelStatus, ConnectionManager, ConnectionOptions, ConnectionState,
    EventHandlers, PushEvent,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

mod common;

use common::{credential, init_logger, test_timeouts, wait_for_state, wait_until, within, MockTransport};

async fn connected_manager(transport: &MockTransport) -> ConnectionManager {
    let manager = ConnectionManager::new(
        Arc::new(transport.clone()),
        ConnectionOptions::default(),
        test_timeouts(),
        EventHandlers::new(),
    );
    let mut state = manager.watch_state();
    manager.connect(credential("42"));
    wait_for_state(&mut state, ConnectionState::is_connected).await;
    manager
}

fn title(event: &PushEvent) -> String {
    event.body().title.clone().unwrap_or_default()
}

#[tokio::test]
async fn test_two_consumers_share_one_subscription() {
    init_logger();
    let transport = MockTransport::new();
    let manager = connected_manager(&transport).await;

    let (tx_feed, mut rx_feed) = mpsc::channel(8);
    let (tx_badge, mut rx_badge) = mpsc::channel(8);
    let _feed = manager
        .subscribe("user.42", "message.sent", tx_feed)
        .await
        .unwrap();
    let _badge = manager
        .subscribe("user.42", ".message.sent", tx_badge)
        .await
        .unwrap();

    assert!(wait_until(|| transport.subscribes().len() == 1).await);

    transport.emit(
        "user.42",
        "message.sent",
        json!({"id": 1, "title": "Hello", "conversation_id": "c-1"}),
    );

    let a = within(rx_feed.recv()).await.unwrap();
    let b = within(rx_badge.recv()).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(title(&a), "Hello");

    // Exactly once per listener
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx_feed.try_recv().is_err());
    assert!(rx_badge.try_recv().is_err());
    assert_eq!(transport.subscribes(), vec!["user.42"]);
}

#[tokio::test]
async fn test_events_routed_by_name() {
    init_logger();
    let transport = MockTransport::new();
    let manager = connected_manager(&transport).await;

    let (tx_jobs, mut rx_jobs) = mpsc::channel(8);
    let (tx_notes, mut rx_notes) = mpsc::channel(8);
    let _jobs = manager
        .subscribe("user.42", "job.status.changed", tx_jobs)
        .await
        .unwrap();
    let _notes = manager
        .subscribe("user.42", "notification.sent", tx_notes)
        .await
        .unwrap();
    assert!(wait_until(|| transport.subscribes().len() == 1).await);

    transport.emit("user.42", ".job.status.changed", json!({"title": "Expired"}));
    transport.emit("user.42", "notification.sent", json!({"title": "Reminder"}));
    transport.emit("user.42", "client-typing", json!({"title": "ignored"}));

    assert_eq!(title(&within(rx_jobs.recv()).await.unwrap()), "Expired");
    assert_eq!(title(&within(rx_notes.recv()).await.unwrap()), "Reminder");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx_jobs.try_recv().is_err());
    assert!(rx_notes.try_recv().is_err());
}

#[tokio::test]
async fn test_events_keep_receipt_order() {
    init_logger();
    let transport = MockTransport::new();
    let manager = connected_manager(&transport).await;

    let (tx, mut rx) = mpsc::channel(32);
    let _handle = manager
        .subscribe("user.42", "notification.sent", tx)
        .await
        .unwrap();
    assert!(wait_until(|| transport.subscribes().len() == 1).await);

    for i in 0..20 {
        transport.emit(
            "user.42",
            "notification.sent",
            json!({"id": i, "title": format!("n{}", i)}),
        );
    }

    for i in 0..20 {
        let event = within(rx.recv()).await.unwrap();
        assert_eq!(title(&event), format!("n{}", i));
    }
}

#[tokio::test]
async fn test_physical_subscription_released_with_last_listener() {
    init_logger();
    let transport = MockTransport::new();
    let manager = connected_manager(&transport).await;

    let (tx1, _rx1) = mpsc::channel(8);
    let (tx2, mut rx2) = mpsc::channel(8);
    let first = manager
        .subscribe("user.42", "notification.sent", tx1)
        .await
        .unwrap();
    let second = manager
        .subscribe("user.42", "notification.sent", tx2)
        .await
        .unwrap();
    assert!(wait_until(|| transport.subscribes().len() == 1).await);

    let channels = manager.list_channels().await;
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].listener_count(), 2);

    first.unsubscribe();
    let channels = manager.list_channels().await;
    assert_eq!(channels[0].listener_count(), 1);
    assert!(transport.unsubscribes().is_empty());

    // The remaining listener still receives events
    transport.emit("user.42", "notification.sent", json!({"title": "still"}));
    assert_eq!(title(&within(rx2.recv()).await.unwrap()), "still");

    drop(second);
    assert!(wait_until(|| transport.unsubscribes() == vec!["user.42"]).await);
    assert!(manager.list_channels().await.is_empty());

    // A new listener opens the channel again
    let (tx3, _rx3) = mpsc::channel(8);
    let _third = manager
        .subscribe("user.42", "notification.sent", tx3)
        .await
        .unwrap();
    assert!(wait_until(|| transport.subscribes().len() == 2).await);
}

#[tokio::test]
async fn test_dropped_receiver_is_pruned() {
    init_logger();
    let transport = MockTransport::new();
    let manager = connected_manager(&transport).await;

    let (tx, rx) = mpsc::channel(8);
    let _handle = manager
        .subscribe("user.42", "notification.sent", tx)
        .await
        .unwrap();
    assert!(wait_until(|| transport.subscribes().len() == 1).await);
    drop(rx);

    transport.emit("user.42", "notification.sent", json!({"title": "nobody"}));
    assert!(wait_until(|| transport.unsubscribes() == vec!["user.42"]).await);
}

#[tokio::test]
async fn test_channel_status_tracks_server_ack() {
    init_logger();
    let transport = MockTransport::new();
    let manager = connected_manager(&transport).await;

    let (tx, _rx) = mpsc::channel(8);
    let _handle = manager
        .subscribe("user.42", "message.sent", tx)
        .await
        .unwrap();

    let mut subscribed = false;
    for _ in 0..200 {
        let channels = manager.list_channels().await;
        if channels.first().map(|c| c.status) == Some(ChannelStatus::Subscribed) {
            subscribed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(subscribed);
}

#[tokio::test]
async fn test_malformed_event_is_dropped() {
    init_logger();
    let transport = MockTransport::new();
    let manager = connected_manager(&transport).await;

    let (tx, mut rx) = mpsc::channel(8);
    let _handle = manager
        .subscribe("user.42", "notification.sent", tx)
        .await
        .unwrap();
    assert!(wait_until(|| transport.subscribes().len() == 1).await);

    transport.emit("user.42", "notification.sent", json!({"unrelated": true}));
    transport.emit("user.42", "notification.sent", json!({"data": {"message": "nested"}}));

    let event = within(rx.recv()).await.unwrap();
    assert_eq!(event.body().message, "nested");
    assert!(manager.state().is_connected());
}

#[tokio::test]
async fn test_stalled_listener_does_not_block_others() {
    init_logger();
    let transport = MockTransport::new();
    let manager = connected_manager(&transport).await;

    // Never read, and full after one event
    let (tx_stalled, _rx_stalled) = mpsc::channel(1);
    let (tx_badge, mut rx_badge) = mpsc::channel(8);
    let _stalled = manager
        .subscribe("user.42", "notification.sent", tx_stalled)
        .await
        .unwrap();
    let _badge = manager
        .subscribe("user.42", "message.sent", tx_badge)
        .await
        .unwrap();
    assert!(wait_until(|| transport.subscribes().len() == 1).await);

    transport.emit("user.42", "notification.sent", json!({"id": 1, "title": "a"}));
    transport.emit("user.42", "notification.sent", json!({"id": 2, "title": "b"}));
    transport.emit("user.42", "message.sent", json!({"id": 3, "title": "hi"}));

    assert_eq!(title(&within(rx_badge.recv()).await.unwrap()), "hi");

    // The connection task keeps serving commands
    let channels = within(manager.list_channels()).await;
    assert_eq!(channels[0].listener_count(), 2);
    assert!(manager.state().is_connected());
}
