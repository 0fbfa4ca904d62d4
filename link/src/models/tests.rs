use chrono::{TimeZone, Utc};
use serde_json::json;
use std::time::Duration;

use super::*;

// ==================== ConnectionOptions Tests ====================

#[test]
fn test_connection_options_default() {
    let opts = ConnectionOptions::default();

    assert!(opts.auto_reconnect, "auto_reconnect should default to true");
    assert_eq!(opts.reconnect_delay_ms, 1000);
    assert_eq!(opts.max_reconnect_delay_ms, 30000);
    assert_eq!(
        opts.max_reconnect_attempts,
        Some(10),
        "reconnects must be bounded by default"
    );
    assert_eq!(opts.stable_session(), Duration::from_secs(10));
}

#[test]
fn test_connection_options_backoff_is_exponential_and_capped() {
    let opts = ConnectionOptions::new()
        .with_reconnect_delay_ms(100)
        .with_max_reconnect_delay_ms(1000);

    assert_eq!(opts.backoff_delay(1), Duration::from_millis(100));
    assert_eq!(opts.backoff_delay(2), Duration::from_millis(200));
    assert_eq!(opts.backoff_delay(4), Duration::from_millis(800));
    assert_eq!(opts.backoff_delay(5), Duration::from_millis(1000));
    assert_eq!(opts.backoff_delay(64), Duration::from_millis(1000));
}

#[test]
fn test_connection_options_attempt_budget() {
    let bounded = ConnectionOptions::new().with_max_reconnect_attempts(Some(2));
    assert!(bounded.allows_attempt(1));
    assert!(bounded.allows_attempt(2));
    assert!(!bounded.allows_attempt(3));

    let unbounded = ConnectionOptions::new().with_max_reconnect_attempts(None);
    assert!(unbounded.allows_attempt(10_000));

    let disabled = ConnectionOptions::new().with_auto_reconnect(false);
    assert!(!disabled.allows_attempt(1));
}

#[test]
fn test_connection_options_partial_deserialization() {
    let parsed: ConnectionOptions =
        serde_json::from_str(r#"{"reconnect_delay_ms": 250}"#).unwrap();

    assert!(parsed.auto_reconnect);
    assert_eq!(parsed.reconnect_delay_ms, 250);
    assert_eq!(parsed.max_reconnect_attempts, Some(10));
    assert_eq!(parsed.stable_session_ms, 10_000);
}

// ==================== PushEvent Tests ====================

#[test]
fn test_event_name_normalization() {
    assert_eq!(normalize_event_name(".message.sent"), "message.sent");
    assert_eq!(normalize_event_name("message.sent"), "message.sent");
    // Only one leading dot is an alias marker
    assert_eq!(normalize_event_name("..message.sent"), ".message.sent");
}

#[test]
fn test_decode_message_sent_with_leading_dot() {
    let payload = json!({
        "id": 991,
        "conversation_id": 17,
        "sender_name": "Dana",
        "message": "Are you still hiring?"
    });

    let event = PushEvent::decode(".message.sent", &payload).unwrap().unwrap();
    match &event {
        PushEvent::MessageSent {
            body,
            conversation_id,
            sender_name,
        } => {
            assert_eq!(conversation_id.as_deref(), Some("17"));
            assert_eq!(sender_name.as_deref(), Some("Dana"));
            assert_eq!(body.message, "Are you still hiring?");
            assert_eq!(body.event_id.as_deref(), Some("991"));
        },
        other => panic!("Expected MessageSent, got {:?}", other),
    }
    assert_eq!(event.event_name(), "message.sent");
    assert_eq!(event.dedupe_key(), "message.sent:991");
}

#[test]
fn test_decode_reads_nested_data_object() {
    let payload = json!({
        "data": {
            "title": "New application",
            "message": "Sam applied to Backend Engineer",
            "job_id": "job-5"
        }
    });

    let event = PushEvent::decode("job.application.received", &payload)
        .unwrap()
        .unwrap();
    match event {
        PushEvent::ApplicationReceived { body, job_id, .. } => {
            assert_eq!(body.title.as_deref(), Some("New application"));
            assert_eq!(body.message, "Sam applied to Backend Engineer");
            assert_eq!(job_id.as_deref(), Some("job-5"));
        },
        other => panic!("Expected ApplicationReceived, got {:?}", other),
    }
}

#[test]
fn test_decode_message_object_payload() {
    let payload = json!({
        "message": {
            "id": 5,
            "conversation_id": "c-1",
            "body": "Hello there"
        }
    });

    let event = PushEvent::decode("message.sent", &payload).unwrap().unwrap();
    match event {
        PushEvent::MessageSent {
            body,
            conversation_id,
            ..
        } => {
            assert_eq!(body.message, "Hello there");
            assert_eq!(conversation_id.as_deref(), Some("c-1"));
        },
        other => panic!("Expected MessageSent, got {:?}", other),
    }
}

#[test]
fn test_decode_string_encoded_payload() {
    let payload = json!(r#"{"title":"Job expired","status":"expired"}"#);

    let event = PushEvent::decode("job.status.changed", &payload)
        .unwrap()
        .unwrap();
    match event {
        PushEvent::JobStatusChanged { body, status, .. } => {
            assert_eq!(body.title.as_deref(), Some("Job expired"));
            assert_eq!(body.message, "");
            assert_eq!(status.as_deref(), Some("expired"));
        },
        other => panic!("Expected JobStatusChanged, got {:?}", other),
    }
}

#[test]
fn test_decode_notification_sent_kind() {
    let payload = json!({"type": "interview", "title": "Interview tomorrow", "message": "10:00"});
    let event = PushEvent::decode("notification.sent", &payload).unwrap().unwrap();
    assert_eq!(event.notification_kind(), NotificationKind::Interview);

    let payload = json!({"type": "something-new", "message": "hi"});
    let event = PushEvent::decode("notification.sent", &payload).unwrap().unwrap();
    assert_eq!(event.notification_kind(), NotificationKind::System);
}

#[test]
fn test_decode_unknown_event_is_ignored() {
    let payload = json!({"title": "x"});
    assert!(PushEvent::decode("client-typing", &payload).unwrap().is_none());
    assert!(PushEvent::decode("pusher:ping", &payload).unwrap().is_none());
}

#[test]
fn test_decode_rejects_empty_payload() {
    let err = PushEvent::decode("message.sent", &json!({"conversation_id": 1})).unwrap_err();
    assert!(matches!(err, crate::LinkError::SerializationError(_)));
}

#[test]
fn test_dedupe_key_hashes_payload_without_id() {
    let payload = json!({"title": "Heads up", "message": "Maintenance at 2am"});
    let a = PushEvent::decode("notification.sent", &payload).unwrap().unwrap();
    let b = PushEvent::decode(".notification.sent", &payload).unwrap().unwrap();

    assert_eq!(a.dedupe_key(), b.dedupe_key(), "replays must collapse");
    assert!(a.dedupe_key().starts_with("notification.sent:sha256:"));

    let other = json!({"title": "Heads up", "message": "Maintenance at 3am"});
    let c = PushEvent::decode("notification.sent", &other).unwrap().unwrap();
    assert_ne!(a.dedupe_key(), c.dedupe_key());
}

// ==================== Notification Tests ====================

#[test]
fn test_notification_from_event_uses_defaults() {
    let received_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let event = PushEvent::decode("message.sent", &json!({"message": "ping", "id": 3}))
        .unwrap()
        .unwrap();

    let notification = Notification::from_event(&event, received_at);
    assert_eq!(notification.id, "message.sent:3");
    assert_eq!(notification.kind, NotificationKind::Message);
    assert_eq!(notification.title, "New message");
    assert_eq!(notification.description, "ping");
    assert_eq!(notification.timestamp, received_at);
    assert!(notification.is_unread);
}

#[test]
fn test_notification_prefers_server_timestamp() {
    let received_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let event = PushEvent::decode(
        "job.status.changed",
        &json!({"title": "Closed", "created_at": "2024-02-28T08:30:00Z"}),
    )
    .unwrap()
    .unwrap();

    let notification = Notification::from_event(&event, received_at);
    assert_eq!(
        notification.timestamp,
        Utc.with_ymd_and_hms(2024, 2, 28, 8, 30, 0).unwrap()
    );
}

#[test]
fn test_notification_snapshot_format() {
    let event = PushEvent::decode("job.application.received", &json!({"title": "New", "id": "a1"}))
        .unwrap()
        .unwrap();
    let notification =
        Notification::from_event(&event, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

    let value = serde_json::to_value(&notification).unwrap();
    assert_eq!(value["type"], "application");
    assert_eq!(value["isUnread"], true);
    assert_eq!(value["rawPayload"]["id"], "a1");
    assert!(value.get("is_unread").is_none());
}

// ==================== Wire Frame Tests ====================

#[test]
fn test_client_subscribe_frame() {
    let frame = ClientMessage::subscribe("private-user.42", "key:sig");
    let json = serde_json::to_value(&frame).unwrap();

    assert_eq!(json["event"], "pusher:subscribe");
    assert_eq!(json["data"]["channel"], "private-user.42");
    assert_eq!(json["data"]["auth"], "key:sig");
}

#[test]
fn test_server_frame_payload_decodes_string_data() {
    let frame: ServerMessage = serde_json::from_str(
        r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"123.456\",\"activity_timeout\":120}"}"#,
    )
    .unwrap();

    assert!(frame.is_protocol_event());
    let established: ConnectionEstablished = serde_json::from_value(frame.payload()).unwrap();
    assert_eq!(established.socket_id, "123.456");
    assert_eq!(established.activity_timeout, Some(120));
}

#[test]
fn test_protocol_error_describe() {
    let err = ProtocolError {
        code: Some(4009),
        ..Default::default()
    };
    assert_eq!(err.describe(), "error code 4009");

    let err = ProtocolError {
        message: Some("Over capacity".into()),
        code: Some(4100),
        ..Default::default()
    };
    assert_eq!(err.describe(), "Over capacity");
}

// ==================== REST Response Tests ====================

#[test]
fn test_unread_count_response() {
    let ok: UnreadCountResponse = serde_json::from_str(r#"{"success":true,"count":7}"#).unwrap();
    assert_eq!(ok.unread(), Some(7));

    let negative: UnreadCountResponse =
        serde_json::from_str(r#"{"success":true,"count":-2}"#).unwrap();
    assert_eq!(negative.unread(), Some(0));

    let failed: UnreadCountResponse =
        serde_json::from_str(r#"{"success":false,"message":"nope"}"#).unwrap();
    assert_eq!(failed.unread(), None);
}

#[test]
fn test_notification_settings_response() {
    let off: NotificationSettingsResponse = serde_json::from_str(
        r#"{"success":true,"data":{"in_app_notifications":{"real_time_alerts":false}}}"#,
    )
    .unwrap();
    assert_eq!(
        off.settings(),
        Some(NotificationSettings {
            real_time_alerts: false
        })
    );

    let missing: NotificationSettingsResponse =
        serde_json::from_str(r#"{"success":true,"data":{}}"#).unwrap();
    assert_eq!(missing.settings(), Some(NotificationSettings::default()));

    let failed: NotificationSettingsResponse =
        serde_json::from_str(r#"{"success":false}"#).unwrap();
    assert_eq!(failed.settings(), None);
}
