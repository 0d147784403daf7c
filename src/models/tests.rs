use serde_json::json;

use super::*;
use crate::error::RealtimeLinkError;

// ==================== ConnectionOptions Tests ====================

#[test]
fn test_connection_options_default() {
    let opts = ConnectionOptions::default();

    assert!(opts.auto_reconnect, "auto_reconnect should default to true");
    assert_eq!(opts.reconnect_intervals_ms, DEFAULT_RECONNECT_INTERVALS_MS.to_vec());
    assert!(
        opts.max_reconnect_attempts.is_none(),
        "max_reconnect_attempts should default to None (infinite)"
    );
}

#[test]
fn test_connection_options_builder_pattern() {
    let opts = ConnectionOptions::new()
        .with_auto_reconnect(false)
        .with_reconnect_intervals_ms(vec![10, 20])
        .with_max_reconnect_attempts(Some(5));

    assert!(!opts.auto_reconnect);
    assert_eq!(opts.reconnect_intervals_ms, vec![10, 20]);
    assert_eq!(opts.max_reconnect_attempts, Some(5));
}

#[test]
fn test_connection_options_deserialize_with_defaults() {
    let opts: ConnectionOptions = serde_json::from_str(r#"{"max_reconnect_attempts": 3}"#).unwrap();

    assert!(opts.auto_reconnect);
    assert_eq!(opts.reconnect_intervals_ms, DEFAULT_RECONNECT_INTERVALS_MS.to_vec());
    assert_eq!(opts.max_reconnect_attempts, Some(3));
}

// ==================== TopicKey Tests ====================

#[test]
fn test_topic_key_bare_wire_form() {
    let key = TopicKey::new("posts/123", None);
    assert!(key.is_bare());
    assert_eq!(key.wire(), "posts/123");
}

#[test]
fn test_topic_key_empty_options_is_bare() {
    let key = TopicKey::new("posts", Some(&TopicOptions::new()));
    assert_eq!(key, TopicKey::bare("posts"));
}

#[test]
fn test_topic_key_is_insertion_order_independent() {
    let a = TopicOptions::new().with_filter("a = 1").with_expand("author");
    let b = TopicOptions::new().with_expand("author").with_filter("a = 1");

    assert_eq!(TopicKey::new("posts", Some(&a)), TopicKey::new("posts", Some(&b)));
    assert_eq!(
        TopicKey::new("posts", Some(&a)).wire(),
        TopicKey::new("posts", Some(&b)).wire()
    );
}

#[test]
fn test_topic_key_wire_encodes_options() {
    let options = TopicOptions::new().with_filter("x=1");
    let wire = TopicKey::new("posts", Some(&options)).wire();

    assert!(wire.starts_with("posts?options="), "got {}", wire);
    let encoded = wire.trim_start_matches("posts?options=");
    let decoded: String = url::form_urlencoded::parse(format!("v={}", encoded).as_bytes())
        .map(|(_, v)| v.into_owned())
        .next()
        .unwrap();
    assert_eq!(decoded, r#"{"query":{"filter":"x=1"}}"#);
}

#[test]
fn test_topic_key_with_existing_query_uses_ampersand() {
    let options = TopicOptions::new().with_header("x-tenant", "t1");
    let wire = TopicKey::new("posts?lang=en", Some(&options)).wire();
    assert!(wire.starts_with("posts?lang=en&options="), "got {}", wire);
}

#[test]
fn test_different_filters_are_distinct_keys() {
    let a = TopicKey::new("posts", Some(&TopicOptions::new().with_filter("a")));
    let b = TopicKey::new("posts", Some(&TopicOptions::new().with_filter("b")));
    assert_ne!(a, b);
    assert_eq!(a.to_bare(), b.to_bare());
}

// ==================== InboundMessage Tests ====================

#[test]
fn test_inbound_broadcast_parses() {
    let msg = InboundMessage::parse(
        r#"{"topic":"posts/123","event":"update","payload":{"id":"123"},"id":"ev1"}"#,
    )
    .unwrap();

    assert_eq!(msg.topic, "posts/123");
    assert_eq!(msg.event.as_deref(), Some("update"));
    assert_eq!(msg.payload, json!({"id": "123"}));
    assert_eq!(msg.correlation_id().unwrap(), None);
}

#[test]
fn test_inbound_ack_parses_request_id() {
    let msg = InboundMessage::parse(r#"{"requestId":"42","payload":{"ok":true}}"#).unwrap();
    assert_eq!(msg.correlation_id().unwrap(), Some(42));
    assert!(msg.topic.is_empty());
}

#[test]
fn test_inbound_nack_carries_error() {
    let msg = InboundMessage::parse(
        r#"{"requestId":"7","error":{"code":"forbidden","message":"denied"}}"#,
    )
    .unwrap();
    let err: RealtimeLinkError = msg.error.unwrap().into();
    assert_eq!(
        err,
        RealtimeLinkError::ServerError {
            code: "forbidden".into(),
            message: "denied".into()
        }
    );
}

#[test]
fn test_inbound_malformed() {
    assert!(matches!(
        InboundMessage::parse("not json"),
        Err(RealtimeLinkError::MalformedPayload(_))
    ));

    let msg = InboundMessage::parse(r#"{"requestId":"abc"}"#).unwrap();
    assert!(msg.correlation_id().is_err());
}

// ==================== ClientFrame Tests ====================

#[test]
fn test_client_frame_subscribe_shape() {
    let frame = ClientFrame::Subscribe {
        request_id: "3".into(),
        topics: vec!["a".into(), "b".into()],
    };
    assert_eq!(
        serde_json::to_value(&frame).unwrap(),
        json!({"type": "subscribe", "requestId": "3", "topics": ["a", "b"]})
    );
}

#[test]
fn test_client_frame_publish_shape() {
    let frame = ClientFrame::Publish {
        request_id: "4".into(),
        topic: "chat".into(),
        data: json!({"text": "hi"}),
    };
    assert_eq!(
        serde_json::to_value(&frame).unwrap(),
        json!({"type": "publish", "requestId": "4", "topic": "chat", "data": {"text": "hi"}})
    );
}

#[test]
fn test_submission_body_shape() {
    let body = TopicSubmissionBody {
        client_id: "c1".into(),
        subscriptions: vec!["posts".into()],
    };
    assert_eq!(
        serde_json::to_value(&body).unwrap(),
        json!({"clientId": "c1", "subscriptions": ["posts"]})
    );
}
