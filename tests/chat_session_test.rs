//! Tests for ChatSession over the in-memory transport

use serde_json::json;
use socket_chat::chat::models::{RECEIVE_MESSAGE_EVENT, SEND_MESSAGE_EVENT};
use socket_chat::transport::{MemoryTransport, Transport};
use socket_chat::{ChatSession, TranscriptUpdate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn notification_counter(session: &ChatSession) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let hits = count.clone();
    session.on_messages_updated(move || {
        hits.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[tokio::test]
async fn test_send_echo_and_remote_message_scenario() {
    let transport = Arc::new(MemoryTransport::new());
    let session = ChatSession::with_user_id(transport.clone(), "A");
    let notifications = notification_counter(&session);

    // Local send is echoed immediately
    session.send_message("hi").await.unwrap();
    let transcript = session.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript.get(0).unwrap().user_id, "A");
    assert_eq!(transcript.get(0).unwrap().text, "hi");
    assert_eq!(notifications.load(Ordering::SeqCst), 1);

    // Server echo of our own message is dropped
    transport.inject(
        RECEIVE_MESSAGE_EVENT,
        vec![json!({"userId": "A", "message": "hi"})],
    );
    session.flush().await.unwrap();
    assert_eq!(session.transcript().len(), 1);
    assert_eq!(notifications.load(Ordering::SeqCst), 1);

    // Remote message is appended after ours
    transport.inject(
        RECEIVE_MESSAGE_EVENT,
        vec![json!({"userId": "B", "message": "yo"})],
    );
    session.flush().await.unwrap();
    let transcript = session.transcript();
    let texts: Vec<(&str, &str)> = transcript
        .iter()
        .map(|m| (m.user_id.as_str(), m.text.as_str()))
        .collect();
    assert_eq!(texts, vec![("A", "hi"), ("B", "yo")]);
    assert_eq!(notifications.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_message_field_is_ignored() {
    let transport = Arc::new(MemoryTransport::new());
    let session = ChatSession::with_user_id(transport.clone(), "A");
    let notifications = notification_counter(&session);

    transport.inject(RECEIVE_MESSAGE_EVENT, vec![json!({"userId": "B"})]);
    session.flush().await.unwrap();

    assert!(session.transcript().is_empty());
    assert_eq!(notifications.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_echoing_transport_keeps_single_copy() {
    let transport = Arc::new(MemoryTransport::with_echo());
    let session = ChatSession::with_user_id(transport.clone(), "A");

    for text in ["one", "two", "three"] {
        session.send_message(text).await.unwrap();
    }
    session.flush().await.unwrap();

    let transcript = session.transcript();
    assert_eq!(transcript.len(), 3);
    assert!(transcript.iter().all(|m| transcript.is_own(m)));
    assert_eq!(
        transport
            .emitted()
            .iter()
            .filter(|(event, _)| event == SEND_MESSAGE_EVENT)
            .count(),
        3
    );
}

#[tokio::test]
async fn test_mixed_traffic_is_append_only_and_attributed() {
    let transport = Arc::new(MemoryTransport::with_echo());
    let session = ChatSession::with_user_id(transport.clone(), "A");
    let notifications = notification_counter(&session);

    let mut sent = 0;
    let mut accepted_remote = 0;
    let mut previous_len = 0;
    for step in 0..30 {
        match step % 5 {
            0 | 3 => {
                session.send_message(format!("local {}", step)).await.unwrap();
                sent += 1;
            }
            1 => {
                transport.inject(
                    RECEIVE_MESSAGE_EVENT,
                    vec![json!({"userId": "B", "message": format!("remote {}", step)})],
                );
                accepted_remote += 1;
            }
            2 => {
                transport.inject(RECEIVE_MESSAGE_EVENT, vec![json!({"message": "orphan"})]);
            }
            _ => {
                transport.inject(
                    RECEIVE_MESSAGE_EVENT,
                    vec![json!({"userId": "A", "message": "replayed"})],
                );
            }
        }
        session.flush().await.unwrap();

        let len = session.transcript().len();
        assert!(len >= previous_len, "transcript shrank at step {}", step);
        previous_len = len;
    }

    let transcript = session.transcript();
    assert_eq!(transcript.len(), sent + accepted_remote);
    assert_eq!(notifications.load(Ordering::SeqCst), sent + accepted_remote);
    for (index, message) in transcript.iter().enumerate() {
        assert_eq!(message.sequence, index);
        assert_eq!(
            message.user_id == session.current_user_id(),
            message.text.starts_with("local"),
            "misattributed message: {:?}",
            message
        );
    }
}

#[tokio::test]
async fn test_update_stream_and_callbacks_see_every_mutation() {
    let transport = Arc::new(MemoryTransport::new());
    let session = ChatSession::with_user_id(transport.clone(), "A");
    let mut first = session.updates();
    let mut second = session.updates();
    let callbacks = notification_counter(&session);

    session.send_message("hi").await.unwrap();
    transport.inject(
        RECEIVE_MESSAGE_EVENT,
        vec![json!({"userId": "B", "message": "yo"})],
    );
    session.flush().await.unwrap();

    for updates in [&mut first, &mut second] {
        match updates.recv().await.unwrap() {
            TranscriptUpdate::Sent(message) => assert_eq!(message.text, "hi"),
            other => panic!("Expected Sent, got: {:?}", other),
        }
        match updates.recv().await.unwrap() {
            TranscriptUpdate::Received(message) => assert_eq!(message.user_id, "B"),
            other => panic!("Expected Received, got: {:?}", other),
        }
        assert!(updates.try_recv().is_err());
    }
    assert_eq!(callbacks.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_snapshots_are_immutable() {
    let transport = Arc::new(MemoryTransport::new());
    let session = ChatSession::with_user_id(transport.clone(), "A");

    session.send_message("first").await.unwrap();
    let before = session.transcript();
    session.send_message("second").await.unwrap();

    assert_eq!(before.len(), 1);
    assert_eq!(session.transcript().len(), 2);
}

#[tokio::test]
async fn test_session_survives_transport_disconnect() {
    let transport = Arc::new(MemoryTransport::new());
    let session = ChatSession::with_user_id(transport.clone(), "A");

    transport.disconnect();
    let message = session.send_message("still here").await.unwrap();

    assert_eq!(message.user_id, "A");
    assert_eq!(session.transcript().len(), 1);
    assert!(transport.emitted().is_empty());
}
