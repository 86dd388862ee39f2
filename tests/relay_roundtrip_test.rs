//! End-to-end tests: two chat sessions talking through the development relay

use serde_json::Value;
use socket_chat::chat::models::RECEIVE_MESSAGE_EVENT;
use socket_chat::chat::SessionState;
use socket_chat::config::{ReconnectPolicy, RelayConfig};
use socket_chat::relay::RelayServer;
use socket_chat::transport::{ConnectionState, Transport};
use socket_chat::{ChatError, ChatSession, ConnectionManager, TranscriptUpdate};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay() -> (SocketAddr, oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind relay");
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(Arc::new(RelayServer::new()).serve(listener, async move {
        let _ = stop_rx.await;
    }));
    (addr, stop_tx)
}

async fn wait_until_active(session: &ChatSession) {
    tokio::time::timeout(WAIT, async {
        while session.state() != SessionState::Active {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Session never became active");
}

/// Subscribe an extra receiveMessage handler that reports every delivery
fn watch_deliveries(connection: &ConnectionManager) -> mpsc::UnboundedReceiver<Vec<Value>> {
    let (tx, rx) = mpsc::unbounded_channel();
    connection.subscribe(
        RECEIVE_MESSAGE_EVENT,
        Arc::new(move |args: &[Value]| {
            let _ = tx.send(args.to_vec());
        }),
    );
    rx
}

#[tokio::test]
async fn test_two_sessions_exchange_messages() {
    let (addr, _stop) = start_relay().await;
    let relay = RelayConfig::with_url(format!("http://{}", addr));

    let alice_connection = Arc::new(ConnectionManager::new(relay.clone()));
    let bob_connection = Arc::new(ConnectionManager::new(relay));
    let alice = ChatSession::with_user_id(alice_connection.clone(), "alice");
    let bob = ChatSession::with_user_id(bob_connection.clone(), "bob");
    wait_until_active(&alice).await;
    wait_until_active(&bob).await;

    let mut alice_deliveries = watch_deliveries(&alice_connection);
    let mut bob_updates = bob.updates();

    alice.send_message("hi").await.unwrap();

    // Bob sees Alice's message
    let update = tokio::time::timeout(WAIT, bob_updates.recv())
        .await
        .expect("Bob never received the message")
        .unwrap();
    match update {
        TranscriptUpdate::Received(message) => {
            assert_eq!(message.user_id, "alice");
            assert_eq!(message.text, "hi");
        }
        other => panic!("Expected Received, got: {:?}", other),
    }

    // The relay echoes Alice's message back to her; it must not duplicate
    tokio::time::timeout(WAIT, alice_deliveries.recv())
        .await
        .expect("Relay never echoed the message")
        .unwrap();
    alice.flush().await.unwrap();
    assert_eq!(alice.transcript().len(), 1);

    // Bob replies
    let mut alice_updates = alice.updates();
    bob.send_message("yo").await.unwrap();
    let update = tokio::time::timeout(WAIT, alice_updates.recv())
        .await
        .expect("Alice never received the reply")
        .unwrap();
    assert_eq!(update.message().user_id, "bob");

    let transcript = alice.transcript();
    let texts: Vec<&str> = transcript.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["hi", "yo"]);
    assert!(transcript.is_own(transcript.get(0).unwrap()));
    assert!(!transcript.is_own(transcript.get(1).unwrap()));

    alice.shutdown().await;
    bob.shutdown().await;
    alice_connection.disconnect();
    bob_connection.disconnect();
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_stops_emits() {
    let (addr, _stop) = start_relay().await;
    let connection = Arc::new(ConnectionManager::new(RelayConfig::with_url(format!(
        "http://{}",
        addr
    ))));
    let session = ChatSession::with_user_id(connection.clone(), "solo");
    wait_until_active(&session).await;

    // A second connect while connected is a no-op
    connection.connect();
    assert_eq!(connection.state(), ConnectionState::Connected);

    connection.disconnect();
    connection.disconnect();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(matches!(
        connection.emit("sendMessage", serde_json::json!({})),
        Err(ChatError::NotConnected)
    ));

    // Sending still produces a local echo
    session.send_message("into the void").await.unwrap();
    assert_eq!(session.transcript().len(), 1);
}

#[tokio::test]
async fn test_opt_in_reconnect_reaches_late_relay() {
    // Reserve a port, then release it so the first attempts fail
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let policy = ReconnectPolicy {
        enabled: true,
        max_attempts: 50,
        base_delay: Duration::from_millis(20),
    };
    let connection = Arc::new(ConnectionManager::with_reconnect(
        RelayConfig::with_url(format!("http://{}", addr)),
        policy,
    ));
    let session = ChatSession::with_user_id(connection.clone(), "late");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::Connecting);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to rebind relay port");
    let (_stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(Arc::new(RelayServer::new()).serve(listener, async move {
        let _ = stop_rx.await;
    }));

    wait_until_active(&session).await;
    assert_eq!(connection.state(), ConnectionState::Connected);
    connection.disconnect();
}
