//! Development relay
//!
//! A minimal Socket.IO relay for local runs and integration tests. Every
//! `sendMessage` event is rebroadcast as `receiveMessage` to all clients in
//! the same namespace, the sender included.

use crate::chat::models::{RECEIVE_MESSAGE_EVENT, SEND_MESSAGE_EVENT};
use crate::socket::packet::{EnginePacket, Handshake, SocketPacket};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default interval between heartbeats sent to clients
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);

/// Default time a client has to answer a heartbeat
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(20);

/// Frame queued for every client: `(namespace, encoded frame)`
type Broadcast = (String, String);

/// Shared relay state
pub struct RelayServer {
    broadcast: broadcast::Sender<Broadcast>,
    ping_interval: Duration,
    ping_timeout: Duration,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    clients: usize,
}

impl RelayServer {
    /// Create a relay with default heartbeat timings
    pub fn new() -> Self {
        Self::with_heartbeat(DEFAULT_PING_INTERVAL, DEFAULT_PING_TIMEOUT)
    }

    /// Create a relay with custom heartbeat timings
    pub fn with_heartbeat(ping_interval: Duration, ping_timeout: Duration) -> Self {
        let (broadcast, _) = broadcast::channel(256);
        Self {
            broadcast,
            ping_interval,
            ping_timeout,
        }
    }

    /// Router serving the Engine.IO endpoint at `/socket.io/`
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/socket.io/", get(socket_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Serve on `listener` until `shutdown` resolves
    ///
    /// # Arguments
    /// * `listener` - Bound TCP listener to accept clients on
    /// * `shutdown` - Future that triggers graceful shutdown when it completes
    ///
    /// # Returns
    /// * `std::io::Result<()>` - Ok after a graceful shutdown
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Relay listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn health_check(State(relay): State<Arc<RelayServer>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        clients: relay.broadcast.receiver_count(),
    })
}

async fn socket_handler(ws: WebSocketUpgrade, State(relay): State<Arc<RelayServer>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, relay))
}

fn text_frame(packet: EnginePacket) -> Message {
    Message::Text(packet.encode())
}

fn socket_frame(packet: SocketPacket) -> Message {
    text_frame(EnginePacket::Message(packet.encode()))
}

// Handle one client connection
async fn handle_socket(socket: WebSocket, relay: Arc<RelayServer>) {
    let (mut sender, mut receiver) = socket.split();
    let sid = Uuid::new_v4().to_string();

    let handshake = Handshake {
        sid: sid.clone(),
        upgrades: Vec::new(),
        ping_interval: relay.ping_interval.as_millis() as u64,
        ping_timeout: relay.ping_timeout.as_millis() as u64,
        max_payload: 1_000_000,
    };
    if let Err(e) = sender.send(text_frame(EnginePacket::Open(handshake))).await {
        error!(sid = %sid, error = %e, "Failed to send open packet");
        return;
    }
    info!(sid = %sid, "Relay client connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let (joined_tx, joined_rx) = watch::channel::<Option<String>>(None);

    // Task to forward messages from channel to sender
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = sender.send(msg).await {
                debug!(error = %e, "Failed to send frame");
                break;
            }
        }
    });

    // Task to send periodic heartbeats
    let ping_tx = tx.clone();
    let ping_interval = relay.ping_interval;
    let mut ping_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(ping_interval).await;
            if ping_tx.send(text_frame(EnginePacket::Ping)).is_err() {
                break;
            }
        }
    });

    // Task to forward relayed messages for the joined namespace
    let forward_tx = tx.clone();
    let mut relayed = relay.broadcast.subscribe();
    let mut forward_task = tokio::spawn(async move {
        loop {
            match relayed.recv().await {
                Ok((namespace, frame)) => {
                    if joined_rx.borrow().as_deref() != Some(namespace.as_str()) {
                        continue;
                    }
                    if forward_tx.send(Message::Text(frame)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Relay client lagging, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Receive packets
    let broadcast = relay.broadcast.clone();
    let recv_sid = sid.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(sid = %recv_sid, error = %e, "WebSocket error");
                    break;
                }
            };

            let body = match EnginePacket::decode(&text) {
                Ok(EnginePacket::Message(body)) => body,
                Ok(EnginePacket::Close) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(sid = %recv_sid, error = %e, "Ignoring undecodable frame");
                    continue;
                }
            };

            match SocketPacket::decode(&body) {
                Ok(SocketPacket::Connect { namespace, .. }) => {
                    let confirm = SocketPacket::Connect {
                        namespace: namespace.clone(),
                        data: Some(json!({ "sid": recv_sid })),
                    };
                    joined_tx.send_replace(Some(namespace));
                    if tx.send(socket_frame(confirm)).is_err() {
                        break;
                    }
                }
                Ok(SocketPacket::Event {
                    namespace,
                    name,
                    args,
                    ..
                }) if name == SEND_MESSAGE_EVENT => {
                    let echo = SocketPacket::Event {
                        namespace: namespace.clone(),
                        id: None,
                        name: RECEIVE_MESSAGE_EVENT.to_string(),
                        args,
                    };
                    let frame = EnginePacket::Message(echo.encode()).encode();
                    debug!(sid = %recv_sid, namespace = %namespace, "Relaying message");
                    let _ = broadcast.send((namespace, frame));
                }
                Ok(SocketPacket::Disconnect { .. }) => break,
                Ok(other) => debug!(sid = %recv_sid, packet = ?other, "Ignoring packet"),
                Err(e) => debug!(sid = %recv_sid, error = %e, "Ignoring undecodable packet"),
            }
        }
    });

    // Wait for any task to complete
    tokio::select! {
        _ = &mut send_task => {}
        _ = &mut ping_task => {}
        _ = &mut forward_task => {}
        _ = &mut recv_task => {}
    }
    send_task.abort();
    ping_task.abort();
    forward_task.abort();
    recv_task.abort();

    info!(sid = %sid, "Relay client disconnected");
}
