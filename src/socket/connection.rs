//! Connection Manager
//!
//! Owns the single Socket.IO connection to the relay. A background task runs
//! the Engine.IO handshake, answers heartbeats, writes queued frames and
//! dispatches inbound events to subscribers.

use super::packet::{EnginePacket, Handshake, SocketPacket};
use crate::config::{Config, ReconnectPolicy, RelayConfig};
use crate::error::ChatError;
use crate::transport::{
    ConnectionState, EventHandler, EventRegistry, SubscriptionId, Transport, CONNECT_EVENT,
    DISCONNECT_EVENT,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Manages the connection to the relay server
///
/// Create one per process at the composition root and share it as
/// `Arc<dyn Transport>`.
pub struct ConnectionManager {
    relay: RelayConfig,
    reconnect: ReconnectPolicy,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// State shared between the manager handle and its connection task
///
/// Every connect bumps `generation`; a task only updates the link while its
/// generation is still current, so a task that is winding down after
/// `disconnect()` can never clobber a newer connection.
struct Shared {
    registry: EventRegistry,
    link: Mutex<Link>,
}

struct Link {
    generation: u64,
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self) -> u64 {
        let mut link = self.lock();
        link.generation += 1;
        link.state = ConnectionState::Connecting;
        link.outbound = None;
        link.generation
    }

    /// Invalidate the running task; returns whether a connection was live
    fn reset(&self) -> bool {
        let mut link = self.lock();
        link.generation += 1;
        link.outbound = None;
        std::mem::replace(&mut link.state, ConnectionState::Disconnected)
            == ConnectionState::Connected
    }

    fn mark_connected(&self, generation: u64, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut link = self.lock();
        if link.generation != generation {
            return false;
        }
        link.state = ConnectionState::Connected;
        link.outbound = Some(outbound);
        true
    }

    /// Drop the live link; returns whether this generation was connected
    fn mark_lost(&self, generation: u64) -> bool {
        let mut link = self.lock();
        if link.generation != generation {
            return false;
        }
        link.outbound = None;
        std::mem::replace(&mut link.state, ConnectionState::Connecting)
            == ConnectionState::Connected
    }

    fn set_state(&self, generation: u64, state: ConnectionState) -> bool {
        let mut link = self.lock();
        if link.generation != generation {
            return false;
        }
        link.state = state;
        true
    }
}

impl ConnectionManager {
    /// Create a manager for `relay` with reconnecting disabled
    pub fn new(relay: RelayConfig) -> Self {
        Self::with_reconnect(relay, ReconnectPolicy::default())
    }

    /// Create a manager with an explicit reconnect policy
    ///
    /// Nothing is dialed until [`Transport::connect`] is called.
    ///
    /// # Arguments
    /// * `relay` - Relay endpoint and namespace
    /// * `reconnect` - Retry policy applied after a lost or failed connection
    ///
    /// # Returns
    /// * `ConnectionManager` - Disconnected manager ready to be shared
    pub fn with_reconnect(relay: RelayConfig, reconnect: ReconnectPolicy) -> Self {
        Self {
            relay,
            reconnect,
            shared: Arc::new(Shared {
                registry: EventRegistry::new(),
                link: Mutex::new(Link {
                    generation: 0,
                    state: ConnectionState::Disconnected,
                    outbound: None,
                }),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Create a manager from application configuration
    pub fn from_config(config: &Config) -> Self {
        Self::with_reconnect(config.relay.clone(), config.reconnect.clone())
    }

    /// Relay this manager connects to
    pub fn relay(&self) -> &RelayConfig {
        &self.relay
    }
}

// `wss://` relays need a process-level rustls provider
fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
            debug!(error = ?e, "Crypto provider already installed");
        }
    }
}

impl Transport for ConnectionManager {
    fn connect(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = worker.as_ref() {
            if !existing.handle.is_finished() {
                debug!("Connect requested while already connecting or connected");
                return;
            }
        }

        let url = match self.relay.websocket_url() {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Cannot connect: invalid relay configuration");
                return;
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                error!("Cannot connect: no Tokio runtime available");
                return;
            }
        };

        install_crypto_provider();

        let generation = self.shared.begin();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(url = %url, "Connecting to relay");

        let task = ConnectionTask {
            shared: self.shared.clone(),
            url,
            namespace: self.relay.namespace.clone(),
            reconnect: self.reconnect.clone(),
            generation,
        };
        let handle = runtime.spawn(task.run(shutdown_rx));

        *worker = Some(Worker {
            shutdown: shutdown_tx,
            handle,
        });
    }

    fn disconnect(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let Some(worker) = worker else {
            debug!("Disconnect requested with no active connection");
            return;
        };

        let _ = worker.shutdown.send(true);
        if self.shared.reset() {
            self.shared.registry.dispatch(DISCONNECT_EVENT, &[]);
        }
        info!("Disconnected from relay");
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), ChatError> {
        let outbound = {
            let link = self.shared.lock();
            match (&link.state, &link.outbound) {
                (ConnectionState::Connected, Some(outbound)) => outbound.clone(),
                _ => return Err(ChatError::NotConnected),
            }
        };

        let packet = SocketPacket::event(&self.relay.namespace, event, payload);
        let frame = EnginePacket::Message(packet.encode()).encode();
        debug!(event = %event, frame_len = frame.len(), "Emitting event");
        outbound.send(frame).map_err(|_| ChatError::NotConnected)
    }

    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        self.shared.registry.subscribe(event, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.registry.unsubscribe(id);
    }

    fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(active) = worker.take() {
                let _ = active.shutdown.send(true);
            }
        }
    }
}

/// How a single connection ended
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// `disconnect()` was called or the manager was dropped
    Requested,
    /// An established connection went away
    Lost,
}

struct ConnectionTask {
    shared: Arc<Shared>,
    url: String,
    namespace: String,
    reconnect: ReconnectPolicy,
    generation: u64,
}

impl ConnectionTask {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt = 0u32;
        loop {
            match self.run_once(&mut shutdown).await {
                Ok(SessionEnd::Requested) => break,
                Ok(SessionEnd::Lost) => {
                    attempt = 0;
                    if self.shared.mark_lost(self.generation) {
                        self.shared.registry.dispatch(DISCONNECT_EVENT, &[]);
                    }
                }
                Err(e) => {
                    error!(url = %self.url, error = %e, "Connection attempt failed");
                }
            }

            attempt += 1;
            let Some(delay) = self.reconnect.delay_for(attempt) else {
                break;
            };
            if !self.shared.set_state(self.generation, ConnectionState::Connecting) {
                break;
            }
            info!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to relay"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        if self.shared.mark_lost(self.generation) {
            self.shared.registry.dispatch(DISCONNECT_EVENT, &[]);
        }
        self.shared
            .set_state(self.generation, ConnectionState::Disconnected);
        debug!(url = %self.url, "Connection task finished");
    }

    async fn run_once(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, ChatError> {
        let (stream, _) = tokio::select! {
            connected = connect_async(self.url.as_str()) => connected?,
            _ = shutdown.changed() => return Ok(SessionEnd::Requested),
        };
        let (mut write, mut read) = stream.split();

        let handshake = tokio::select! {
            handshake = self.handshake(&mut write, &mut read) => handshake?,
            _ = shutdown.changed() => return Ok(SessionEnd::Requested),
        };

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        if !self.shared.mark_connected(self.generation, outbound_tx) {
            return Ok(SessionEnd::Requested);
        }
        info!(sid = %handshake.sid, "Connected to relay");
        self.shared.registry.dispatch(CONNECT_EVENT, &[]);

        let liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
        let mut deadline = Instant::now() + liveness;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let leave = SocketPacket::Disconnect { namespace: self.namespace.clone() };
                    let _ = write
                        .send(WsMessage::Text(EnginePacket::Message(leave.encode()).encode().into()))
                        .await;
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(SessionEnd::Requested);
                }
                Some(frame) = outbound_rx.recv() => {
                    if let Err(e) = write.send(WsMessage::Text(frame.into())).await {
                        warn!(error = %e, "Failed to write frame");
                        return Ok(SessionEnd::Lost);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(timeout_ms = liveness.as_millis() as u64, "Relay heartbeat timed out");
                    return Ok(SessionEnd::Lost);
                }
                incoming = read.next() => {
                    let message = match incoming {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            return Ok(SessionEnd::Lost);
                        }
                        None => {
                            warn!("Relay closed the connection");
                            return Ok(SessionEnd::Lost);
                        }
                    };
                    deadline = Instant::now() + liveness;
                    if let Some(end) = self.handle_frame(message, &mut write).await {
                        return Ok(end);
                    }
                }
            }
        }
    }

    /// Wait for the Engine.IO `open` packet, then join the namespace
    async fn handshake(
        &self,
        write: &mut WsSink,
        read: &mut WsSource,
    ) -> Result<Handshake, ChatError> {
        let mut opened = None;
        while let Some(message) = read.next().await {
            let text = match message? {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };

            match EnginePacket::decode(text.as_str())? {
                EnginePacket::Open(handshake) => {
                    debug!(
                        sid = %handshake.sid,
                        ping_interval = handshake.ping_interval,
                        "Engine.IO session opened"
                    );
                    let join = SocketPacket::Connect {
                        namespace: self.namespace.clone(),
                        data: None,
                    };
                    write
                        .send(WsMessage::Text(EnginePacket::Message(join.encode()).encode().into()))
                        .await?;
                    opened = Some(handshake);
                }
                EnginePacket::Ping => {
                    write
                        .send(WsMessage::Text(EnginePacket::Pong.encode().into()))
                        .await?;
                }
                EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                    SocketPacket::Connect { namespace, .. } if namespace == self.namespace => {
                        return opened.ok_or_else(|| {
                            ChatError::Handshake("namespace joined before open packet".to_string())
                        });
                    }
                    SocketPacket::ConnectError { data, .. } => {
                        return Err(ChatError::Handshake(format!(
                            "relay refused namespace {}: {}",
                            self.namespace,
                            data.unwrap_or(Value::Null)
                        )));
                    }
                    other => debug!(packet = ?other, "Ignoring packet during handshake"),
                },
                EnginePacket::Close => break,
                _ => {}
            }
        }
        Err(ChatError::Handshake(
            "connection closed during handshake".to_string(),
        ))
    }

    /// Handle one frame on an established connection
    async fn handle_frame(&self, message: WsMessage, write: &mut WsSink) -> Option<SessionEnd> {
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => {
                info!("Relay sent close frame");
                return Some(SessionEnd::Lost);
            }
            WsMessage::Binary(_) => {
                debug!("Ignoring binary frame");
                return None;
            }
            _ => return None,
        };

        let packet = match EnginePacket::decode(text.as_str()) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, "Ignoring undecodable frame");
                return None;
            }
        };

        match packet {
            EnginePacket::Ping => {
                if let Err(e) = write
                    .send(WsMessage::Text(EnginePacket::Pong.encode().into()))
                    .await
                {
                    warn!(error = %e, "Failed to answer heartbeat");
                    return Some(SessionEnd::Lost);
                }
            }
            EnginePacket::Close => return Some(SessionEnd::Lost),
            EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                Ok(SocketPacket::Event {
                    namespace,
                    name,
                    args,
                    ..
                }) if namespace == self.namespace => {
                    let handled = self.shared.registry.dispatch(&name, &args);
                    debug!(event = %name, handlers = handled, "Event received");
                }
                Ok(SocketPacket::Disconnect { namespace }) if namespace == self.namespace => {
                    info!(namespace = %namespace, "Relay closed the namespace");
                    return Some(SessionEnd::Lost);
                }
                Ok(other) => debug!(namespace = %other.namespace(), "Ignoring packet"),
                Err(e) => debug!(error = %e, "Ignoring undecodable packet"),
            },
            _ => {}
        }
        None
    }
}
