//! Chat Session
//!
//! Owns the transcript for one chat and applies the send/receive protocol.
//!
//! All transcript mutations happen on a single actor task. The public handle
//! and the transport's inbound handler both post commands into one channel,
//! so a local send and a relayed receive can never race. Readers get
//! immutable snapshots published after every mutation.

use super::models::{ChatPayload, Message, Transcript, RECEIVE_MESSAGE_EVENT, SEND_MESSAGE_EVENT};
use crate::error::ChatError;
use crate::transport::{
    ConnectionState, SubscriptionId, Transport, CONNECT_EVENT, DISCONNECT_EVENT,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Callback invoked after every transcript mutation
///
/// Carries no payload; re-read the transcript via [`ChatSession::transcript`].
pub type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`ChatSession::on_messages_updated`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed; waiting for the transport's `connect` event
    Connecting,
    /// Transport reported `connect` at least once
    Active,
}

/// One accepted transcript mutation, as delivered on [`ChatSession::updates`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptUpdate {
    /// Local echo of a message sent by this session
    Sent(Message),
    /// Message relayed from another participant
    Received(Message),
}

impl TranscriptUpdate {
    /// The appended message
    pub fn message(&self) -> &Message {
        match self {
            TranscriptUpdate::Sent(message) | TranscriptUpdate::Received(message) => message,
        }
    }
}

enum SessionCommand {
    Send {
        text: String,
        done: oneshot::Sender<Message>,
    },
    Inbound(Vec<Value>),
    Connected,
    AddListener(ListenerId, UpdateCallback),
    RemoveListener(ListenerId),
    AddStream(mpsc::UnboundedSender<TranscriptUpdate>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to a running chat session
///
/// Constructing a session spawns its actor task and asks the transport to
/// connect, so it must be created inside a Tokio runtime.
pub struct ChatSession {
    current_user_id: Arc<str>,
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshot: watch::Receiver<Arc<Vec<Message>>>,
    state: watch::Receiver<SessionState>,
    subscriptions: Vec<SubscriptionId>,
    next_listener: AtomicU64,
    actor: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Create a session with a freshly generated user id and connect
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_user_id(transport, Uuid::new_v4().to_string())
    }

    /// Create a session with a caller-chosen user id and connect
    ///
    /// Subscribes to the chat and lifecycle events, then asks the transport
    /// to connect. A transport that is already connected puts the session
    /// straight into [`SessionState::Active`].
    ///
    /// # Arguments
    /// * `transport` - Shared transport the session publishes through
    /// * `user_id` - Identity used for attribution and echo suppression
    ///
    /// # Returns
    /// * `ChatSession` - Handle to the running session actor
    pub fn with_user_id(transport: Arc<dyn Transport>, user_id: impl Into<String>) -> Self {
        let current_user_id: Arc<str> = Arc::from(user_id.into());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(Arc::new(Vec::new()));
        let (state_tx, state) = watch::channel(SessionState::Connecting);

        let actor = SessionActor {
            current_user_id: current_user_id.clone(),
            transport: transport.clone(),
            messages: Arc::new(Vec::new()),
            snapshot: snapshot_tx,
            state: state_tx,
            listeners: Vec::new(),
            streams: Vec::new(),
        };
        let actor = tokio::spawn(actor.run(command_rx));

        let receive_tx = commands.clone();
        let receive = transport.subscribe(
            RECEIVE_MESSAGE_EVENT,
            Arc::new(move |args: &[Value]| {
                let _ = receive_tx.send(SessionCommand::Inbound(args.to_vec()));
            }),
        );

        let connect_tx = commands.clone();
        let connect = transport.subscribe(
            CONNECT_EVENT,
            Arc::new(move |_: &[Value]| {
                info!("Socket connected");
                let _ = connect_tx.send(SessionCommand::Connected);
            }),
        );

        let disconnect = transport.subscribe(
            DISCONNECT_EVENT,
            Arc::new(|_: &[Value]| {
                warn!("Socket disconnected");
            }),
        );

        info!(user_id = %current_user_id, "Chat session created");
        transport.connect();
        if transport.state() == ConnectionState::Connected {
            let _ = commands.send(SessionCommand::Connected);
        }

        Self {
            current_user_id,
            transport,
            commands,
            snapshot,
            state,
            subscriptions: vec![receive, connect, disconnect],
            next_listener: AtomicU64::new(0),
            actor: Some(actor),
        }
    }

    /// This session's user id
    pub fn current_user_id(&self) -> &str {
        &self.current_user_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Snapshot of the transcript as of the last applied mutation
    pub fn transcript(&self) -> Transcript {
        Transcript::new(self.snapshot.borrow().clone(), self.current_user_id.clone())
    }

    /// Publish `text` and append it to the transcript as a local echo
    ///
    /// The caller is responsible for rejecting empty input. Publish failures
    /// are logged and otherwise ignored; when this returns, the message is
    /// already visible in [`ChatSession::transcript`].
    ///
    /// # Arguments
    /// * `text` - Message body to publish
    ///
    /// # Returns
    /// * `Ok(Message)` - The appended local echo
    /// * `Err(ChatError::SessionClosed)` - The session actor has stopped
    pub async fn send_message(&self, text: impl Into<String>) -> Result<Message, ChatError> {
        let (done, appended) = oneshot::channel();
        self.commands
            .send(SessionCommand::Send {
                text: text.into(),
                done,
            })
            .map_err(|_| ChatError::SessionClosed)?;
        appended.await.map_err(|_| ChatError::SessionClosed)
    }

    /// Register a callback invoked once after every transcript mutation
    ///
    /// Callbacks run on the session's actor task. Keep them short and hand
    /// UI work off to the UI's own loop.
    pub fn on_messages_updated<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let _ = self
            .commands
            .send(SessionCommand::AddListener(id, Arc::new(callback)));
        id
    }

    /// Remove a callback registered with [`ChatSession::on_messages_updated`]
    pub fn remove_listener(&self, id: ListenerId) {
        let _ = self.commands.send(SessionCommand::RemoveListener(id));
    }

    /// Stream of every mutation applied after this call, in append order
    pub fn updates(&self) -> mpsc::UnboundedReceiver<TranscriptUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(SessionCommand::AddStream(tx));
        rx
    }

    /// Wait until every command queued before this call has been applied
    pub async fn flush(&self) -> Result<(), ChatError> {
        let (done, flushed) = oneshot::channel();
        self.commands
            .send(SessionCommand::Flush(done))
            .map_err(|_| ChatError::SessionClosed)?;
        flushed.await.map_err(|_| ChatError::SessionClosed)
    }

    /// Stop the actor task and detach from the transport
    ///
    /// The transport itself stays up; it is owned by whoever created it.
    pub async fn shutdown(mut self) {
        self.detach();
        let _ = self.commands.send(SessionCommand::Shutdown);
        if let Some(actor) = self.actor.take() {
            let _ = actor.await;
        }
        debug!(user_id = %self.current_user_id, "Chat session shut down");
    }

    fn detach(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.transport.unsubscribe(id);
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.detach();
        let _ = self.commands.send(SessionCommand::Shutdown);
    }
}

struct SessionActor {
    current_user_id: Arc<str>,
    transport: Arc<dyn Transport>,
    messages: Arc<Vec<Message>>,
    snapshot: watch::Sender<Arc<Vec<Message>>>,
    state: watch::Sender<SessionState>,
    listeners: Vec<(ListenerId, UpdateCallback)>,
    streams: Vec<mpsc::UnboundedSender<TranscriptUpdate>>,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                SessionCommand::Send { text, done } => {
                    let message = self.send(text);
                    let _ = done.send(message);
                }
                SessionCommand::Inbound(args) => self.receive(&args),
                SessionCommand::Connected => {
                    self.state.send_replace(SessionState::Active);
                }
                SessionCommand::AddListener(id, callback) => self.listeners.push((id, callback)),
                SessionCommand::RemoveListener(id) => {
                    self.listeners.retain(|(existing, _)| *existing != id)
                }
                SessionCommand::AddStream(tx) => self.streams.push(tx),
                SessionCommand::Flush(done) => {
                    let _ = done.send(());
                }
                SessionCommand::Shutdown => break,
            }
        }
        debug!(user_id = %self.current_user_id, "Session actor stopped");
    }

    fn send(&mut self, text: String) -> Message {
        let payload = ChatPayload::new(&*self.current_user_id, text.as_str());
        if let Err(e) = self.transport.emit(SEND_MESSAGE_EVENT, payload.to_value()) {
            warn!(
                user_id = %self.current_user_id,
                error = %e,
                "Failed to publish message; keeping local echo"
            );
        }

        let message = self.append(self.current_user_id.to_string(), text);
        self.notify(TranscriptUpdate::Sent(message.clone()));
        message
    }

    fn receive(&mut self, args: &[Value]) {
        let Some(payload) = ChatPayload::from_event_args(args) else {
            debug!(args = ?args, "Dropping malformed receiveMessage payload");
            return;
        };

        if payload.user_id == *self.current_user_id {
            debug!("Dropping echo of own message");
            return;
        }

        debug!(from = %payload.user_id, "Message received");
        let message = self.append(payload.user_id, payload.message);
        self.notify(TranscriptUpdate::Received(message));
    }

    fn append(&mut self, user_id: String, text: String) -> Message {
        let message = Message {
            sequence: self.messages.len(),
            user_id,
            text,
        };
        Arc::make_mut(&mut self.messages).push(message.clone());
        self.snapshot.send_replace(self.messages.clone());
        message
    }

    fn notify(&mut self, update: TranscriptUpdate) {
        for (_, callback) in &self.listeners {
            callback();
        }
        self.streams.retain(|tx| tx.send(update.clone()).is_ok());
    }
}
