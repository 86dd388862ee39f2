//! Transport abstraction
//!
//! The chat session talks to the relay only through [`Transport`]. The
//! production implementation is [`crate::socket::ConnectionManager`];
//! [`MemoryTransport`] is an in-process stand-in for tests and demos.

pub mod memory;
pub mod registry;

pub use memory::MemoryTransport;
pub use registry::{EventHandler, EventRegistry, SubscriptionId};

use crate::error::ChatError;
use serde::Serialize;
use serde_json::Value;

/// Client-side event dispatched once the namespace handshake completes
pub const CONNECT_EVENT: &str = "connect";

/// Client-side event dispatched when an established connection goes away
pub const DISCONNECT_EVENT: &str = "disconnect";

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection and no attempt in progress
    #[default]
    Disconnected,
    /// Handshake (or reconnect backoff) in progress
    Connecting,
    /// Namespace joined; events flow in both directions
    Connected,
}

/// Bidirectional named-event transport
///
/// Every method is non-blocking. `connect` and `disconnect` only start work
/// on background tasks, and `emit` only queues a frame.
pub trait Transport: Send + Sync {
    /// Start connecting. No-op if already connected or connecting.
    fn connect(&self);

    /// Tear the connection down. No-op if never connected.
    fn disconnect(&self);

    /// Publish a named event with a single JSON argument
    fn emit(&self, event: &str, payload: Value) -> Result<(), ChatError>;

    /// Register a handler for a named event
    ///
    /// Handlers run on the transport's read path in registration order and
    /// must return quickly.
    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId;

    /// Remove a previously registered handler
    fn unsubscribe(&self, id: SubscriptionId);

    /// Current connection state
    fn state(&self) -> ConnectionState;
}
