//! In-process transport
//!
//! Records every emitted event and lets the caller inject inbound events, so
//! session behavior can be exercised without a relay. With echo enabled it
//! mirrors `sendMessage` back as `receiveMessage`, the way the relay does.

use super::{ConnectionState, EventHandler, EventRegistry, SubscriptionId, Transport};
use super::{CONNECT_EVENT, DISCONNECT_EVENT};
use crate::chat::models::{RECEIVE_MESSAGE_EVENT, SEND_MESSAGE_EVENT};
use crate::error::ChatError;
use serde_json::Value;
use std::sync::Mutex;
use tracing::debug;

/// Transport that never leaves the process
#[derive(Default)]
pub struct MemoryTransport {
    registry: EventRegistry,
    state: Mutex<ConnectionState>,
    emitted: Mutex<Vec<(String, Value)>>,
    echo: bool,
    connect_calls: Mutex<usize>,
}

impl MemoryTransport {
    /// Create a transport that only records emits
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that echoes `sendMessage` back as `receiveMessage`
    pub fn with_echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Deliver an inbound event to subscribers as if it came off the wire
    pub fn inject(&self, event: &str, args: Vec<Value>) -> usize {
        debug!(event = %event, "Injecting inbound event");
        self.registry.dispatch(event, &args)
    }

    /// Every `(event, payload)` emitted so far, oldest first
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// How many times `connect` was called
    pub fn connect_calls(&self) -> usize {
        *self.connect_calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of handlers registered for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        self.registry.handler_count(event)
    }

    fn set_state(&self, next: ConnectionState) -> ConnectionState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *state, next)
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) {
        *self.connect_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if self.set_state(ConnectionState::Connected) != ConnectionState::Connected {
            self.registry.dispatch(CONNECT_EVENT, &[]);
        }
    }

    fn disconnect(&self) {
        if self.set_state(ConnectionState::Disconnected) == ConnectionState::Connected {
            self.registry.dispatch(DISCONNECT_EVENT, &[]);
        }
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), ChatError> {
        if self.state() != ConnectionState::Connected {
            return Err(ChatError::NotConnected);
        }
        self.emitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((event.to_string(), payload.clone()));

        if self.echo && event == SEND_MESSAGE_EVENT {
            self.registry.dispatch(RECEIVE_MESSAGE_EVENT, &[payload]);
        }
        Ok(())
    }

    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        self.registry.subscribe(event, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.unsubscribe(id);
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
