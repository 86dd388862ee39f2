//! Error types for the chat client
//!
//! Transport and codec failures are represented here so they can be logged with
//! context. None of them are surfaced to the presentation layer: the session
//! swallows them after logging.

use thiserror::Error;

/// Errors produced while decoding Engine.IO / Socket.IO text frames
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    /// Frame had no content at all
    #[error("Empty packet")]
    Empty,

    /// Leading type digit is not a known packet type
    #[error("Unknown packet type: {0}")]
    UnknownType(char),

    /// JSON body could not be parsed
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    /// Event packet did not carry an array whose first element is the event name
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Binary attachments are not supported by this client
    #[error("Binary packets are not supported")]
    BinaryUnsupported,
}

/// Crate-level error type
///
/// Covers connection, handshake and configuration failures.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Emit attempted while there is no live connection
    #[error("Not connected to relay")]
    NotConnected,

    /// WebSocket transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Engine.IO / Socket.IO handshake did not complete
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Frame could not be decoded
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// Configuration value is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Session actor has stopped and no longer accepts commands
    #[error("Chat session closed")]
    SessionClosed,
}
