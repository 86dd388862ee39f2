//! Socket Chat
//!
//! Message synchronization engine for a two-party real-time chat client.
//! [`socket::ConnectionManager`] owns the relay connection and
//! [`chat::ChatSession`] keeps the ordered, deduplicated transcript.

pub mod chat;
pub mod config;
pub mod error;
pub mod relay;
pub mod socket;
pub mod transport;

pub use chat::{ChatSession, Message, Transcript, TranscriptUpdate};
pub use config::Config;
pub use error::ChatError;
pub use socket::ConnectionManager;
pub use transport::{ConnectionState, MemoryTransport, Transport};
