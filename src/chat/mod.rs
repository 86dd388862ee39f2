//! Chat module
//!
//! Handles the transcript, message attribution and the send/receive protocol.

pub mod models;
pub mod session;

pub use models::{ChatPayload, Message, Transcript};
pub use session::{ChatSession, ListenerId, SessionState, TranscriptUpdate};
