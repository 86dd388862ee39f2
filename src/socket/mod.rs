//! Socket.IO client
//!
//! Wire codec and the connection manager that speaks it over a WebSocket.

pub mod connection;
pub mod packet;

pub use connection::ConnectionManager;
pub use packet::{EnginePacket, Handshake, SocketPacket, DEFAULT_NAMESPACE};
