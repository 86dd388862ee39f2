//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! Engine.IO frames are a single type digit followed by an optional payload.
//! Socket.IO packets ride inside Engine.IO `message` frames:
//!
//! ```text
//! <type>[<namespace>,][<ack id>][<json>]
//! 42["sendMessage",{"userId":"a","message":"hi"}]
//! 42/admin,7["ping"]
//! ```

use crate::error::PacketError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default Socket.IO namespace
pub const DEFAULT_NAMESPACE: &str = "/";

/// Handshake body sent by the server in the Engine.IO `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine.IO session id
    pub sid: String,
    /// Transports the server can upgrade to (empty for websocket-only)
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval between server pings, in milliseconds
    pub ping_interval: u64,
    /// Time the server waits for a pong, in milliseconds
    pub ping_timeout: u64,
    /// Maximum payload size accepted by the server
    #[serde(default)]
    pub max_payload: u64,
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// `0` - session opened
    Open(Handshake),
    /// `1` - transport closing
    Close,
    /// `2` - heartbeat request
    Ping,
    /// `3` - heartbeat response
    Pong,
    /// `4` - carries a Socket.IO packet
    Message(String),
    /// `5` - transport upgrade (unused over websocket)
    Upgrade,
    /// `6` - no-op
    Noop,
}

impl EnginePacket {
    /// Decode a text frame
    pub fn decode(frame: &str) -> Result<Self, PacketError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let body = chars.as_str();

        match kind {
            '0' => serde_json::from_str(body)
                .map(EnginePacket::Open)
                .map_err(|e| PacketError::InvalidJson(e.to_string())),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    /// Encode into a text frame
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(handshake) => {
                // Handshake only holds strings and integers
                format!(
                    "0{}",
                    serde_json::to_string(handshake).unwrap_or_else(|_| "{}".to_string())
                )
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Message(body) => format!("4{}", body),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// `0` - namespace connect (client request or server confirmation)
    Connect {
        /// Namespace being joined
        namespace: String,
        /// Auth payload (client) or `{"sid": ...}` (server)
        data: Option<Value>,
    },
    /// `1` - namespace disconnect
    Disconnect {
        /// Namespace being left
        namespace: String,
    },
    /// `2` - named event with arguments
    Event {
        /// Namespace the event belongs to
        namespace: String,
        /// Acknowledgement id, if the sender wants an ack
        id: Option<u64>,
        /// Event name
        name: String,
        /// Event arguments (everything after the name)
        args: Vec<Value>,
    },
    /// `3` - acknowledgement of an earlier event
    Ack {
        /// Namespace of the acknowledged event
        namespace: String,
        /// Id of the acknowledged event
        id: u64,
        /// Ack arguments
        args: Vec<Value>,
    },
    /// `4` - namespace connection refused
    ConnectError {
        /// Namespace that refused the connection
        namespace: String,
        /// Error details sent by the server
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// Build an event packet on the given namespace without an ack id
    pub fn event(namespace: &str, name: &str, payload: Value) -> Self {
        SocketPacket::Event {
            namespace: namespace.to_string(),
            id: None,
            name: name.to_string(),
            args: vec![payload],
        }
    }

    /// Decode the body of an Engine.IO message frame
    pub fn decode(body: &str) -> Result<Self, PacketError> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(PacketError::BinaryUnsupported);
        }
        if !('0'..='4').contains(&kind) {
            return Err(PacketError::UnknownType(kind));
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(comma) => {
                    let nsp = &rest[..comma];
                    rest = &rest[comma + 1..];
                    nsp.to_string()
                }
                None => {
                    let nsp = rest.to_string();
                    rest = "";
                    nsp
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let id = if digits > 0 {
            let parsed = rest[..digits]
                .parse::<u64>()
                .map_err(|e| PacketError::MalformedEvent(e.to_string()))?;
            rest = &rest[digits..];
            Some(parsed)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(rest)
                    .map_err(|e| PacketError::InvalidJson(e.to_string()))?,
            )
        };

        match kind {
            '0' => Ok(SocketPacket::Connect { namespace, data }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut items = match data {
                    Some(Value::Array(items)) => items,
                    other => {
                        return Err(PacketError::MalformedEvent(format!(
                            "expected array, got {:?}",
                            other
                        )))
                    }
                };
                if items.is_empty() {
                    return Err(PacketError::MalformedEvent("missing event name".to_string()));
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(PacketError::MalformedEvent(format!(
                            "event name is not a string: {}",
                            other
                        )))
                    }
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    args: items,
                })
            }
            '3' => {
                let id = id.ok_or_else(|| PacketError::MalformedEvent("ack without id".to_string()))?;
                let args = match data {
                    Some(Value::Array(items)) => items,
                    None => Vec::new(),
                    Some(other) => vec![other],
                };
                Ok(SocketPacket::Ack { namespace, id, args })
            }
            _ => Ok(SocketPacket::ConnectError { namespace, data }),
        }
    }

    /// Encode into the body of an Engine.IO message frame
    pub fn encode(&self) -> String {
        let mut out = String::new();
        let (kind, namespace) = match self {
            SocketPacket::Connect { namespace, .. } => ('0', namespace),
            SocketPacket::Disconnect { namespace } => ('1', namespace),
            SocketPacket::Event { namespace, .. } => ('2', namespace),
            SocketPacket::Ack { namespace, .. } => ('3', namespace),
            SocketPacket::ConnectError { namespace, .. } => ('4', namespace),
        };
        out.push(kind);
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }

        match self {
            SocketPacket::Connect { data, .. } | SocketPacket::ConnectError { data, .. } => {
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
            }
            SocketPacket::Disconnect { .. } => {}
            SocketPacket::Event { id, name, args, .. } => {
                if let Some(id) = id {
                    out.push_str(&id.to_string());
                }
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                out.push_str(&Value::Array(items).to_string());
            }
            SocketPacket::Ack { id, args, .. } => {
                out.push_str(&id.to_string());
                out.push_str(&Value::Array(args.clone()).to_string());
            }
        }
        out
    }

    /// Namespace this packet belongs to
    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open_handshake() {
        let frame = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        match EnginePacket::decode(frame).unwrap() {
            EnginePacket::Open(handshake) => {
                assert_eq!(handshake.sid, "abc");
                assert_eq!(handshake.ping_interval, 25000);
                assert_eq!(handshake.ping_timeout, 20000);
            }
            other => panic!("Expected Open, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_engine_control_packets() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping);
        assert_eq!(EnginePacket::decode("2probe").unwrap(), EnginePacket::Ping);
        assert_eq!(EnginePacket::decode("3").unwrap(), EnginePacket::Pong);
        assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(EnginePacket::decode("").unwrap_err(), PacketError::Empty);
        assert_eq!(
            EnginePacket::decode("9").unwrap_err(),
            PacketError::UnknownType('9')
        );
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack_id() {
        let packet = SocketPacket::decode(r#"2/admin,12["kick",{"who":"b"}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/admin".to_string(),
                id: Some(12),
                name: "kick".to_string(),
                args: vec![json!({"who": "b"})],
            }
        );
    }

    #[test]
    fn test_decode_server_connect_confirmation() {
        let packet = SocketPacket::decode(r#"0{"sid":"xyz"}"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Connect {
                namespace: "/".to_string(),
                data: Some(json!({"sid": "xyz"})),
            }
        );
    }

    #[test]
    fn test_decode_rejects_malformed_events() {
        assert!(matches!(
            SocketPacket::decode(r#"2{"not":"array"}"#),
            Err(PacketError::MalformedEvent(_))
        ));
        assert!(matches!(
            SocketPacket::decode("2[]"),
            Err(PacketError::MalformedEvent(_))
        ));
        assert!(matches!(
            SocketPacket::decode("2[42]"),
            Err(PacketError::MalformedEvent(_))
        ));
        assert!(matches!(
            SocketPacket::decode("2[\"x\""),
            Err(PacketError::InvalidJson(_))
        ));
        assert_eq!(
            SocketPacket::decode(r#"51-["upload",{"_placeholder":true,"num":0}]"#).unwrap_err(),
            PacketError::BinaryUnsupported
        );
    }

    #[test]
    fn test_encode_event_on_default_namespace() {
        let packet = SocketPacket::event(
            DEFAULT_NAMESPACE,
            "sendMessage",
            json!({"userId": "a", "message": "hi"}),
        );
        let encoded = packet.encode();
        assert!(encoded.starts_with(r#"2["sendMessage","#));
        assert_eq!(SocketPacket::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_encode_connect_for_custom_namespace() {
        let packet = SocketPacket::Connect {
            namespace: "/chat".to_string(),
            data: None,
        };
        assert_eq!(packet.encode(), "0/chat,");
        assert_eq!(
            EnginePacket::Message(packet.encode()).encode(),
            "40/chat,"
        );
    }
}
