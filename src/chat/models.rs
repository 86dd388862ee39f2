//! Chat data models
//!
//! Defines messages, the wire payload and read-only transcript snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Outbound event carrying a locally authored message
pub const SEND_MESSAGE_EVENT: &str = "sendMessage";

/// Inbound event carrying a message relayed by the server
pub const RECEIVE_MESSAGE_EVENT: &str = "receiveMessage";

/// A single message in the transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the transcript, starting at 0
    pub sequence: usize,
    /// Author's session id
    pub user_id: String,
    /// Message body
    pub text: String,
}

/// Payload of `sendMessage` / `receiveMessage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Author's session id
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Message body
    pub message: String,
}

impl ChatPayload {
    /// Create a payload
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
        }
    }

    /// Extract a payload from inbound event arguments
    ///
    /// Only the first argument is inspected; it must be an object with string
    /// `userId` and `message` fields. Extra fields and trailing arguments are
    /// ignored. Returns `None` for anything else.
    pub fn from_event_args(args: &[Value]) -> Option<Self> {
        let object = args.first()?.as_object()?;
        let user_id = object.get("userId")?.as_str()?;
        let message = object.get("message")?.as_str()?;
        Some(Self::new(user_id, message))
    }

    /// JSON value sent on the wire
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "userId": self.user_id,
            "message": self.message,
        })
    }
}

/// Immutable view of the transcript at one point in time
///
/// Cheap to clone. A snapshot never changes; fetch a new one after each
/// update notification.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Arc<Vec<Message>>,
    current_user_id: Arc<str>,
}

impl Transcript {
    pub(crate) fn new(messages: Arc<Vec<Message>>, current_user_id: Arc<str>) -> Self {
        Self {
            messages,
            current_user_id,
        }
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the transcript has no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Message at `index`, in display order
    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Most recent message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Iterate messages in display order
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// Whether `message` was authored by this session
    pub fn is_own(&self, message: &Message) -> bool {
        message.user_id == *self.current_user_id
    }

    /// Id of the session this transcript belongs to
    pub fn current_user_id(&self) -> &str {
        &self.current_user_id
    }

    /// Messages as a slice
    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
