//! Message types for the Chatterbox wire protocol.
//!
//! Every frame on the wire is a JSON object carried as a WebSocket text
//! message. Inbound frames after the join are tagged by a `"type"` field;
//! the join request itself is the untagged first frame of a connection.

use serde::{Deserialize, Serialize};

/// Username assumed when a join request omits one.
pub const DEFAULT_USERNAME: &str = "Anonymous";

/// Room assumed when a join request omits one.
pub const DEFAULT_ROOM: &str = "general";

/// The implicit first message of every connection.
///
/// Both fields are optional; an absent or empty value falls back to
/// [`DEFAULT_USERNAME`] or [`DEFAULT_ROOM`]. Extra fields are ignored, so
/// any JSON object is a valid join request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Requested display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Room to join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl JoinRequest {
    /// Create a join request with an explicit username and room.
    #[must_use]
    pub fn new(username: impl Into<String>, room: impl Into<String>) -> Self {
        JoinRequest {
            username: Some(username.into()),
            room: Some(room.into()),
        }
    }

    /// The username to register, with the default applied.
    #[must_use]
    pub fn username(&self) -> &str {
        match self.username.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_USERNAME,
        }
    }

    /// The room to register in, with the default applied.
    #[must_use]
    pub fn room(&self) -> &str {
        match self.room.as_deref() {
            Some(room) if !room.is_empty() => room,
            _ => DEFAULT_ROOM,
        }
    }
}

/// A message sent by a client after it has joined a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// A chat line for the sender's room.
    #[serde(rename = "chat")]
    Chat {
        /// Message text. Leading and trailing whitespace is trimmed before
        /// relay; a frame that trims to nothing is dropped.
        #[serde(default)]
        message: String,
    },

    /// The sender started typing.
    #[serde(rename = "typing")]
    Typing,

    /// The sender stopped typing.
    #[serde(rename = "stop_typing")]
    StopTyping,

    /// Any frame whose discriminator is not recognized. Ignored, so newer
    /// clients can speak to older servers without being disconnected.
    #[serde(other, rename = "unknown")]
    Unknown,
}

impl ClientMessage {
    /// Create a new Chat message.
    #[must_use]
    pub fn chat(message: impl Into<String>) -> Self {
        ClientMessage::Chat {
            message: message.into(),
        }
    }
}

/// An event broadcast by the server to the members of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A server-generated announcement, such as a join or leave notice.
    #[serde(rename = "system")]
    System {
        /// Announcement text.
        message: String,
    },

    /// A relayed chat line.
    #[serde(rename = "chat")]
    Chat {
        /// Display name of the sender.
        username: String,
        /// Message text, already trimmed.
        message: String,
    },

    /// A member started typing.
    #[serde(rename = "typing")]
    Typing {
        /// Display name of the member.
        username: String,
    },

    /// A member stopped typing.
    #[serde(rename = "stop_typing")]
    StopTyping {
        /// Display name of the member.
        username: String,
    },
}

impl ServerEvent {
    /// Create a new System event.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        ServerEvent::System {
            message: message.into(),
        }
    }

    /// Create a new Chat event.
    #[must_use]
    pub fn chat(username: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Chat {
            username: username.into(),
            message: message.into(),
        }
    }

    /// Create a new Typing event.
    #[must_use]
    pub fn typing(username: impl Into<String>) -> Self {
        ServerEvent::Typing {
            username: username.into(),
        }
    }

    /// Create a new StopTyping event.
    #[must_use]
    pub fn stop_typing(username: impl Into<String>) -> Self {
        ServerEvent::StopTyping {
            username: username.into(),
        }
    }

    /// The announcement broadcast when a member joins a room.
    #[must_use]
    pub fn joined(username: &str, room: &str) -> Self {
        ServerEvent::system(format!("{username} joined {room} room"))
    }

    /// The announcement broadcast when a member leaves a room.
    #[must_use]
    pub fn left(username: &str, room: &str) -> Self {
        ServerEvent::system(format!("{username} left {room} room"))
    }
}
