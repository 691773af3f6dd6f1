//! # chatterbox-protocol
//!
//! Wire protocol definitions for the Chatterbox chat relay.
//!
//! This crate defines the JSON text protocol spoken over WebSocket between
//! Chatterbox clients and servers: the implicit join request, the tagged
//! client messages, and the events the server broadcasts back.
//!
//! ## Message Types
//!
//! - `JoinRequest` - First frame of a connection, names a user and room
//! - `ClientMessage` - `chat`, `typing`, `stop_typing` from a member
//! - `ServerEvent` - `system`, `chat`, `typing`, `stop_typing` to a room
//!
//! ## Example
//!
//! ```rust
//! use chatterbox_protocol::{codec, ServerEvent};
//!
//! // Create a broadcast event using the helper method
//! let event = ServerEvent::chat("Alice", "Hello, world!");
//!
//! // Encode to the wire text
//! let text = codec::encode_event(&event).unwrap();
//! let parsed = codec::decode_client_message(r#"{"type":"typing"}"#).unwrap();
//! ```

pub mod codec;
pub mod messages;

pub use codec::{decode_client_message, decode_join, encode_event, ProtocolError};
pub use messages::{ClientMessage, JoinRequest, ServerEvent, DEFAULT_ROOM, DEFAULT_USERNAME};
