//! Codec for encoding and decoding Chatterbox frames.
//!
//! Frames are UTF-8 JSON texts carried in WebSocket text messages. The
//! transport already provides message boundaries, so no extra framing is
//! applied on top of the JSON payload.

use serde_json::Value;
use thiserror::Error;

use crate::messages::{ClientMessage, JoinRequest, ServerEvent};

/// Maximum frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// The text is not valid JSON, or cannot serialize to JSON.
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON whose fields do not match its declared `"type"`.
    #[error("Invalid `{kind}` payload: {source}")]
    InvalidPayload {
        /// The discriminator the frame declared.
        kind: String,
        /// The underlying shape mismatch.
        #[source]
        source: serde_json::Error,
    },
}

/// Encode a server event to its JSON text form.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_event(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode the implicit first frame of a connection.
///
/// Any JSON object is accepted; missing `username`/`room` fields are left
/// for the caller to default via [`JoinRequest::username`] and
/// [`JoinRequest::room`].
///
/// # Errors
///
/// Returns an error if the text is oversized, not valid JSON, or not an
/// object with string fields where present.
pub fn decode_join(text: &str) -> Result<JoinRequest, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(serde_json::from_str(text)?)
}

/// Decode one inbound frame from a joined client.
///
/// A frame without a usable string `"type"` field decodes to
/// [`ClientMessage::Unknown`] rather than an error: the relay ignores what
/// it does not understand, it only rejects what it cannot parse.
///
/// # Errors
///
/// Returns an error if the text is oversized, not valid JSON, or declares
/// a known `"type"` with fields of the wrong shape.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(|kind| kind.to_owned());

    match kind {
        None => Ok(ClientMessage::Unknown),
        Some(kind) => serde_json::from_value(value)
            .map_err(|source| ProtocolError::InvalidPayload { kind, source }),
    }
}
