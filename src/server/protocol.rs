//! Protocol message definitions
//!
//! Defines the transport frames delivered by a socket and the JSON envelope
//! carried inside text frames. The envelope's `type` field doubles as the
//! event name used for dispatch.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field holding the message kind inside an envelope
pub const TYPE_FIELD: &str = "type";

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Missing or non-string `type` field")]
    MissingType,
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Transport Frames
// ============================================================================

/// A single delivery unit from the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text frame carrying application JSON
    Utf8(String),
    /// Anything else; not part of the application protocol
    Binary(Vec<u8>),
}

impl Frame {
    /// Transport tag of the frame (`utf8` or `binary`)
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Utf8(_) => "utf8",
            Frame::Binary(_) => "binary",
        }
    }

    /// Text payload, if this is a text frame
    pub fn utf8_data(&self) -> Option<&str> {
        match self {
            Frame::Utf8(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }

    /// Payload length in bytes
    pub fn payload_len(&self) -> usize {
        match self {
            Frame::Utf8(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }
}

// ============================================================================
// Message Envelope
// ============================================================================

/// Application-level message: a `type` plus arbitrary payload fields
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    kind: String,
    payload: Map<String, Value>,
}

impl Envelope {
    /// Parse an envelope from JSON text
    ///
    /// The body must be a JSON object whose `type` is a string.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        let Value::Object(mut payload) = value else {
            return Err(ProtocolError::InvalidMessage(
                "envelope must be a JSON object".to_string(),
            ));
        };

        match payload.remove(TYPE_FIELD) {
            Some(Value::String(kind)) => Ok(Self { kind, payload }),
            _ => Err(ProtocolError::MissingType),
        }
    }

    /// Message kind, used as the dispatch event name
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Decode the payload into a typed structure
    pub fn payload_as<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_value(Value::Object(self.payload.clone()))?)
    }
}

// ============================================================================
// Malformed Frame Handling
// ============================================================================

/// What a handler does with a text frame that is not a valid envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedFramePolicy {
    /// Log and drop the frame, keep the connection open
    #[default]
    Drop,
    /// Log and ask the transport to close the connection
    Disconnect,
}

// ============================================================================
// Tests
// ============================================================================
