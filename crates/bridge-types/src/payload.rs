//! # Protocol Payloads
//!
//! Typed payloads for the handshake envelopes and for ERROR envelopes.
//! Application payloads on REQUEST/RESPONSE/EVENT stay opaque JSON.

use crate::errors::{BridgeError, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opening handshake message from the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeInit {
    /// Initiator's protocol version.
    pub version: u16,
    /// Initiator nonce, echoed back in the ACK.
    pub nonce: Uuid,
}

/// Responder's answer to a HANDSHAKE_INIT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeAck {
    /// Responder's protocol version.
    pub version: u16,
    /// The initiator nonce from the INIT.
    pub echo: Uuid,
    /// Fresh responder nonce, echoed back in the COMPLETE.
    pub nonce: Uuid,
}

/// Final handshake message from the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeComplete {
    /// The responder nonce from the ACK.
    pub echo: Uuid,
}

/// Payload of an ERROR envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    #[serde(default)]
    pub message: String,
}

impl ErrorPayload {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Decode from an envelope payload. Anything unreadable becomes `UNKNOWN`.
    #[must_use]
    pub fn from_value(value: Option<&serde_json::Value>) -> Self {
        value
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_else(|| Self::new(ErrorKind::Unknown, "unreadable error payload"))
    }

    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind,
            "message": self.message,
        })
    }

    /// The caller-facing error for this payload.
    #[must_use]
    pub fn into_error(self) -> BridgeError {
        BridgeError::Remote {
            kind: self.kind,
            message: self.message,
        }
    }
}

/// Decode a typed payload out of an optional JSON value.
///
/// # Errors
///
/// Returns the serde error when the value is absent or has the wrong shape.
pub fn decode_payload<T: serde::de::DeserializeOwned>(
    value: Option<&serde_json::Value>,
) -> Result<T, serde_json::Error> {
    let value = value.cloned().unwrap_or(serde_json::Value::Null);
    serde_json::from_value(value)
}
