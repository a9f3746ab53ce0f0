//! # Error Types
//!
//! The error taxonomy shared by both peers. `ErrorKind` is the wire form
//! carried in ERROR payloads; `BridgeError` is what callers see.

use crate::envelope::MessageType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error classification, serialized in SCREAMING_SNAKE_CASE on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    OriginMismatch,
    MalformedMessage,
    StaleHandshake,
    HandshakeTimeout,
    HandshakeFailed,
    RequestTimeout,
    DuplicateId,
    NoHandler,
    SessionNotConnected,
    /// The responder's handler returned an error.
    HandlerFailed,
    /// The platform refused to send.
    Transport,
    /// The engine loop is no longer running.
    EngineStopped,
    /// A kind this build does not know about.
    #[serde(other)]
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OriginMismatch => "ORIGIN_MISMATCH",
            Self::MalformedMessage => "MALFORMED_MESSAGE",
            Self::StaleHandshake => "STALE_HANDSHAKE",
            Self::HandshakeTimeout => "HANDSHAKE_TIMEOUT",
            Self::HandshakeFailed => "HANDSHAKE_FAILED",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::DuplicateId => "DUPLICATE_ID",
            Self::NoHandler => "NO_HANDLER",
            Self::SessionNotConnected => "SESSION_NOT_CONNECTED",
            Self::HandlerFailed => "HANDLER_FAILED",
            Self::Transport => "TRANSPORT",
            Self::EngineStopped => "ENGINE_STOPPED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an inbound envelope was dropped at the transport boundary.
///
/// Never sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Origin outside the trust set, or not the pinned peer.
    OriginMismatch,
    /// Undecodable, or missing fields for its type.
    Malformed,
    /// Handshake envelope older than the last accepted one beyond the skew.
    Stale,
}

impl RejectReason {
    /// The taxonomy entry for this rejection.
    #[must_use]
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::OriginMismatch => ErrorKind::OriginMismatch,
            Self::Malformed => ErrorKind::MalformedMessage,
            Self::Stale => ErrorKind::StaleHandshake,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OriginMismatch => write!(f, "ORIGIN_MISMATCH"),
            Self::Malformed => write!(f, "MALFORMED"),
            Self::Stale => write!(f, "STALE"),
        }
    }
}

/// Envelope shape violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("Envelope id is empty")]
    EmptyId,

    #[error("{kind} envelope is missing required field `{field}`")]
    MissingField {
        kind: MessageType,
        field: &'static str,
    },
}

/// Errors surfaced to callers of the bridge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Traffic attempted outside a CONNECTED session.
    #[error("Session not connected (state: {state})")]
    SessionNotConnected { state: String },

    /// No HANDSHAKE_ACK/COMPLETE within the handshake timeout.
    #[error("Handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    /// Nonce mismatch, version mismatch or a rejected handshake envelope.
    #[error("Handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    /// No RESPONSE within the request timeout.
    #[error("Request on {channel} timed out after {timeout_ms}ms")]
    RequestTimeout { channel: String, timeout_ms: u64 },

    /// A generated id collided with a pending request.
    #[error("Duplicate envelope id {id}")]
    DuplicateId { id: String },

    /// A response payload could not be decoded into the expected type.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The platform refused to send the envelope.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The engine loop has stopped.
    #[error("Bridge engine stopped")]
    EngineStopped,

    /// The peer answered with an ERROR envelope.
    #[error("Remote error {kind}: {message}")]
    Remote { kind: ErrorKind, message: String },
}

impl BridgeError {
    /// The taxonomy entry for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotConnected { .. } => ErrorKind::SessionNotConnected,
            Self::HandshakeTimeout { .. } => ErrorKind::HandshakeTimeout,
            Self::HandshakeFailed { .. } => ErrorKind::HandshakeFailed,
            Self::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            Self::DuplicateId { .. } => ErrorKind::DuplicateId,
            Self::Malformed(_) => ErrorKind::MalformedMessage,
            Self::Transport(_) => ErrorKind::Transport,
            Self::EngineStopped => ErrorKind::EngineStopped,
            Self::Remote { kind, .. } => *kind,
        }
    }

    pub fn not_connected(state: impl fmt::Display) -> Self {
        Self::SessionNotConnected {
            state: state.to_string(),
        }
    }
}
