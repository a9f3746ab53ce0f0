//! # Message Envelope
//!
//! The universal wire unit exchanged between the host window and the embedded
//! client window.
//!
//! ## Security Properties
//!
//! - **Transport Authority**: `origin` and `timestamp` are overwritten by the
//!   receiving transport from the platform event. Values written by the sender
//!   are informational only.
//! - **Correlation**: RESPONSE and ERROR envelopes carry the `id` of the
//!   originating REQUEST in `correlation_id`.
//! - **Uniqueness**: `id` is unique per sender within one session.

use crate::channel::Channel;
use crate::errors::ShapeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Sender-assigned envelope identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh random identifier (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty id never identifies anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Protocol role of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    HandshakeInit,
    HandshakeAck,
    HandshakeComplete,
    Request,
    Response,
    Event,
    Subscribe,
    Unsubscribe,
    Error,
}

impl MessageType {
    /// True for the three handshake envelope types.
    #[must_use]
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            Self::HandshakeInit | Self::HandshakeAck | Self::HandshakeComplete
        )
    }

    /// Wire name of this type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HandshakeInit => "HANDSHAKE_INIT",
            Self::HandshakeAck => "HANDSHAKE_ACK",
            Self::HandshakeComplete => "HANDSHAKE_COMPLETE",
            Self::Request => "REQUEST",
            Self::Response => "RESPONSE",
            Self::Event => "EVENT",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The message envelope for all cross-context traffic.
///
/// Wire shape: `{ id, type, channel?, correlationId?, payload?, origin, timestamp }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Sender-assigned identifier, unique within the session.
    pub id: MessageId,

    /// Protocol role.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Logical resource key for REQUEST/RESPONSE/EVENT/SUBSCRIBE/UNSUBSCRIBE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,

    /// Id of the REQUEST this envelope answers (RESPONSE, ERROR, HANDSHAKE_ACK).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<MessageId>,

    /// Opaque type/channel specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Sending context. Stamped by the receiving transport.
    #[serde(default)]
    pub origin: String,

    /// Milliseconds timestamp. Stamped by the receiving transport.
    #[serde(default)]
    pub timestamp: u64,
}

impl Envelope {
    /// Create an envelope of the given type with a fresh id.
    #[must_use]
    pub fn new(kind: MessageType) -> Self {
        Self {
            id: MessageId::generate(),
            kind,
            channel: None,
            correlation_id: None,
            payload: None,
            origin: String::new(),
            timestamp: 0,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    #[must_use]
    pub fn with_correlation(mut self, correlation_id: MessageId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// A REQUEST on `channel`.
    #[must_use]
    pub fn request(channel: Channel, payload: serde_json::Value) -> Self {
        Self::new(MessageType::Request)
            .with_channel(channel)
            .with_payload(payload)
    }

    /// A RESPONSE to `request`, echoing its channel.
    #[must_use]
    pub fn response_to(request: &Envelope, payload: serde_json::Value) -> Self {
        let mut env = Self::new(MessageType::Response)
            .with_correlation(request.id.clone())
            .with_payload(payload);
        env.channel = request.channel.clone();
        env
    }

    /// An EVENT on `channel`.
    #[must_use]
    pub fn event(channel: Channel, payload: serde_json::Value) -> Self {
        Self::new(MessageType::Event)
            .with_channel(channel)
            .with_payload(payload)
    }

    /// Check that the fields required by the declared type are present.
    ///
    /// # Errors
    ///
    /// Returns the first missing or invalid field.
    pub fn check_shape(&self) -> Result<(), ShapeError> {
        if self.id.is_empty() {
            return Err(ShapeError::EmptyId);
        }

        match self.kind {
            MessageType::HandshakeInit | MessageType::HandshakeComplete => {
                self.require_payload()?;
            }
            MessageType::HandshakeAck => {
                self.require_payload()?;
                self.require_correlation()?;
            }
            MessageType::Request
            | MessageType::Event
            | MessageType::Subscribe
            | MessageType::Unsubscribe => {
                self.require_channel()?;
            }
            MessageType::Response => {
                self.require_correlation()?;
            }
            MessageType::Error => {
                // Either answers a REQUEST or is scoped to a subscribed channel.
                if self.correlation_id.is_none() && self.channel.is_none() {
                    return Err(ShapeError::MissingField {
                        kind: self.kind,
                        field: "correlationId|channel",
                    });
                }
                self.require_payload()?;
            }
        }

        Ok(())
    }

    fn require_channel(&self) -> Result<(), ShapeError> {
        match self.channel {
            Some(_) => Ok(()),
            None => Err(ShapeError::MissingField {
                kind: self.kind,
                field: "channel",
            }),
        }
    }

    fn require_correlation(&self) -> Result<(), ShapeError> {
        match &self.correlation_id {
            Some(id) if !id.is_empty() => Ok(()),
            _ => Err(ShapeError::MissingField {
                kind: self.kind,
                field: "correlationId",
            }),
        }
    }

    fn require_payload(&self) -> Result<(), ShapeError> {
        match self.payload {
            Some(_) => Ok(()),
            None => Err(ShapeError::MissingField {
                kind: self.kind,
                field: "payload",
            }),
        }
    }

    /// Serialize to the JSON wire form.
    ///
    /// # Errors
    ///
    /// Fails only if the payload cannot be represented as JSON.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse the JSON wire form. No shape check is applied.
    ///
    /// # Errors
    ///
    /// Fails on invalid JSON, unknown `type`, or an invalid channel name.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
