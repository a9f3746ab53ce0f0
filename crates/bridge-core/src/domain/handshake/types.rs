//! Handshake data types.

use bridge_types::{BridgeError, Envelope};
use std::fmt;

/// Session handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Nothing sent or received yet.
    Idle,
    /// Initiator sent HANDSHAKE_INIT and waits for the ACK.
    InitSent,
    /// Initiator accepted the ACK and is sending HANDSHAKE_COMPLETE.
    AckReceived,
    /// Responder sent HANDSHAKE_ACK and waits for the COMPLETE.
    AwaitingComplete,
    /// Terminal success.
    Connected,
    /// Terminal failure.
    Failed,
}

impl HandshakeState {
    /// A handshake has started but not finished.
    #[must_use]
    pub fn in_progress(self) -> bool {
        matches!(
            self,
            Self::InitSent | Self::AckReceived | Self::AwaitingComplete
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Connected | Self::Failed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::InitSent => "INIT_SENT",
            Self::AckReceived => "ACK_RECEIVED",
            Self::AwaitingComplete => "AWAITING_COMPLETE",
            Self::Connected => "CONNECTED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the handshake this session played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// What the engine must do after feeding a handshake envelope in.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeStep {
    /// Send this envelope; the handshake continues.
    Send(Envelope),
    /// The session is CONNECTED. Send `reply` first if present.
    Connected {
        peer_origin: String,
        reply: Option<Envelope>,
    },
    /// The session moved to FAILED.
    Failed(BridgeError),
    /// Envelope does not fit the current state; drop it as an anomaly.
    Ignored(&'static str),
}
