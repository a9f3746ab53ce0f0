//! Handshake state machine.
//!
//! Sans-IO: the coordinator only consumes envelopes and clock readings and
//! returns the envelope to send next. The engine owns the transport.

use super::types::{HandshakeState, HandshakeStep, Role};
use crate::domain::correlation::deadline_after;
use bridge_types::payload::decode_payload;
use bridge_types::{
    BridgeError, Envelope, HandshakeAck, HandshakeComplete, HandshakeInit, MessageId,
    MessageType, RejectReason, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Drives one session's handshake from IDLE to a terminal state.
#[derive(Debug)]
pub struct HandshakeCoordinator {
    state: HandshakeState,
    role: Option<Role>,
    timeout: Duration,
    deadline: Option<Instant>,
    /// Nonce we generated and expect echoed back.
    local_nonce: Option<Uuid>,
    /// Id of our HANDSHAKE_INIT (initiator only).
    init_id: Option<MessageId>,
    /// Origin observed during the handshake.
    peer_origin: Option<String>,
    failure: Option<BridgeError>,
}

impl HandshakeCoordinator {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: HandshakeState::Idle,
            role: None,
            timeout,
            deadline: None,
            local_nonce: None,
            init_id: None,
            peer_origin: None,
            failure: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    #[must_use]
    pub fn peer_origin(&self) -> Option<&str> {
        self.peer_origin.as_deref()
    }

    /// Why the session failed, once FAILED.
    #[must_use]
    pub fn failure(&self) -> Option<&BridgeError> {
        self.failure.as_ref()
    }

    /// Pending handshake deadline, if a handshake is in progress.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.filter(|_| self.state.in_progress())
    }

    /// Start the handshake as initiator.
    ///
    /// # Errors
    ///
    /// Only an IDLE session may initiate. A FAILED session reports its
    /// failure; any other state reports `HandshakeFailed`.
    pub fn initiate(&mut self, now: Instant) -> Result<Envelope, BridgeError> {
        if self.state != HandshakeState::Idle {
            return Err(self.failure.clone().unwrap_or_else(|| BridgeError::HandshakeFailed {
                reason: format!("cannot initiate from {}", self.state),
            }));
        }

        let nonce = Uuid::new_v4();
        let init = HandshakeInit {
            version: PROTOCOL_VERSION,
            nonce,
        };
        let envelope = Envelope::new(MessageType::HandshakeInit).with_payload(to_value(&init));

        self.role = Some(Role::Initiator);
        self.local_nonce = Some(nonce);
        self.init_id = Some(envelope.id.clone());
        self.deadline = Some(deadline_after(now, self.timeout));
        self.transition(HandshakeState::InitSent);

        Ok(envelope)
    }

    /// Feed a validated handshake envelope.
    pub fn on_envelope(&mut self, envelope: &Envelope, now: Instant) -> HandshakeStep {
        match (envelope.kind, self.state) {
            (MessageType::HandshakeInit, HandshakeState::Idle) => self.on_init(envelope, now),
            (MessageType::HandshakeAck, HandshakeState::InitSent) => self.on_ack(envelope),
            (MessageType::HandshakeComplete, HandshakeState::AwaitingComplete) => {
                self.on_complete(envelope)
            }
            (MessageType::HandshakeInit, _) => HandshakeStep::Ignored("unexpected HANDSHAKE_INIT"),
            (MessageType::HandshakeAck, _) => HandshakeStep::Ignored("unexpected HANDSHAKE_ACK"),
            (MessageType::HandshakeComplete, _) => {
                HandshakeStep::Ignored("unexpected HANDSHAKE_COMPLETE")
            }
            _ => HandshakeStep::Ignored("not a handshake envelope"),
        }
    }

    /// A handshake-type envelope was rejected at the transport boundary.
    ///
    /// Fails the session only while a handshake is in progress
    /// (`INIT_SENT`, `ACK_RECEIVED` or `AWAITING_COMPLETE`). Rejections in
    /// `IDLE` or a terminal state, and rejected non-handshake envelopes, are
    /// left to the transport's counters so an untrusted frame cannot tear
    /// down a session it was never part of.
    pub fn on_rejected(&mut self, reason: RejectReason) -> Option<BridgeError> {
        if !self.state.in_progress() {
            return None;
        }
        Some(self.fail(BridgeError::HandshakeFailed {
            reason: format!("handshake envelope rejected: {reason}"),
        }))
    }

    /// Check the handshake deadline.
    pub fn on_timer(&mut self, now: Instant) -> Option<BridgeError> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        Some(self.fail(BridgeError::HandshakeTimeout {
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }))
    }

    /// Fail the session from outside the handshake (peer unreachable).
    ///
    /// No-op if already FAILED.
    pub fn abort(&mut self, error: BridgeError) {
        if self.state != HandshakeState::Failed {
            self.fail(error);
        }
    }

    fn on_init(&mut self, envelope: &Envelope, now: Instant) -> HandshakeStep {
        let init: HandshakeInit = match decode_payload(envelope.payload.as_ref()) {
            Ok(init) => init,
            Err(e) => {
                // Not yet in progress: an undecodable INIT is dropped, not fatal.
                debug!(envelope_id = %envelope.id, error = %e, "Undecodable HANDSHAKE_INIT");
                return HandshakeStep::Ignored("undecodable HANDSHAKE_INIT");
            }
        };

        self.role = Some(Role::Responder);
        if !version_supported(init.version) {
            return HandshakeStep::Failed(self.fail(BridgeError::HandshakeFailed {
                reason: format!("unsupported protocol version {}", init.version),
            }));
        }

        let nonce = Uuid::new_v4();
        let ack = HandshakeAck {
            version: PROTOCOL_VERSION,
            echo: init.nonce,
            nonce,
        };
        let reply = Envelope::new(MessageType::HandshakeAck)
            .with_correlation(envelope.id.clone())
            .with_payload(to_value(&ack));

        self.local_nonce = Some(nonce);
        self.peer_origin = Some(envelope.origin.clone());
        self.deadline = Some(deadline_after(now, self.timeout));
        self.transition(HandshakeState::AwaitingComplete);

        HandshakeStep::Send(reply)
    }

    fn on_ack(&mut self, envelope: &Envelope) -> HandshakeStep {
        let ack: HandshakeAck = match decode_payload(envelope.payload.as_ref()) {
            Ok(ack) => ack,
            Err(e) => {
                return HandshakeStep::Failed(self.fail(BridgeError::HandshakeFailed {
                    reason: format!("undecodable HANDSHAKE_ACK: {e}"),
                }))
            }
        };

        if envelope.correlation_id != self.init_id {
            return HandshakeStep::Failed(self.fail(BridgeError::HandshakeFailed {
                reason: "HANDSHAKE_ACK does not answer our INIT".into(),
            }));
        }

        if Some(ack.echo) != self.local_nonce {
            return HandshakeStep::Failed(self.fail(BridgeError::HandshakeFailed {
                reason: "nonce mismatch in HANDSHAKE_ACK".into(),
            }));
        }

        if !version_supported(ack.version) {
            return HandshakeStep::Failed(self.fail(BridgeError::HandshakeFailed {
                reason: format!("unsupported protocol version {}", ack.version),
            }));
        }

        self.peer_origin = Some(envelope.origin.clone());
        self.transition(HandshakeState::AckReceived);

        let complete = HandshakeComplete { echo: ack.nonce };
        let reply = Envelope::new(MessageType::HandshakeComplete)
            .with_correlation(envelope.id.clone())
            .with_payload(to_value(&complete));

        self.connect(envelope.origin.clone(), Some(reply))
    }

    fn on_complete(&mut self, envelope: &Envelope) -> HandshakeStep {
        if self.peer_origin.as_deref() != Some(envelope.origin.as_str()) {
            return HandshakeStep::Failed(self.fail(BridgeError::HandshakeFailed {
                reason: "HANDSHAKE_COMPLETE from a different origin than the INIT".into(),
            }));
        }

        let complete: HandshakeComplete = match decode_payload(envelope.payload.as_ref()) {
            Ok(complete) => complete,
            Err(e) => {
                return HandshakeStep::Failed(self.fail(BridgeError::HandshakeFailed {
                    reason: format!("undecodable HANDSHAKE_COMPLETE: {e}"),
                }))
            }
        };

        if Some(complete.echo) != self.local_nonce {
            return HandshakeStep::Failed(self.fail(BridgeError::HandshakeFailed {
                reason: "nonce mismatch in HANDSHAKE_COMPLETE".into(),
            }));
        }

        self.connect(envelope.origin.clone(), None)
    }

    fn connect(&mut self, peer_origin: String, reply: Option<Envelope>) -> HandshakeStep {
        self.deadline = None;
        self.local_nonce = None;
        self.transition(HandshakeState::Connected);
        HandshakeStep::Connected { peer_origin, reply }
    }

    fn fail(&mut self, error: BridgeError) -> BridgeError {
        warn!(from = %self.state, error = %error, "Handshake failed");
        self.state = HandshakeState::Failed;
        self.deadline = None;
        self.local_nonce = None;
        self.failure = Some(error.clone());
        error
    }

    fn transition(&mut self, next: HandshakeState) {
        info!(from = %self.state, to = %next, role = ?self.role, "Handshake transition");
        self.state = next;
    }
}

fn version_supported(version: u16) -> bool {
    (MIN_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(&version)
}

fn to_value<T: serde::Serialize>(payload: &T) -> serde_json::Value {
    // Handshake payloads are plain structs of integers and UUIDs.
    serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
}
