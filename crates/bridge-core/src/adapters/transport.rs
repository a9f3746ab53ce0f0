//! # Transport Adapter
//!
//! The boundary between the raw platform port and the protocol engine.
//!
//! Inbound pipeline:
//! 1. origin pre-check on the platform-reported origin
//! 2. decode (any failure is `MALFORMED`)
//! 3. overwrite `origin`/`timestamp` with the platform values
//! 4. full validation (origin, shape, handshake staleness)
//!
//! Rejected messages are dropped here. They are logged, counted and passed
//! to the diagnostic hook; nothing is sent back.

use crate::domain::config::BridgeConfig;
use crate::domain::diagnostics::{DiagnosticEvent, DiagnosticHook, Diagnostics};
use crate::domain::origin::{OriginValidator, Verdict};
use crate::ports::outbound::{PlatformPort, RawMessage, TimeSource, TransportError};
use bridge_types::{Envelope, MessageType, RejectReason};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of receiving one raw message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Validated and transport-stamped.
    Accepted(Envelope),
    /// Dropped at the boundary.
    Rejected {
        reason: RejectReason,
        /// Declared type, when it could be read.
        kind: Option<MessageType>,
    },
}

/// Reads just the declared type of a message body.
#[derive(Deserialize)]
struct TypePeek {
    #[serde(rename = "type")]
    kind: MessageType,
}

fn peek_kind(data: &str) -> Option<MessageType> {
    serde_json::from_str::<TypePeek>(data).ok().map(|p| p.kind)
}

pub struct TransportAdapter {
    port: Arc<dyn PlatformPort>,
    clock: Arc<dyn TimeSource>,
    validator: OriginValidator,
    /// Target-origin hint used until the peer is pinned.
    target_origin: String,
    /// Last timestamp stamped on an outgoing envelope.
    last_sent_ms: u64,
    diagnostics: Arc<Diagnostics>,
    hook: Option<DiagnosticHook>,
}

impl std::fmt::Debug for TransportAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportAdapter")
            .field("local_origin", &self.port.local_origin())
            .field("target_origin", &self.target_origin)
            .field("policy", self.validator.policy())
            .finish()
    }
}

impl TransportAdapter {
    #[must_use]
    pub fn new(
        port: Arc<dyn PlatformPort>,
        clock: Arc<dyn TimeSource>,
        config: &BridgeConfig,
        diagnostics: Arc<Diagnostics>,
        hook: Option<DiagnosticHook>,
    ) -> Self {
        Self {
            port,
            clock,
            validator: OriginValidator::new(config.trusted_origins(), config.max_handshake_skew_ms),
            target_origin: config.target_origin.clone(),
            last_sent_ms: 0,
            diagnostics,
            hook,
        }
    }

    /// Run one raw platform message through the inbound pipeline.
    pub fn receive(&mut self, raw: RawMessage) -> Inbound {
        if let Err(reason) = self.validator.check_origin(&raw.origin) {
            return self.reject(reason, &raw.origin, peek_kind(&raw.data));
        }

        let mut envelope = match Envelope::decode(&raw.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(origin = %raw.origin, error = %e, "Undecodable message");
                return self.reject(RejectReason::Malformed, &raw.origin, peek_kind(&raw.data));
            }
        };

        // Whatever the sender wrote here is ignored.
        envelope.origin = raw.origin;
        envelope.timestamp = raw.timestamp;

        match self.validator.validate(&envelope) {
            Verdict::Accepted => {
                self.validator.record_accepted(envelope.timestamp);
                debug!(
                    envelope_id = %envelope.id,
                    kind = %envelope.kind,
                    origin = %envelope.origin,
                    "Envelope accepted"
                );
                Inbound::Accepted(envelope)
            }
            Verdict::Rejected(reason) => {
                let origin = envelope.origin.clone();
                self.reject(reason, &origin, Some(envelope.kind))
            }
        }
    }

    /// Stamp and post an envelope to the current target.
    ///
    /// # Errors
    ///
    /// Encoding or platform failures.
    pub fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let target = self
            .validator
            .pinned_origin()
            .unwrap_or(self.target_origin.as_str())
            .to_string();
        self.send_to(envelope, &target)
    }

    /// Stamp and post an envelope with an explicit target-origin hint.
    ///
    /// # Errors
    ///
    /// Encoding or platform failures.
    pub fn send_to(&mut self, mut envelope: Envelope, target_origin: &str) -> Result<(), TransportError> {
        envelope.origin = self.port.local_origin().to_string();
        envelope.timestamp = self.next_timestamp();

        let data = envelope
            .encode()
            .map_err(|e| TransportError::Encode(e.to_string()))?;

        debug!(
            envelope_id = %envelope.id,
            kind = %envelope.kind,
            target_origin,
            "Posting envelope"
        );
        self.port.post_message(data, target_origin)
    }

    /// Narrow trust to the handshake peer.
    pub fn pin(&mut self, origin: &str) {
        self.validator.pin(origin);
    }

    /// Forget the pinned peer and staleness history.
    pub fn reset(&mut self) {
        self.validator.reset();
    }

    #[must_use]
    pub fn pinned_origin(&self) -> Option<&str> {
        self.validator.pinned_origin()
    }

    #[must_use]
    pub fn local_origin(&self) -> &str {
        self.port.local_origin()
    }

    /// Non-decreasing even if the wall clock steps back.
    fn next_timestamp(&mut self) -> u64 {
        self.last_sent_ms = self.last_sent_ms.max(self.clock.now_ms());
        self.last_sent_ms
    }

    fn reject(&self, reason: RejectReason, origin: &str, kind: Option<MessageType>) -> Inbound {
        warn!(
            origin,
            reason = %reason,
            kind = kind.map(MessageType::as_str),
            "Envelope rejected"
        );
        self.diagnostics.record_rejection(reason);
        if let Some(hook) = &self.hook {
            hook(&DiagnosticEvent::Rejected {
                reason,
                origin: origin.to_string(),
                kind,
            });
        }
        Inbound::Rejected { reason, kind }
    }
}
