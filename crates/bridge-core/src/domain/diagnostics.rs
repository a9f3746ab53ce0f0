//! # Diagnostics
//!
//! Rejected envelopes and protocol anomalies are never surfaced to the peer
//! or to callers. They are counted here and optionally reported to a hook.

use bridge_types::{MessageId, MessageType, RejectReason};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Protocol anomalies: accepted envelopes that could not be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anomaly {
    /// Non-handshake traffic outside a CONNECTED session.
    NotConnected,
    /// Peer reused an envelope id.
    DuplicateId,
    /// Handshake envelope in a state that does not expect it.
    UnexpectedHandshake,
    /// RESPONSE/ERROR for an unknown correlation id.
    UnknownCorrelation,
    /// RESPONSE/ERROR for a request that already settled.
    LateResponse,
    /// ERROR with neither a pending correlation nor local subscribers.
    UnroutableError,
    /// The transport could not post an envelope.
    SendFailed,
}

impl Anomaly {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::DuplicateId => "duplicate_id",
            Self::UnexpectedHandshake => "unexpected_handshake",
            Self::UnknownCorrelation => "unknown_correlation",
            Self::LateResponse => "late_response",
            Self::UnroutableError => "unroutable_error",
            Self::SendFailed => "send_failed",
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the diagnostic hook observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// Envelope dropped at the transport boundary.
    Rejected {
        reason: RejectReason,
        origin: String,
        kind: Option<MessageType>,
    },
    /// Accepted envelope that the engine dropped.
    Anomaly {
        anomaly: Anomaly,
        envelope_id: Option<MessageId>,
        detail: String,
    },
}

/// Observer for rejections and anomalies. Must not block.
pub type DiagnosticHook = Arc<dyn Fn(&DiagnosticEvent) + Send + Sync>;

/// Session-independent counters, shared between the engine and handles.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub rejected_origin: AtomicU64,
    pub rejected_malformed: AtomicU64,
    pub rejected_stale: AtomicU64,
    pub anomalies: AtomicU64,
    pub duplicate_ids: AtomicU64,
    pub requests_sent: AtomicU64,
    pub responses_matched: AtomicU64,
    pub late_responses: AtomicU64,
    pub request_timeouts: AtomicU64,
    pub requests_served: AtomicU64,
    pub events_published: AtomicU64,
    pub events_delivered: AtomicU64,
    pub callback_failures: AtomicU64,
    pub send_failures: AtomicU64,
}

impl Diagnostics {
    pub fn record_rejection(&self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::OriginMismatch => &self.rejected_origin,
            RejectReason::Malformed => &self.rejected_malformed,
            RejectReason::Stale => &self.rejected_stale,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_anomaly(&self, anomaly: Anomaly) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
        match anomaly {
            Anomaly::DuplicateId => {
                self.duplicate_ids.fetch_add(1, Ordering::Relaxed);
            }
            Anomaly::LateResponse => {
                self.late_responses.fetch_add(1, Ordering::Relaxed);
            }
            Anomaly::SendFailed => {
                self.send_failures.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DiagnosticsSnapshot {
            rejected_origin: load(&self.rejected_origin),
            rejected_malformed: load(&self.rejected_malformed),
            rejected_stale: load(&self.rejected_stale),
            anomalies: load(&self.anomalies),
            duplicate_ids: load(&self.duplicate_ids),
            requests_sent: load(&self.requests_sent),
            responses_matched: load(&self.responses_matched),
            late_responses: load(&self.late_responses),
            request_timeouts: load(&self.request_timeouts),
            requests_served: load(&self.requests_served),
            events_published: load(&self.events_published),
            events_delivered: load(&self.events_delivered),
            callback_failures: load(&self.callback_failures),
            send_failures: load(&self.send_failures),
        }
    }
}

/// Plain copy of `Diagnostics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub rejected_origin: u64,
    pub rejected_malformed: u64,
    pub rejected_stale: u64,
    pub anomalies: u64,
    pub duplicate_ids: u64,
    pub requests_sent: u64,
    pub responses_matched: u64,
    pub late_responses: u64,
    pub request_timeouts: u64,
    pub requests_served: u64,
    pub events_published: u64,
    pub events_delivered: u64,
    pub callback_failures: u64,
    pub send_failures: u64,
}

impl DiagnosticsSnapshot {
    #[must_use]
    pub fn total_rejected(&self) -> u64 {
        self.rejected_origin + self.rejected_malformed + self.rejected_stale
    }
}
