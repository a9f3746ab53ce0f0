//! # Origin Validator
//!
//! Decides whether an inbound envelope is trusted.
//!
//! ## Trust Narrowing
//!
//! Before the handshake completes, any origin in the configured allow-list is
//! trusted. Once the session is CONNECTED the peer origin is pinned and only
//! that exact origin is accepted.
//!
//! Rejections are never answered. The caller drops the envelope and reports
//! the reason to diagnostics only.

use bridge_types::{Envelope, RejectReason};
use std::collections::BTreeSet;

/// Outcome of validating one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

impl Verdict {
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// The current trust set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Configured allow-list, before the handshake completes.
    AllowList(BTreeSet<String>),
    /// The single peer confirmed by the handshake.
    Pinned(String),
}

impl TrustPolicy {
    #[must_use]
    pub fn trusts(&self, origin: &str) -> bool {
        match self {
            Self::AllowList(origins) => origins.contains(origin),
            Self::Pinned(peer) => peer == origin,
        }
    }
}

/// Stateful validator for one session.
#[derive(Debug)]
pub struct OriginValidator {
    allow_list: BTreeSet<String>,
    policy: TrustPolicy,
    max_skew_ms: u64,
    /// Timestamp of the last accepted envelope from the peer.
    last_accepted: Option<u64>,
}

impl OriginValidator {
    #[must_use]
    pub fn new(allow_list: BTreeSet<String>, max_skew_ms: u64) -> Self {
        Self {
            policy: TrustPolicy::AllowList(allow_list.clone()),
            allow_list,
            max_skew_ms,
            last_accepted: None,
        }
    }

    /// Cheap pre-decode check on the platform-reported origin.
    ///
    /// # Errors
    ///
    /// Returns `RejectReason::OriginMismatch` for untrusted origins.
    pub fn check_origin(&self, origin: &str) -> Result<(), RejectReason> {
        if self.policy.trusts(origin) {
            Ok(())
        } else {
            Err(RejectReason::OriginMismatch)
        }
    }

    /// Validate a decoded, transport-stamped envelope.
    ///
    /// Order: origin, shape, staleness (handshake types only).
    #[must_use]
    pub fn validate(&self, envelope: &Envelope) -> Verdict {
        if let Err(reason) = self.check_origin(&envelope.origin) {
            return Verdict::Rejected(reason);
        }

        if envelope.check_shape().is_err() {
            return Verdict::Rejected(RejectReason::Malformed);
        }

        if envelope.kind.is_handshake() && self.is_stale(envelope.timestamp) {
            return Verdict::Rejected(RejectReason::Stale);
        }

        Verdict::Accepted
    }

    /// Record an accepted envelope's timestamp for later staleness checks.
    pub fn record_accepted(&mut self, timestamp: u64) {
        self.last_accepted = Some(self.last_accepted.map_or(timestamp, |t| t.max(timestamp)));
    }

    fn is_stale(&self, timestamp: u64) -> bool {
        self.last_accepted
            .is_some_and(|last| timestamp.saturating_add(self.max_skew_ms) < last)
    }

    /// Narrow trust to the handshake peer.
    pub fn pin(&mut self, origin: impl Into<String>) {
        self.policy = TrustPolicy::Pinned(origin.into());
    }

    /// Widen trust back to the allow-list for a fresh session.
    pub fn reset(&mut self) {
        self.policy = TrustPolicy::AllowList(self.allow_list.clone());
        self.last_accepted = None;
    }

    #[must_use]
    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    #[must_use]
    pub fn pinned_origin(&self) -> Option<&str> {
        match &self.policy {
            TrustPolicy::Pinned(origin) => Some(origin),
            TrustPolicy::AllowList(_) => None,
        }
    }
}
