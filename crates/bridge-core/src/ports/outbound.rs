//! # Driven Ports (Outbound SPI)
//!
//! What the bridge requires from the embedding environment: a raw
//! cross-context message primitive and a clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;

/// One message as delivered by the platform, before decoding.
///
/// `origin` and `timestamp` come from the platform event and are the only
/// values the bridge trusts for sender identity and dispatch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Serialized envelope.
    pub data: String,
    /// Origin of the sending context, as reported by the platform.
    pub origin: String,
    /// Dispatch time in milliseconds, as reported by the platform.
    pub timestamp: u64,
}

/// Errors from the platform messaging primitive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer context is gone (frame removed, window closed).
    #[error("Peer context closed")]
    Closed,

    /// The platform refused the message.
    #[error("Platform rejected message: {0}")]
    Rejected(String),

    /// The envelope could not be serialized.
    #[error("Encode failed: {0}")]
    Encode(String),

    /// A listener is already registered.
    #[error("Listener already registered")]
    AlreadyListening,
}

/// Raw cross-context messaging primitive.
///
/// Mirrors a browser `postMessage` pair: posting is fire-and-forget with a
/// target-origin hint, and inbound messages arrive on a registered listener.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine task holds one in an
/// `Arc` and posts from inside its loop.
pub trait PlatformPort: Send + Sync {
    /// Deliver `data` to the peer context.
    ///
    /// The platform drops the message if the receiver's origin does not
    /// match `target_origin` (`"*"` matches anything).
    fn post_message(&self, data: String, target_origin: &str) -> Result<(), TransportError>;

    /// Register the inbound listener. At most one listener per port.
    fn listen(&self, sink: mpsc::UnboundedSender<RawMessage>) -> Result<(), TransportError>;

    /// Origin of the local context.
    fn local_origin(&self) -> &str;
}

/// Millisecond wall clock.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// `TimeSource` backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
