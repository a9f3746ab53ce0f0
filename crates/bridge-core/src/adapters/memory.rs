//! In-memory window pair.
//!
//! Two connected `PlatformPort`s that behave like a host window and an
//! embedded frame: posting honours the target-origin hint, and the receiver
//! sees the sender's real origin and the dispatch time regardless of what
//! the message body claims.

use crate::ports::outbound::{PlatformPort, RawMessage, SystemTimeSource, TimeSource, TransportError};
use bridge_types::ANY_ORIGIN;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Posted messages kept per window. Older ones are discarded first.
pub const OUTBOX_CAPACITY: usize = 1024;

/// A message as it left a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub data: String,
    pub target_origin: String,
}

#[derive(Debug)]
struct Endpoint {
    origin: String,
    listener: Mutex<Option<mpsc::UnboundedSender<RawMessage>>>,
    /// The most recent `OUTBOX_CAPACITY` messages this endpoint posted, in order.
    outbox: Mutex<VecDeque<PostedMessage>>,
    dropped: AtomicU64,
}

impl Endpoint {
    fn new(origin: String) -> Arc<Self> {
        Arc::new(Self {
            origin,
            listener: Mutex::new(None),
            outbox: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        })
    }

    fn deliver(&self, raw: RawMessage) -> Result<(), TransportError> {
        let listener = self.listener.lock();
        let Some(sink) = listener.as_ref() else {
            // Nobody listening yet: the platform loses the message.
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(to = %self.origin, "No listener, message lost");
            return Ok(());
        };
        sink.send(raw).map_err(|_| TransportError::Closed)
    }
}

/// One side of an in-memory window pair.
#[derive(Clone)]
pub struct MemoryWindow {
    local: Arc<Endpoint>,
    peer: Arc<Endpoint>,
    clock: Arc<dyn TimeSource>,
}

impl std::fmt::Debug for MemoryWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWindow")
            .field("local", &self.local.origin)
            .field("peer", &self.peer.origin)
            .finish()
    }
}

impl MemoryWindow {
    /// Create a connected `(host, client)` pair stamped by the system clock.
    #[must_use]
    pub fn pair(host_origin: &str, client_origin: &str) -> (Self, Self) {
        Self::pair_with_clock(host_origin, client_origin, Arc::new(SystemTimeSource))
    }

    /// Create a connected pair whose dispatch timestamps come from `clock`.
    #[must_use]
    pub fn pair_with_clock(
        host_origin: &str,
        client_origin: &str,
        clock: Arc<dyn TimeSource>,
    ) -> (Self, Self) {
        let host = Endpoint::new(host_origin.to_string());
        let client = Endpoint::new(client_origin.to_string());
        (
            Self {
                local: Arc::clone(&host),
                peer: Arc::clone(&client),
                clock: Arc::clone(&clock),
            },
            Self {
                local: client,
                peer: host,
                clock,
            },
        )
    }

    /// Deliver `raw` to this window's listener as-is.
    ///
    /// Stands in for a third context posting into this window, with whatever
    /// origin and timestamp the platform would report for it.
    ///
    /// # Errors
    ///
    /// `TransportError::Closed` if the listener is gone.
    pub fn inject(&self, raw: RawMessage) -> Result<(), TransportError> {
        self.local.deliver(raw)
    }

    /// Drop this window's listener, as if the context were destroyed.
    pub fn close(&self) {
        self.local.listener.lock().take();
    }

    /// Messages this window has posted, oldest first. Only the last
    /// `OUTBOX_CAPACITY` are retained.
    #[must_use]
    pub fn outbox(&self) -> Vec<PostedMessage> {
        self.local.outbox.lock().iter().cloned().collect()
    }

    /// Messages addressed to this window that the platform discarded.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.local.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peer_origin(&self) -> &str {
        &self.peer.origin
    }
}

impl PlatformPort for MemoryWindow {
    fn post_message(&self, data: String, target_origin: &str) -> Result<(), TransportError> {
        {
            let mut outbox = self.local.outbox.lock();
            if outbox.len() == OUTBOX_CAPACITY {
                outbox.pop_front();
            }
            outbox.push_back(PostedMessage {
                data: data.clone(),
                target_origin: target_origin.to_string(),
            });
        }

        if target_origin != ANY_ORIGIN && target_origin != self.peer.origin {
            self.peer.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                target_origin,
                actual = %self.peer.origin,
                "Target origin does not match receiver, message dropped"
            );
            return Ok(());
        }

        self.peer.deliver(RawMessage {
            data,
            origin: self.local.origin.clone(),
            timestamp: self.clock.now_ms(),
        })
    }

    fn listen(&self, sink: mpsc::UnboundedSender<RawMessage>) -> Result<(), TransportError> {
        let mut listener = self.local.listener.lock();
        if listener.as_ref().is_some_and(|s| !s.is_closed()) {
            return Err(TransportError::AlreadyListening);
        }
        *listener = Some(sink);
        Ok(())
    }

    fn local_origin(&self) -> &str {
        &self.local.origin
    }
}
