//! # Subscription Registry
//!
//! Two distinct sets of bookkeeping live here:
//!
//! - **Local** subscribers: callbacks in this context that receive EVENTs.
//!   Reference-counted per channel; the first subscriber triggers a
//!   SUBSCRIBE to the peer and the last unsubscribe triggers an UNSUBSCRIBE.
//! - **Remote** subscriptions: channels the peer asked to receive. `publish`
//!   consults this set before sending an EVENT.
//!
//! Delivery is in registration order. A failing or panicking callback does
//! not stop delivery to the remaining subscribers.

use crate::ports::inbound::EventSink;
use bridge_types::{BridgeError, Channel};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Identifies one local subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct LocalSubscription {
    id: SubscriptionId,
    sink: Arc<dyn EventSink>,
    /// Cleared by the handle on unsubscribe, before the engine hears of it.
    active: Arc<AtomicBool>,
}

impl LocalSubscription {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Outcome of delivering one EVENT or channel ERROR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Local and remote subscription bookkeeping for one session.
#[derive(Default)]
pub struct SubscriptionRegistry {
    local: BTreeMap<Channel, Vec<LocalSubscription>>,
    index: HashMap<SubscriptionId, Channel>,
    remote: BTreeSet<Channel>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("local", &self.index.len())
            .field("remote", &self.remote)
            .finish()
    }
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Local subscribers
    // =========================================================================

    /// Add a local subscriber.
    ///
    /// Returns `true` if this is the first subscriber for `channel`, in
    /// which case the caller sends SUBSCRIBE.
    pub fn add(
        &mut self,
        id: SubscriptionId,
        channel: Channel,
        sink: Arc<dyn EventSink>,
        active: Arc<AtomicBool>,
    ) -> bool {
        let subscribers = self.local.entry(channel.clone()).or_default();
        let first = subscribers.is_empty();
        subscribers.push(LocalSubscription { id, sink, active });
        self.index.insert(id, channel.clone());

        debug!(
            subscription = %id,
            channel = %channel,
            subscribers = subscribers.len(),
            "Local subscriber added"
        );
        first
    }

    /// Remove a local subscriber. Unknown ids are a no-op.
    ///
    /// Returns the channel if this was its last subscriber, in which case
    /// the caller sends UNSUBSCRIBE.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Channel> {
        let channel = self.index.remove(&id)?;
        let subscribers = self.local.get_mut(&channel)?;
        subscribers.retain(|s| s.id != id);

        debug!(
            subscription = %id,
            channel = %channel,
            subscribers = subscribers.len(),
            "Local subscriber removed"
        );

        if subscribers.is_empty() {
            self.local.remove(&channel);
            Some(channel)
        } else {
            None
        }
    }

    /// Deliver an EVENT payload to every active subscriber of `channel`.
    ///
    /// The active flag is read right before each callback, so a subscriber
    /// deactivated by an earlier callback in the same pass is skipped. A
    /// callback already running when `unsubscribe` returns is not recalled.
    pub fn dispatch(&self, channel: &Channel, payload: &Value) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let Some(subscribers) = self.local.get(channel) else {
            debug!(channel = %channel, "EVENT for channel without local subscribers, dropping");
            return report;
        };

        for sub in subscribers {
            if !sub.is_active() {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| sub.sink.on_event(channel, payload))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(subscription = %sub.id, channel = %channel, error = %e, "Subscriber failed");
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(subscription = %sub.id, channel = %channel, "Subscriber panicked");
                }
            }
        }
        report
    }

    /// Deliver a channel-scoped error to every active subscriber of `channel`.
    pub fn dispatch_error(&self, channel: &Channel, error: &BridgeError) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let Some(subscribers) = self.local.get(channel) else {
            return report;
        };
        for sub in subscribers {
            if !sub.is_active() {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| sub.sink.on_error(channel, error))).is_ok() {
                report.delivered += 1;
            } else {
                report.failed += 1;
                warn!(subscription = %sub.id, channel = %channel, "Subscriber error callback panicked");
            }
        }
        report
    }

    /// Notify every local subscriber of `error` and drop them all.
    ///
    /// Returns the channels that had subscribers.
    pub fn fail_all(&mut self, error: &BridgeError) -> Vec<Channel> {
        let local = std::mem::take(&mut self.local);
        self.index.clear();

        let mut channels = Vec::with_capacity(local.len());
        for (channel, subscribers) in local {
            for sub in subscribers.iter().filter(|s| s.is_active()) {
                let _ = catch_unwind(AssertUnwindSafe(|| sub.sink.on_error(&channel, error)));
                sub.active.store(false, Ordering::Release);
            }
            channels.push(channel);
        }
        channels
    }

    #[must_use]
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.local.get(channel).map_or(0, Vec::len)
    }

    pub fn local_channels(&self) -> impl Iterator<Item = &Channel> {
        self.local.keys()
    }

    // =========================================================================
    // Remote subscriptions
    // =========================================================================

    /// Record that the peer subscribed to `channel`. Returns `false` if it
    /// already was.
    pub fn add_remote(&mut self, channel: Channel) -> bool {
        self.remote.insert(channel)
    }

    /// Record that the peer unsubscribed. Returns `false` if it was not
    /// subscribed.
    pub fn remove_remote(&mut self, channel: &Channel) -> bool {
        self.remote.remove(channel)
    }

    #[must_use]
    pub fn peer_subscribed(&self, channel: &Channel) -> bool {
        self.remote.contains(channel)
    }

    pub fn remote_channels(&self) -> impl Iterator<Item = &Channel> {
        self.remote.iter()
    }

    pub fn clear_remote(&mut self) {
        self.remote.clear();
    }
}
