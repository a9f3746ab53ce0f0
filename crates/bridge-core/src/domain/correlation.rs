//! # Correlation Manager
//!
//! Matches RESPONSE and ERROR envelopes to outstanding requests.
//!
//! Flow:
//! 1. `BridgeHandle::request` sends a oneshot sender to the engine
//! 2. The engine calls `register()` with the REQUEST id and posts the envelope
//! 3. An inbound RESPONSE/ERROR calls `resolve()` with its `correlation_id`
//! 4. The engine loop calls `expire()` when the earliest deadline passes
//!
//! Every request settles exactly once. Ids that already settled are
//! remembered for a while so late or duplicate answers can be told apart
//! from answers to requests we never sent.

use super::seen_ids::SeenIdCache;
use bridge_types::{BridgeError, Channel, MessageId};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What a caller of `request` eventually receives.
pub type RequestOutcome = Result<Value, BridgeError>;

/// Stand-in deadline for timeouts too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// `now + timeout`, saturating at a far-future instant instead of overflowing.
pub(crate) fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// A request waiting for its answer.
#[derive(Debug)]
struct PendingRequest {
    reply: oneshot::Sender<RequestOutcome>,
    channel: Channel,
    created_at: Instant,
    deadline: Instant,
    timeout: Duration,
}

/// Counters for the correlation manager.
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Requests registered.
    pub total_registered: AtomicU64,
    /// Requests settled by a RESPONSE or ERROR.
    pub total_completed: AtomicU64,
    /// Requests settled by the timeout.
    pub total_timeouts: AtomicU64,
    /// Requests whose caller went away before settlement.
    pub total_cancelled: AtomicU64,
    /// Requests failed because the session ended.
    pub total_aborted: AtomicU64,
    /// Answers for requests that had already settled.
    pub total_late: AtomicU64,
    /// Answers for ids never registered.
    pub total_unknown: AtomicU64,
}

/// Result of feeding an answer to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The waiting caller received the outcome.
    Delivered,
    /// The request was pending but the caller stopped waiting.
    ReceiverDropped,
    /// The request had already settled (timeout or earlier answer).
    Late,
    /// No request with this id was ever registered here.
    Unknown,
}

/// Pending-request table owned by the engine loop.
#[derive(Debug)]
pub struct CorrelationManager {
    pending: HashMap<MessageId, PendingRequest>,
    /// Deadline index for `next_deadline` and `expire`.
    deadlines: BTreeSet<(Instant, MessageId)>,
    settled: SeenIdCache,
    default_timeout: Duration,
    epoch: Instant,
    stats: Arc<PendingStats>,
}

impl CorrelationManager {
    #[must_use]
    pub fn new(default_timeout: Duration, settled_window_ms: u64, settled_capacity: usize) -> Self {
        Self {
            pending: HashMap::new(),
            deadlines: BTreeSet::new(),
            settled: SeenIdCache::new(settled_window_ms, settled_capacity),
            default_timeout,
            epoch: Instant::now(),
            stats: Arc::new(PendingStats::default()),
        }
    }

    /// Register a request that has just been (or is about to be) posted.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::DuplicateId` if `id` is already pending. The
    /// caller is notified through `reply` in that case as well.
    pub fn register(
        &mut self,
        id: MessageId,
        channel: Channel,
        reply: oneshot::Sender<RequestOutcome>,
        timeout: Option<Duration>,
        now: Instant,
    ) -> Result<(), BridgeError> {
        if self.pending.contains_key(&id) {
            let err = BridgeError::DuplicateId { id: id.to_string() };
            warn!(id = %id, channel = %channel, "Request id collides with a pending request");
            let _ = reply.send(Err(err.clone()));
            return Err(err);
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        let deadline = deadline_after(now, timeout);
        self.deadlines.insert((deadline, id.clone()));
        self.pending.insert(
            id.clone(),
            PendingRequest {
                reply,
                channel: channel.clone(),
                created_at: now,
                deadline,
                timeout,
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            id = %id,
            channel = %channel,
            timeout_ms = timeout.as_millis(),
            "Registered pending request"
        );
        Ok(())
    }

    /// Settle the request `correlation_id` with `outcome`.
    pub fn resolve(
        &mut self,
        correlation_id: &MessageId,
        outcome: RequestOutcome,
        now: Instant,
    ) -> Resolution {
        let Some(pending) = self.take(correlation_id, now) else {
            if self.settled.contains(correlation_id) {
                self.stats.total_late.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    "Answer for an already settled request, ignoring"
                );
                return Resolution::Late;
            }
            self.stats.total_unknown.fetch_add(1, Ordering::Relaxed);
            warn!(
                correlation_id = %correlation_id,
                "Answer for unknown correlation id"
            );
            return Resolution::Unknown;
        };

        let elapsed = now.duration_since(pending.created_at);
        match pending.reply.send(outcome) {
            Ok(()) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    channel = %pending.channel,
                    response_time_ms = elapsed.as_millis(),
                    "Completed pending request"
                );
                Resolution::Delivered
            }
            Err(_) => {
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    channel = %pending.channel,
                    "Pending request receiver dropped"
                );
                Resolution::ReceiverDropped
            }
        }
    }

    /// Fail every request whose deadline is at or before `now`.
    ///
    /// Returns the number of requests that timed out.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut expired = Vec::new();
        while let Some((deadline, _)) = self.deadlines.first() {
            if *deadline > now {
                break;
            }
            if let Some((_, id)) = self.deadlines.pop_first() {
                expired.push(id);
            }
        }

        let mut removed = 0;
        for id in expired {
            let Some(pending) = self.take(&id, now) else {
                continue;
            };
            let timeout_ms = u64::try_from(pending.timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(
                id = %id,
                channel = %pending.channel,
                timeout_ms,
                "Request timed out"
            );
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            let _ = pending.reply.send(Err(BridgeError::RequestTimeout {
                channel: pending.channel.to_string(),
                timeout_ms,
            }));
            removed += 1;
        }
        removed
    }

    /// Fail every pending request with `error` (session teardown).
    pub fn fail_all(&mut self, error: &BridgeError, now: Instant) -> usize {
        let ids: Vec<MessageId> = self.pending.keys().cloned().collect();
        let mut failed = 0;
        for id in ids {
            if let Some(pending) = self.take(&id, now) {
                self.stats.total_aborted.fetch_add(1, Ordering::Relaxed);
                let _ = pending.reply.send(Err(error.clone()));
                failed += 1;
            }
        }
        if failed > 0 {
            debug!(failed, error = %error, "Failed all pending requests");
        }
        failed
    }

    /// Forget settled ids. Used when a fresh session starts.
    pub fn clear_settled(&mut self) {
        self.settled.clear();
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    #[must_use]
    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.pending.contains_key(id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn stats(&self) -> Arc<PendingStats> {
        Arc::clone(&self.stats)
    }

    fn take(&mut self, id: &MessageId, now: Instant) -> Option<PendingRequest> {
        let pending = self.pending.remove(id)?;
        self.deadlines.remove(&(pending.deadline, id.clone()));
        let now_ms = u64::try_from(now.duration_since(self.epoch).as_millis()).unwrap_or(u64::MAX);
        self.settled.insert(id, now_ms);
        Some(pending)
    }
}
