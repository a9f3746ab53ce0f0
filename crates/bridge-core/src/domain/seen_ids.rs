//! # Time-Bounded Id Cache
//!
//! Remembers envelope ids for a bounded window so that reuse can be detected
//! without letting memory grow with session length.
//!
//! - Ids are kept for `window_ms` after first sight
//! - Garbage collection runs at most once per `gc_interval_ms`
//! - When `capacity` is reached the oldest entries are evicted first

use bridge_types::MessageId;
use std::collections::{HashMap, VecDeque};

/// Time-bounded set of message ids.
#[derive(Debug)]
pub struct SeenIdCache {
    /// id -> millisecond timestamp when first seen.
    seen: HashMap<MessageId, u64>,
    /// Insertion order for capacity eviction.
    order: VecDeque<(MessageId, u64)>,
    window_ms: u64,
    capacity: usize,
    last_gc: u64,
    gc_interval_ms: u64,
}

impl SeenIdCache {
    /// Default garbage collection interval.
    pub const DEFAULT_GC_INTERVAL_MS: u64 = 10_000;

    #[must_use]
    pub fn new(window_ms: u64, capacity: usize) -> Self {
        Self {
            seen: HashMap::new(),
            order: VecDeque::new(),
            window_ms,
            capacity: capacity.max(1),
            last_gc: 0,
            gc_interval_ms: Self::DEFAULT_GC_INTERVAL_MS.min(window_ms.max(1)),
        }
    }

    /// Record `id` at `now_ms`.
    ///
    /// Returns `true` if the id is fresh, `false` if it was already seen
    /// inside the window.
    pub fn insert(&mut self, id: &MessageId, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_gc) >= self.gc_interval_ms {
            self.garbage_collect(now_ms);
            self.last_gc = now_ms;
        }

        if let Some(&first_seen) = self.seen.get(id) {
            if now_ms.saturating_sub(first_seen) <= self.window_ms {
                return false;
            }
        }

        while self.seen.len() >= self.capacity {
            let Some((oldest, at)) = self.order.pop_front() else {
                break;
            };
            if self.seen.get(&oldest) == Some(&at) {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(id.clone(), now_ms);
        self.order.push_back((id.clone(), now_ms));
        true
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    /// Remove ids older than the window.
    fn garbage_collect(&mut self, now_ms: u64) {
        let threshold = now_ms.saturating_sub(self.window_ms);
        while let Some((id, at)) = self.order.front() {
            if *at >= threshold {
                break;
            }
            if self.seen.get(id) == Some(at) {
                self.seen.remove(id);
            }
            self.order.pop_front();
        }
    }
}
