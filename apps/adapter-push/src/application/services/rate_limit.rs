//! Per-Subscription Rate Limiter
//!
//! Coalesces updates per key: each publish overwrites the key's pending slot,
//! and a timer flushes all pending slots once per interval. A subscriber
//! therefore sees at most one item per key per interval, always the latest
//! observed in that window. Empty windows flush nothing.
//!
//! Flushes are timer-aligned: the first value in a window waits for the next
//! tick rather than being delivered immediately.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, Interval, MissedTickBehavior};

#[derive(Debug)]
struct Pending<T> {
    index: HashMap<String, usize>,
    items: Vec<T>,
}

#[derive(Debug)]
pub(crate) struct RateLimiter<T> {
    interval: Duration,
    pending: Mutex<Pending<T>>,
}

impl<T> RateLimiter<T> {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: Mutex::new(Pending {
                index: HashMap::new(),
                items: Vec::new(),
            }),
        }
    }

    /// Replace the pending value for `key`. Returns true if it replaced one.
    pub(crate) fn offer(&self, key: &str, item: T) -> bool {
        let mut pending = self.pending.lock();
        if let Some(&slot) = pending.index.get(key) {
            pending.items[slot] = item;
            return true;
        }
        let slot = pending.items.len();
        pending.index.insert(key.to_string(), slot);
        pending.items.push(item);
        false
    }

    /// Take every pending value, in first-offered order.
    pub(crate) fn drain(&self) -> Vec<T> {
        let mut pending = self.pending.lock();
        pending.index.clear();
        std::mem::take(&mut pending.items)
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().items.len()
    }

    /// Flush timer whose first tick is one full interval from now.
    pub(crate) fn ticker(&self) -> Interval {
        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }
}
