//! Subscriptions
//!
//! [`SubscriptionEntry`] is the registry-side record of one subscriber: its
//! filter, queue, optional rate limiter and cancellation token.
//! [`Subscription`] is the caller-side handle: a stream over the entry's
//! queue that cancels the subscription when dropped.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::queue::{PushOutcome, QueuePolicy, SubscriptionQueue};
use super::rate_limit::RateLimiter;
use crate::application::error::SubscriptionError;
use crate::domain::subscription::{
    CallerContext, CancelReason, Matcher, SubscriptionId, SubscriptionState, matches_key,
};

// =============================================================================
// Registry-side Entry
// =============================================================================

pub(crate) struct SubscriptionEntry<T> {
    pub(crate) id: SubscriptionId,
    pub(crate) context: CallerContext,
    pub(crate) queue: SubscriptionQueue<T>,
    pub(crate) limiter: Option<RateLimiter<T>>,
    pub(crate) token: CancellationToken,
    pub(crate) created_at: Instant,
    filter: RwLock<HashSet<String>>,
    cancelled: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl<T> SubscriptionEntry<T> {
    pub(crate) fn new(
        id: SubscriptionId,
        context: CallerContext,
        policy: QueuePolicy,
        limiter: Option<RateLimiter<T>>,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            context,
            queue: SubscriptionQueue::new_priming(policy),
            limiter,
            token,
            created_at: Instant::now(),
            filter: RwLock::new(HashSet::new()),
            cancelled: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire)
    }

    /// Transition to `Cancelled`. Returns false if already cancelled.
    pub(crate) fn mark_cancelled(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        if self.is_active() {
            SubscriptionState::Active
        } else {
            SubscriptionState::Cancelled
        }
    }

    pub(crate) fn matches(&self, matcher: &dyn Matcher, key: Option<&str>) -> bool {
        matches_key(matcher, &self.filter.read(), key)
    }

    /// Add keys; returns the ones not already present, in input order.
    pub(crate) fn add_keys(&self, keys: Vec<String>) -> Vec<String> {
        let mut filter = self.filter.write();
        keys.into_iter()
            .filter(|key| filter.insert(key.clone()))
            .collect()
    }

    /// Remove keys; returns the ones that were present, in input order.
    pub(crate) fn remove_keys(&self, keys: &[String]) -> Vec<String> {
        let mut filter = self.filter.write();
        keys.iter()
            .filter(|key| filter.remove(key.as_str()))
            .cloned()
            .collect()
    }

    pub(crate) fn filter_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.filter.read().iter().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Queue an item, keeping per-subscription delivery counters.
    pub(crate) fn enqueue(&self, item: T) -> PushOutcome {
        if !self.is_active() {
            return PushOutcome::Closed;
        }
        let outcome = self.queue.push(item);
        match outcome {
            PushOutcome::Queued => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Displaced => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Rejected => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Closed => {}
        }
        outcome
    }

    /// Hold live items back until [`Self::prime`].
    pub(crate) fn hold(&self) {
        self.queue.hold();
    }

    /// Queue `initial` ahead of any live items held since creation or the
    /// last [`Self::hold`], then release them to the consumer.
    ///
    /// Returns `(queued, dropped)`, or `None` if the subscription is closed.
    pub(crate) fn prime(&self, initial: Vec<T>) -> Option<(u64, u64)> {
        let queued = u64::try_from(initial.len()).unwrap_or(u64::MAX);
        let dropped = u64::try_from(self.queue.prime(initial)?).unwrap_or(u64::MAX);
        self.delivered.fetch_add(queued, Ordering::Relaxed);
        self.dropped.fetch_add(dropped, Ordering::Relaxed);
        Some((queued, dropped))
    }

    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Cancellation Back-reference
// =============================================================================

/// Lets a [`Subscription`] cancel itself without owning its registry.
pub(crate) trait SubscriptionCanceller: Send + Sync {
    fn cancel_subscription(&self, id: SubscriptionId, reason: CancelReason) -> bool;
}

// =============================================================================
// Caller-side Handle
// =============================================================================

/// A live push subscription.
///
/// Yields delivered items in FIFO order. The stream ends once the
/// subscription is cancelled and its remaining queued items are drained; a
/// faulted subscription yields one `Err` before ending. Dropping the handle
/// cancels the subscription.
pub struct Subscription<T> {
    entry: Arc<SubscriptionEntry<T>>,
    registry: Weak<dyn SubscriptionCanceller>,
    items: BoxStream<'static, Result<T, SubscriptionError>>,
}

impl<T: Send + Sync + 'static> Subscription<T> {
    pub(crate) fn new(
        entry: Arc<SubscriptionEntry<T>>,
        registry: Weak<dyn SubscriptionCanceller>,
    ) -> Self {
        let items = stream::unfold(Arc::clone(&entry), |entry| async move {
            let next = entry.queue.pop().await?;
            Some((next, entry))
        })
        .boxed();

        Self {
            entry,
            registry,
            items,
        }
    }
}

impl<T> Subscription<T> {
    /// Subscription ID.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.entry.id
    }

    /// Owner of the subscription.
    #[must_use]
    pub fn context(&self) -> &CallerContext {
        &self.entry.context
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.entry.state()
    }

    /// Current filter keys, sorted.
    #[must_use]
    pub fn filter_keys(&self) -> Vec<String> {
        self.entry.filter_keys()
    }

    /// Items placed in this subscription's queue so far.
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.entry.delivered()
    }

    /// Items discarded by this subscription's queue policy so far.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.entry.dropped()
    }

    /// Items waiting to be consumed.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.entry.queue.len()
    }

    /// Cancel the subscription. Idempotent.
    ///
    /// Already-queued items remain readable from the stream.
    pub fn cancel(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.cancel_subscription(self.entry.id, CancelReason::Caller);
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T, SubscriptionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.items.poll_next_unpin(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if !self.entry.is_active() {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.cancel_subscription(self.entry.id, CancelReason::Dropped);
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.entry.id)
            .field("state", &self.entry.state())
            .field("filter", &self.entry.filter_keys())
            .finish_non_exhaustive()
    }
}
