//! Subscription Registry
//!
//! Generic push-subscription engine shared by every push specialization.
//! Owns the set of live subscriptions, enforces the concurrency ceiling, and
//! fans each published item out to every matching subscription's queue.
//!
//! # Thread Safety
//!
//! - `publish` clones an `Arc` snapshot of the subscription map under a read
//!   lock and releases it before fan-out, so a slow subscriber or a
//!   concurrent subscribe/cancel never stalls delivery to the others.
//! - Admission is a lock-free slot reservation taken before any resources
//!   are allocated for the new subscription.
//! - Each subscription owns its queue and rate limiter; nothing touches
//!   another subscription's state.
//!
//! # Architecture
//!
//! ```text
//!  producer ── publish(item) ──► snapshot ──┬──► [filter?] ──► queue S1 ──► stream S1
//!                                           ├──► [filter?] ──► limiter ─tick─► queue S2
//!                                           └──► [filter?] ──► queue SN ──► stream SN
//!
//!  caller ── updates ──► reader task ──► filter S1 (+ hooks)
//!  caller ── token ────► watcher task ─► cancel S1
//! ```

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::queue::{PushOutcome, QueuePolicy};
use super::rate_limit::RateLimiter;
use super::subscription::{Subscription, SubscriptionCanceller, SubscriptionEntry};
use crate::application::error::{HookError, PushError, SubscriptionError};
use crate::application::ports::{
    KeyResolver, NoopHooks, PassthroughResolver, RegistryMonitor, RegistryStats,
    SubscriptionHooks,
};
use crate::domain::subscription::{
    CallerContext, CancelReason, ExactMatcher, KeyChanges, KeyRefCounts, Matcher,
    SubscriptionEvent, SubscriptionId, SubscriptionRequest, SubscriptionUpdate,
    SubscriptionUpdateAction,
};
use crate::domain::values::PushItem;
use crate::infrastructure::metrics;

/// Capacity of the lifecycle notification channel.
const LIFECYCLE_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Options
// =============================================================================

/// Options shared by every push specialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Maximum concurrent subscriptions. `None` or `Some(0)` means unbounded.
    pub max_concurrent_subscriptions: Option<usize>,
    /// Per-subscription queue policy.
    pub queue_policy: QueuePolicy,
}

impl PushOptions {
    /// Effective ceiling, if any.
    #[must_use]
    pub fn subscription_limit(&self) -> Option<usize> {
        self.max_concurrent_subscriptions.filter(|&limit| limit > 0)
    }
}

/// How published items are matched against subscription filters.
#[derive(Clone)]
pub enum KeyFilterMode {
    /// Every active subscription receives every item; filters are ignored.
    ReceiveAll,
    /// Items are delivered when their key satisfies the subscription filter.
    Keyed(Arc<dyn Matcher>),
}

impl std::fmt::Debug for KeyFilterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReceiveAll => f.write_str("ReceiveAll"),
            Self::Keyed(_) => f.write_str("Keyed"),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SubscriptionRegistry`].
pub struct RegistryBuilder<T: PushItem> {
    name: &'static str,
    options: PushOptions,
    filter_mode: KeyFilterMode,
    resolver: Arc<dyn KeyResolver>,
    hooks: Arc<dyn SubscriptionHooks<T>>,
}

impl<T: PushItem> RegistryBuilder<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            options: PushOptions::default(),
            filter_mode: KeyFilterMode::Keyed(Arc::new(ExactMatcher)),
            resolver: Arc::new(PassthroughResolver),
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Apply shared push options.
    #[must_use]
    pub const fn options(mut self, options: PushOptions) -> Self {
        self.options = options;
        self
    }

    /// Cap concurrent subscriptions; `0` means unbounded.
    #[must_use]
    pub const fn max_concurrent_subscriptions(mut self, limit: usize) -> Self {
        self.options.max_concurrent_subscriptions = Some(limit);
        self
    }

    /// Set the per-subscription queue policy.
    #[must_use]
    pub const fn queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.options.queue_policy = policy;
        self
    }

    /// Match keys with `matcher`.
    #[must_use]
    pub fn matcher(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.filter_mode = KeyFilterMode::Keyed(matcher);
        self
    }

    /// Deliver every item to every subscription.
    #[must_use]
    pub fn receive_all(mut self) -> Self {
        self.filter_mode = KeyFilterMode::ReceiveAll;
        self
    }

    /// Resolve requested names with `resolver`.
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn KeyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Invoke `hooks` as keys join and leave subscriptions.
    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn SubscriptionHooks<T>>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Build the registry.
    #[must_use]
    pub fn build(self) -> SubscriptionRegistry<T> {
        let (events_tx, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        SubscriptionRegistry {
            inner: Arc::new(RegistryInner {
                name: self.name,
                options: self.options,
                filter_mode: self.filter_mode,
                resolver: self.resolver,
                hooks: self.hooks,
                subscriptions: RwLock::new(HashMap::new()),
                key_refs: Mutex::new(KeyRefCounts::new()),
                next_id: AtomicU64::new(1),
                admitted: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
                disposed: AtomicBool::new(false),
                events_tx,
                counters: Counters::default(),
            }),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Push-subscription registry for items of type `T`.
///
/// Cheap to clone; clones share the same subscriptions.
///
/// # Example
///
/// ```rust
/// use adapter_push::{SubscriptionRegistry, SubscriptionRequest, CallerContext, TagValue};
/// use futures::StreamExt;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = SubscriptionRegistry::<TagValue>::builder("tag_values").build();
///
/// let mut subscription = registry
///     .subscribe(
///         CallerContext::anonymous(),
///         SubscriptionRequest::new(["T1"]),
///         CancellationToken::new(),
///     )
///     .await?;
///
/// registry.publish(TagValue::new("T1", 42.0));
/// let value = subscription.next().await.transpose()?;
/// assert_eq!(value.map(|v| v.tag_id), Some("T1".to_string()));
/// # Ok(())
/// # }
/// ```
pub struct SubscriptionRegistry<T: PushItem> {
    inner: Arc<RegistryInner<T>>,
}

impl<T: PushItem> Clone for SubscriptionRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PushItem> std::fmt::Debug for SubscriptionRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("name", &self.inner.name)
            .field("filter_mode", &self.inner.filter_mode)
            .field("options", &self.inner.options)
            .field("active", &self.inner.admitted.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: PushItem> SubscriptionRegistry<T> {
    /// Start building a registry. `name` labels logs and metrics.
    #[must_use]
    pub fn builder(name: &'static str) -> RegistryBuilder<T> {
        RegistryBuilder::new(name)
    }

    /// Registry name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Subscribe with a fixed filter.
    ///
    /// The subscription lives until `cancellation` fires, the returned
    /// stream is dropped, or the registry is disposed.
    ///
    /// # Errors
    ///
    /// - [`PushError::CapacityExceeded`] if the ceiling is already reached
    /// - [`PushError::Disposed`] if the registry has been disposed
    /// - [`PushError::InvalidRequest`] for a zero publish interval
    /// - [`PushError::Cancelled`] if `cancellation` has already fired
    pub async fn subscribe(
        &self,
        context: CallerContext,
        request: SubscriptionRequest,
        cancellation: CancellationToken,
    ) -> Result<Subscription<T>, PushError> {
        let (subscription, _) = self.open(context, request, cancellation).await?;
        Ok(subscription)
    }

    /// Subscribe with a filter the caller keeps changing through `updates`.
    ///
    /// On keyed registries, completion of `updates` ends the subscription.
    ///
    /// # Errors
    ///
    /// Same as [`SubscriptionRegistry::subscribe`].
    pub async fn subscribe_with_updates<S>(
        &self,
        context: CallerContext,
        request: SubscriptionRequest,
        updates: S,
        cancellation: CancellationToken,
    ) -> Result<Subscription<T>, PushError>
    where
        S: Stream<Item = SubscriptionUpdate> + Send + 'static,
    {
        let (subscription, entry) = self.open(context, request, cancellation).await?;
        if entry.is_active() {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.read_updates(entry, updates).await;
            });
        }
        Ok(subscription)
    }

    /// Fan `item` out to every matching subscription.
    ///
    /// Returns `true` once delivery has been attempted for every current
    /// subscription (including when none matched), `false` if the registry
    /// is disposed.
    pub fn publish(&self, item: T) -> bool {
        self.inner.publish(item, None)
    }

    /// Like [`SubscriptionRegistry::publish`], abandoning the fan-out and
    /// returning `false` if `cancellation` fires part way through.
    pub fn publish_cancellable(&self, item: T, cancellation: &CancellationToken) -> bool {
        self.inner.publish(item, Some(cancellation))
    }

    /// Receiver for lifecycle notifications raised after this call.
    #[must_use]
    pub fn lifecycle_events(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Cancel a subscription by ID. Returns false if it was not live.
    pub fn cancel(&self, id: SubscriptionId) -> bool {
        self.inner.cancel(id, CancelReason::Caller)
    }

    /// Cancel every live subscription and refuse new ones. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether [`SubscriptionRegistry::dispose`] has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    /// Keys held by at least one subscription, sorted.
    #[must_use]
    pub fn subscribed_keys(&self) -> Vec<String> {
        self.inner.key_refs.lock().active_keys()
    }

    /// Whether any subscription holds `key`.
    #[must_use]
    pub fn is_key_subscribed(&self, key: &str) -> bool {
        self.subscriber_count(key) > 0
    }

    /// Number of subscriptions holding `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner.key_refs.lock().subscriber_count(key)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.inner.stats()
    }

    async fn open(
        &self,
        context: CallerContext,
        request: SubscriptionRequest,
        cancellation: CancellationToken,
    ) -> Result<(Subscription<T>, Arc<SubscriptionEntry<T>>), PushError> {
        let inner = &self.inner;
        if self.is_disposed() {
            return Err(PushError::Disposed);
        }
        if request.publish_interval == Some(Duration::ZERO) {
            return Err(PushError::InvalidRequest(
                "publish interval must be greater than zero".to_string(),
            ));
        }
        if cancellation.is_cancelled() {
            return Err(PushError::Cancelled);
        }

        let permit = inner.admit()?;

        let keys = match inner.filter_mode {
            KeyFilterMode::ReceiveAll => Vec::new(),
            KeyFilterMode::Keyed(_) => inner.resolve(&context, &request.keys).await,
        };

        let id = SubscriptionId(inner.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(SubscriptionEntry::new(
            id,
            context,
            inner.options.queue_policy,
            request.publish_interval.map(RateLimiter::new),
            inner.shutdown.child_token(),
        ));
        let keys = entry.add_keys(keys);

        inner.subscriptions.write().insert(id, Arc::clone(&entry));
        permit.commit();

        let weak: Weak<RegistryInner<T>> = Arc::downgrade(inner);
        let weak: Weak<dyn SubscriptionCanceller> = weak;
        let subscription = Subscription::new(Arc::clone(&entry), weak);

        // dispose() may have drained the map between the check above and the insert.
        if self.is_disposed() {
            inner.cancel(id, CancelReason::Disposed);
            return Err(PushError::Disposed);
        }

        inner.track_keys_added(&entry, &keys);
        let initial = if keys.is_empty() {
            Ok(Vec::new())
        } else {
            inner.hooks.on_keys_added(&entry.context, &keys).await
        };

        metrics::set_active_subscriptions(inner.name, inner.admitted.load(Ordering::Relaxed));
        tracing::debug!(
            registry = inner.name,
            subscription_id = %id,
            keys = keys.len(),
            publish_interval = ?request.publish_interval,
            "Subscription added"
        );
        inner.notify(SubscriptionEvent::Added {
            id,
            context: entry.context.clone(),
        });

        // Live items published during the hook were held; the snapshot goes first.
        match initial {
            Ok(items) => inner.record_primed(entry.prime(items)),
            Err(error) => inner.fault(&entry, &error),
        }

        inner.spawn_watcher(&entry, cancellation);
        if entry.limiter.is_some() {
            inner.spawn_flush_loop(&entry);
        }

        Ok((subscription, entry))
    }
}

impl<T: PushItem> RegistryMonitor for SubscriptionRegistry<T> {
    fn name(&self) -> &'static str {
        self.inner.name
    }

    fn stats(&self) -> RegistryStats {
        self.inner.stats()
    }

    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

// =============================================================================
// Registry Internals
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

struct RegistryInner<T: PushItem> {
    name: &'static str,
    options: PushOptions,
    filter_mode: KeyFilterMode,
    resolver: Arc<dyn KeyResolver>,
    hooks: Arc<dyn SubscriptionHooks<T>>,
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<SubscriptionEntry<T>>>>,
    key_refs: Mutex<KeyRefCounts>,
    next_id: AtomicU64,
    admitted: AtomicUsize,
    shutdown: CancellationToken,
    disposed: AtomicBool,
    events_tx: broadcast::Sender<SubscriptionEvent>,
    counters: Counters,
}

/// A reserved admission slot, released on drop unless committed.
struct AdmissionPermit<'a> {
    admitted: &'a AtomicUsize,
    committed: bool,
}

impl AdmissionPermit<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.admitted.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl<T: PushItem> RegistryInner<T> {
    fn admit(&self) -> Result<AdmissionPermit<'_>, PushError> {
        let limit = self.options.subscription_limit();
        let mut current = self.admitted.load(Ordering::Acquire);
        loop {
            if let Some(limit) = limit
                && current >= limit
            {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::record_subscription_rejected(self.name);
                tracing::debug!(registry = self.name, limit, "Subscription rejected at capacity");
                return Err(PushError::CapacityExceeded { limit });
            }
            match self.admitted.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(AdmissionPermit {
                        admitted: &self.admitted,
                        committed: false,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Resolve names to keys, dropping failures, blanks and duplicates.
    async fn resolve(&self, context: &CallerContext, names: &[String]) -> Vec<String> {
        if names.is_empty() {
            return Vec::new();
        }
        let mut keys: Vec<String> = Vec::with_capacity(names.len());
        for key in self
            .resolver
            .resolve(context, names)
            .await
            .into_iter()
            .filter_map(Result::ok)
        {
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    fn publish(&self, item: T, cancellation: Option<&CancellationToken>) -> bool {
        if self.disposed.load(Ordering::Acquire) {
            return false;
        }
        let started = Instant::now();
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_item_published(self.name);

        // Receive-all registries never coalesce, so their items carry no key.
        let key = match self.filter_mode {
            KeyFilterMode::ReceiveAll => None,
            KeyFilterMode::Keyed(_) => match item.routing_key().filter(|key| !key.is_empty()) {
                Some(key) => Some(key),
                None => return true,
            },
        };

        let snapshot: Vec<Arc<SubscriptionEntry<T>>> =
            self.subscriptions.read().values().cloned().collect();

        for entry in snapshot {
            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                return false;
            }
            if !entry.is_active() {
                continue;
            }

            match self.entry_matches(&entry, key) {
                Ok(true) => self.deliver(&entry, item.clone(), key),
                Ok(false) => {}
                Err(error) => self.fault(&entry, &error),
            }
        }

        metrics::record_fanout_duration(self.name, started.elapsed());
        true
    }

    fn entry_matches(&self, entry: &SubscriptionEntry<T>, key: Option<&str>) -> Result<bool, HookError> {
        match &self.filter_mode {
            KeyFilterMode::ReceiveAll => Ok(true),
            KeyFilterMode::Keyed(matcher) => {
                catch_unwind(AssertUnwindSafe(|| entry.matches(matcher.as_ref(), key)))
                    .map_err(|panic| HookError::new(format!("matcher panicked: {}", panic_message(&*panic))))
            }
        }
    }

    fn deliver(&self, entry: &SubscriptionEntry<T>, item: T, key: Option<&str>) {
        match (&entry.limiter, key) {
            (Some(limiter), Some(key)) => {
                limiter.offer(key, item);
            }
            _ => self.record_outcome(entry.enqueue(item)),
        }
    }

    fn record_outcome(&self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Queued => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                metrics::record_items_delivered(self.name, 1);
            }
            PushOutcome::Displaced => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_items_delivered(self.name, 1);
                metrics::record_items_dropped(self.name, 1);
            }
            PushOutcome::Rejected => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_items_dropped(self.name, 1);
            }
            PushOutcome::Closed => {}
        }
    }

    fn record_primed(&self, primed: Option<(u64, u64)>) {
        let Some((queued, dropped)) = primed else {
            return;
        };
        if queued > 0 {
            self.counters.delivered.fetch_add(queued, Ordering::Relaxed);
            metrics::record_items_delivered(self.name, queued);
        }
        if dropped > 0 {
            self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
            metrics::record_items_dropped(self.name, dropped);
        }
    }

    fn track_keys_added(&self, entry: &SubscriptionEntry<T>, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let changes = {
            let mut refs = self.key_refs.lock();
            // Checked under the lock so a concurrent cancel cannot leak keys.
            if !entry.is_active() {
                return;
            }
            refs.add(entry.id, keys)
        };
        self.notify_key_changes(changes);
    }

    fn track_keys_removed(&self, entry: &SubscriptionEntry<T>, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let changes = self.key_refs.lock().remove(entry.id, keys);
        self.notify_key_changes(changes);
    }

    fn notify_key_changes(&self, changes: KeyChanges) {
        if changes.is_empty() {
            return;
        }
        tracing::debug!(
            registry = self.name,
            subscribed = changes.subscribed.len(),
            unsubscribed = changes.unsubscribed.len(),
            "Subscribed keys changed"
        );
        self.notify(SubscriptionEvent::KeysChanged(changes));
    }

    fn notify(&self, event: SubscriptionEvent) {
        // No receivers is the normal case.
        let _ = self.events_tx.send(event);
    }

    fn fault(&self, entry: &SubscriptionEntry<T>, error: &HookError) {
        tracing::warn!(
            registry = self.name,
            subscription_id = %entry.id,
            error = %error,
            "Subscription faulted"
        );
        entry.queue.fault(SubscriptionError::Faulted(error.to_string()));
        self.cancel(entry.id, CancelReason::Faulted);
    }

    fn cancel(&self, id: SubscriptionId, reason: CancelReason) -> bool {
        let Some(entry) = self.subscriptions.write().remove(&id) else {
            return false;
        };
        self.retire(&entry, reason);
        true
    }

    fn retire(&self, entry: &SubscriptionEntry<T>, reason: CancelReason) {
        if !entry.mark_cancelled() {
            return;
        }
        entry.token.cancel();
        entry.queue.close();
        if let Some(limiter) = &entry.limiter {
            limiter.drain();
        }
        self.admitted.fetch_sub(1, Ordering::AcqRel);

        let changes = self.key_refs.lock().remove_subscription(entry.id);

        metrics::set_active_subscriptions(self.name, self.admitted.load(Ordering::Relaxed));
        tracing::debug!(
            registry = self.name,
            subscription_id = %entry.id,
            reason = reason.as_str(),
            delivered = entry.delivered(),
            dropped = entry.dropped(),
            lifetime_ms = u64::try_from(entry.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Subscription cancelled"
        );
        self.notify(SubscriptionEvent::Cancelled { id: entry.id, reason });
        self.notify_key_changes(changes);
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();

        let drained: Vec<Arc<SubscriptionEntry<T>>> = self
            .subscriptions
            .write()
            .drain()
            .map(|(_, entry)| entry)
            .collect();

        let count = drained.len();
        for entry in drained {
            self.retire(&entry, CancelReason::Disposed);
        }
        tracing::info!(registry = self.name, cancelled = count, "Subscription registry disposed");
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_subscriptions: self.subscriptions.read().len(),
            distinct_keys: self.key_refs.lock().key_count(),
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    // =========================================================================
    // Background Tasks
    // =========================================================================

    /// Cancel the subscription when the caller's token fires.
    fn spawn_watcher(self: &Arc<Self>, entry: &Arc<SubscriptionEntry<T>>, caller: CancellationToken) {
        let registry = Arc::downgrade(self);
        let id = entry.id;
        let token = entry.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = caller.cancelled() => {
                    if let Some(registry) = registry.upgrade() {
                        registry.cancel(id, CancelReason::Caller);
                    }
                }
            }
        });
    }

    /// Move rate-limited values into the queue once per interval.
    fn spawn_flush_loop(self: &Arc<Self>, entry: &Arc<SubscriptionEntry<T>>) {
        let registry = Arc::downgrade(self);
        let entry = Arc::clone(entry);
        tokio::spawn(async move {
            let Some(limiter) = entry.limiter.as_ref() else {
                return;
            };
            let mut ticker = limiter.ticker();
            loop {
                tokio::select! {
                    () = entry.token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        for item in limiter.drain() {
                            registry.record_outcome(entry.enqueue(item));
                        }
                    }
                }
            }
        });
    }

    /// Apply filter changes until the stream ends or the subscription is cancelled.
    async fn read_updates<S>(self: Arc<Self>, entry: Arc<SubscriptionEntry<T>>, updates: S)
    where
        S: Stream<Item = SubscriptionUpdate> + Send + 'static,
    {
        let mut updates = Box::pin(updates);
        loop {
            let update = tokio::select! {
                () = entry.token.cancelled() => return,
                update = updates.next() => update,
            };

            let Some(update) = update else {
                if matches!(self.filter_mode, KeyFilterMode::Keyed(_)) {
                    self.cancel(entry.id, CancelReason::UpdatesCompleted);
                }
                return;
            };

            let applied = tokio::select! {
                () = entry.token.cancelled() => return,
                applied = self.apply_update(&entry, update) => applied,
            };
            if let Err(error) = applied {
                self.fault(&entry, &error);
                return;
            }
        }
    }

    async fn apply_update(
        &self,
        entry: &SubscriptionEntry<T>,
        update: SubscriptionUpdate,
    ) -> Result<(), HookError> {
        if matches!(self.filter_mode, KeyFilterMode::ReceiveAll) {
            tracing::debug!(
                registry = self.name,
                subscription_id = %entry.id,
                "Ignoring filter update on receive-all registry"
            );
            return Ok(());
        }

        let keys = self.resolve(&entry.context, &update.keys).await;
        if !entry.is_active() {
            return Ok(());
        }

        match update.action {
            SubscriptionUpdateAction::Subscribe => {
                entry.hold();
                let added = entry.add_keys(keys);
                if added.is_empty() {
                    entry.prime(Vec::new());
                    return Ok(());
                }
                self.track_keys_added(entry, &added);
                let initial = self.hooks.on_keys_added(&entry.context, &added).await?;
                self.record_primed(entry.prime(initial));
            }
            SubscriptionUpdateAction::Unsubscribe => {
                let removed = entry.remove_keys(&keys);
                if removed.is_empty() {
                    return Ok(());
                }
                self.track_keys_removed(entry, &removed);
                self.hooks.on_keys_removed(&entry.context, &removed).await?;
            }
        }
        Ok(())
    }
}

impl<T: PushItem> SubscriptionCanceller for RegistryInner<T> {
    fn cancel_subscription(&self, id: SubscriptionId, reason: CancelReason) -> bool {
        self.cancel(id, reason)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// =============================================================================
// Tests
// =============================================================================
