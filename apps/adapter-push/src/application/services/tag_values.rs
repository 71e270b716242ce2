//! Snapshot Tag Value Push
//!
//! Push specialization for real-time tag values. Subscriptions are keyed by
//! tag identifier, names are resolved through a [`KeyResolver`], and the
//! last value seen per tag is cached so a new subscriber can receive it
//! straight away.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::registry::{PushOptions, SubscriptionRegistry};
use super::subscription::Subscription;
use crate::application::error::{HookError, PushError};
use crate::application::ports::{KeyResolver, NoopHooks, SubscriptionHooks};
use crate::domain::subscription::{
    CallerContext, ExactMatcher, SubscriptionRequest, SubscriptionUpdate,
};
use crate::domain::values::TagValue;

/// Registry name used in logs and metrics.
pub const TAG_VALUE_REGISTRY: &str = "tag_values";

/// Options for [`SnapshotTagValuePush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotTagValuePushOptions {
    /// Shared push options.
    pub push: PushOptions,
    /// Queue the cached value of each tag when it joins a subscription.
    pub emit_current_value_on_subscribe: bool,
}

impl Default for SnapshotTagValuePushOptions {
    fn default() -> Self {
        Self {
            push: PushOptions::default(),
            emit_current_value_on_subscribe: true,
        }
    }
}

// =============================================================================
// Current Value Cache
// =============================================================================

/// Last known value per tag.
#[derive(Debug, Default)]
pub struct CurrentValueCache {
    values: RwLock<HashMap<String, TagValue>>,
}

impl CurrentValueCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` unless the cache already holds a newer sample for its tag.
    ///
    /// Returns true if the cache was updated.
    pub fn update(&self, value: &TagValue) -> bool {
        let mut values = self.values.write();
        match values.get(&value.tag_id) {
            Some(current) if current.utc_sample_time > value.utc_sample_time => false,
            _ => {
                values.insert(value.tag_id.clone(), value.clone());
                true
            }
        }
    }

    /// Cached value for `tag`.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<TagValue> {
        self.values.read().get(tag).cloned()
    }

    /// Cached values for `tags`, skipping tags with no value yet.
    #[must_use]
    pub fn get_many(&self, tags: &[String]) -> Vec<TagValue> {
        let values = self.values.read();
        tags.iter().filter_map(|tag| values.get(tag).cloned()).collect()
    }

    /// Number of cached tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[async_trait]
impl SubscriptionHooks<TagValue> for CurrentValueCache {
    async fn on_keys_added(
        &self,
        _context: &CallerContext,
        keys: &[String],
    ) -> Result<Vec<TagValue>, HookError> {
        Ok(self.get_many(keys))
    }
}

// =============================================================================
// Tag Value Push
// =============================================================================

/// Keyed push of [`TagValue`]s with a current-value snapshot on subscribe.
#[derive(Debug, Clone)]
pub struct SnapshotTagValuePush {
    registry: SubscriptionRegistry<TagValue>,
    cache: Arc<CurrentValueCache>,
}

impl SnapshotTagValuePush {
    /// Create a tag value push using `resolver` to map tag names to IDs.
    #[must_use]
    pub fn new(options: SnapshotTagValuePushOptions, resolver: Arc<dyn KeyResolver>) -> Self {
        let cache = Arc::new(CurrentValueCache::new());
        let hooks: Arc<dyn SubscriptionHooks<TagValue>> = if options.emit_current_value_on_subscribe
        {
            Arc::clone(&cache) as Arc<dyn SubscriptionHooks<TagValue>>
        } else {
            Arc::new(NoopHooks)
        };

        let registry = SubscriptionRegistry::builder(TAG_VALUE_REGISTRY)
            .options(options.push)
            .matcher(Arc::new(ExactMatcher))
            .resolver(resolver)
            .hooks(hooks)
            .build();

        Self { registry, cache }
    }

    /// Subscribe to a fixed set of tags.
    ///
    /// # Errors
    ///
    /// See [`SubscriptionRegistry::subscribe`].
    pub async fn subscribe(
        &self,
        context: CallerContext,
        request: SubscriptionRequest,
        cancellation: CancellationToken,
    ) -> Result<Subscription<TagValue>, PushError> {
        self.registry.subscribe(context, request, cancellation).await
    }

    /// Subscribe to a set of tags the caller keeps changing.
    ///
    /// # Errors
    ///
    /// See [`SubscriptionRegistry::subscribe`].
    pub async fn subscribe_with_updates<S>(
        &self,
        context: CallerContext,
        request: SubscriptionRequest,
        updates: S,
        cancellation: CancellationToken,
    ) -> Result<Subscription<TagValue>, PushError>
    where
        S: Stream<Item = SubscriptionUpdate> + Send + 'static,
    {
        self.registry
            .subscribe_with_updates(context, request, updates, cancellation)
            .await
    }

    /// Record a new value and push it to subscribers of its tag.
    pub fn value_received(&self, value: TagValue) -> bool {
        if self.registry.is_disposed() {
            return false;
        }
        self.cache.update(&value);
        self.registry.publish(value)
    }

    /// Like [`SnapshotTagValuePush::value_received`], abandoning fan-out on cancellation.
    pub fn value_received_cancellable(&self, value: TagValue, cancellation: &CancellationToken) -> bool {
        if self.registry.is_disposed() {
            return false;
        }
        self.cache.update(&value);
        self.registry.publish_cancellable(value, cancellation)
    }

    /// Last value received for `tag`.
    #[must_use]
    pub fn current_value(&self, tag: &str) -> Option<TagValue> {
        self.cache.get(tag)
    }

    /// Tags with at least one subscriber.
    #[must_use]
    pub fn subscribed_tags(&self) -> Vec<String> {
        self.registry.subscribed_keys()
    }

    /// Whether any subscription holds `tag`.
    #[must_use]
    pub fn is_tag_subscribed(&self, tag: &str) -> bool {
        self.registry.is_key_subscribed(tag)
    }

    /// Underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry<TagValue> {
        &self.registry
    }

    /// Cancel every subscription and stop accepting new ones.
    pub fn dispose(&self) {
        self.registry.dispose();
    }
}
