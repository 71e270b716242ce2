//! Event Message Push
//!
//! Two push specializations for [`EventMessage`]s:
//!
//! - [`EventMessagePush`]: every subscriber receives every event
//! - [`EventMessageTopicPush`]: subscribers filter by topic, with exact
//!   matching by default or a caller-supplied [`Matcher`] for hierarchies
//!
//! An event without a topic (or with an empty one) never reaches a
//! topic-filtered subscriber, whatever the matcher.

use std::sync::Arc;

use futures::Stream;
use tokio_util::sync::CancellationToken;

use super::registry::{PushOptions, SubscriptionRegistry};
use super::subscription::Subscription;
use crate::application::error::PushError;
use crate::application::ports::PassthroughResolver;
use crate::domain::subscription::{
    CallerContext, ExactMatcher, Matcher, SubscriptionRequest, SubscriptionUpdate,
};
use crate::domain::values::EventMessage;

/// Registry name of [`EventMessagePush`].
pub const EVENT_REGISTRY: &str = "events";

/// Registry name of [`EventMessageTopicPush`].
pub const TOPIC_EVENT_REGISTRY: &str = "topic_events";

// =============================================================================
// Receive-all Events
// =============================================================================

/// Push of every event to every subscriber.
#[derive(Debug, Clone)]
pub struct EventMessagePush {
    registry: SubscriptionRegistry<EventMessage>,
}

impl EventMessagePush {
    /// Create an event push.
    #[must_use]
    pub fn new(options: PushOptions) -> Self {
        let registry = SubscriptionRegistry::builder(EVENT_REGISTRY)
            .options(options)
            .receive_all()
            .build();
        Self { registry }
    }

    /// Subscribe to all events.
    ///
    /// # Errors
    ///
    /// See [`SubscriptionRegistry::subscribe`].
    pub async fn subscribe(
        &self,
        context: CallerContext,
        cancellation: CancellationToken,
    ) -> Result<Subscription<EventMessage>, PushError> {
        self.registry
            .subscribe(context, SubscriptionRequest::empty(), cancellation)
            .await
    }

    /// Push `event` to every subscriber.
    pub fn value_received(&self, event: EventMessage) -> bool {
        self.registry.publish(event)
    }

    /// Like [`EventMessagePush::value_received`], abandoning fan-out on cancellation.
    pub fn value_received_cancellable(&self, event: EventMessage, cancellation: &CancellationToken) -> bool {
        self.registry.publish_cancellable(event, cancellation)
    }

    /// Underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry<EventMessage> {
        &self.registry
    }

    /// Cancel every subscription and stop accepting new ones.
    pub fn dispose(&self) {
        self.registry.dispose();
    }
}

// =============================================================================
// Topic-filtered Events
// =============================================================================

/// Push of events to subscribers of their topic.
#[derive(Debug, Clone)]
pub struct EventMessageTopicPush {
    registry: SubscriptionRegistry<EventMessage>,
}

impl EventMessageTopicPush {
    /// Create a topic push. `matcher` defaults to exact topic matching.
    #[must_use]
    pub fn new(options: PushOptions, matcher: Option<Arc<dyn Matcher>>) -> Self {
        let matcher = matcher.unwrap_or_else(|| Arc::new(ExactMatcher));
        let registry = SubscriptionRegistry::builder(TOPIC_EVENT_REGISTRY)
            .options(options)
            .matcher(matcher)
            .resolver(Arc::new(PassthroughResolver))
            .build();
        Self { registry }
    }

    /// Subscribe to a fixed set of topics.
    ///
    /// # Errors
    ///
    /// See [`SubscriptionRegistry::subscribe`].
    pub async fn subscribe(
        &self,
        context: CallerContext,
        request: SubscriptionRequest,
        cancellation: CancellationToken,
    ) -> Result<Subscription<EventMessage>, PushError> {
        self.registry.subscribe(context, request, cancellation).await
    }

    /// Subscribe to a set of topics the caller keeps changing.
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
    ) -> Result<Subscription<EventMessage>, PushError>
    where
        S: Stream<Item = SubscriptionUpdate> + Send + 'static,
    {
        self.registry
            .subscribe_with_updates(context, request, updates, cancellation)
            .await
    }

    /// Push `event` to subscribers whose filter matches its topic.
    pub fn value_received(&self, event: EventMessage) -> bool {
        self.registry.publish(event)
    }

    /// Like [`EventMessageTopicPush::value_received`], abandoning fan-out on cancellation.
    pub fn value_received_cancellable(&self, event: EventMessage, cancellation: &CancellationToken) -> bool {
        self.registry.publish_cancellable(event, cancellation)
    }

    /// Whether any subscription holds `topic` in its filter.
    #[must_use]
    pub fn is_topic_subscribed(&self, topic: &str) -> bool {
        self.registry.is_key_subscribed(topic)
    }

    /// Topics held by at least one subscription, sorted.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.registry.subscribed_keys()
    }

    /// Underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry<EventMessage> {
        &self.registry
    }

    /// Cancel every subscription and stop accepting new ones.
    pub fn dispose(&self) {
        self.registry.dispose();
    }
}
