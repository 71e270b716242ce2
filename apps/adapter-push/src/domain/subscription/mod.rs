//! Subscription Domain Types
//!
//! Types shared by every push registry: identifiers, lifecycle state, caller
//! context, subscription requests and the filter-change records a caller
//! streams in while a subscription is live.
//!
//! # Design
//!
//! - [`matcher`]: predicates deciding whether an incoming key satisfies a
//!   subscribed filter key
//! - [`refcount`]: registry-wide reference counting of subscribed keys, so an
//!   adapter subscribes upstream once per key no matter how many callers want it

pub mod matcher;
pub mod refcount;

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

pub use matcher::{ExactMatcher, Matcher, PredicateMatcher, TopicHierarchyMatcher, matches_key};
pub use refcount::{KeyChanges, KeyRefCounts};

// =============================================================================
// Identifiers & State
// =============================================================================

/// Unique subscription identifier.
///
/// Monotonically assigned by a registry; never reused for the registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Receiving items.
    Active,
    /// Terminal. No further items are queued.
    Cancelled,
}

/// Why a subscription was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired or `cancel()` was called.
    Caller,
    /// The subscription stream was dropped.
    Dropped,
    /// The caller's filter update stream completed.
    UpdatesCompleted,
    /// The registry was disposed.
    Disposed,
    /// A hook or matcher failed for this subscription.
    Faulted,
}

impl CancelReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Dropped => "dropped",
            Self::UpdatesCompleted => "updates_completed",
            Self::Disposed => "disposed",
            Self::Faulted => "faulted",
        }
    }
}

// =============================================================================
// Caller Context
// =============================================================================

/// Opaque identity of the caller that owns a subscription.
///
/// Threaded through to resolvers and hooks unchanged; no authorization
/// decisions are made by the push engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    session_id: Uuid,
    principal: Option<String>,
}

impl CallerContext {
    /// Create a context for a named principal.
    #[must_use]
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            principal: Some(principal.into()),
        }
    }

    /// Create a context with no principal.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            principal: None,
        }
    }

    /// Session identifier, unique per context.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The principal name, if any.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }
}

// =============================================================================
// Requests & Updates
// =============================================================================

/// Initial filter for a new subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Names or keys to subscribe to. Ignored by receive-all registries.
    pub keys: Vec<String>,
    /// Coalescing window; at most one item per key is delivered per interval.
    pub publish_interval: Option<Duration>,
}

impl SubscriptionRequest {
    /// Request the given keys.
    #[must_use]
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            publish_interval: None,
        }
    }

    /// Request with an empty filter.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rate-limit delivery to one item per key per `interval`.
    #[must_use]
    pub const fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = Some(interval);
        self
    }
}

/// Direction of a filter change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionUpdateAction {
    /// Add keys to the filter.
    Subscribe,
    /// Remove keys from the filter.
    Unsubscribe,
}

/// A filter change streamed in by the owner of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    /// Add or remove.
    pub action: SubscriptionUpdateAction,
    /// Names or keys affected.
    pub keys: Vec<String>,
}

impl SubscriptionUpdate {
    /// Add keys to the filter.
    #[must_use]
    pub fn subscribe<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: SubscriptionUpdateAction::Subscribe,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Remove keys from the filter.
    #[must_use]
    pub fn unsubscribe<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: SubscriptionUpdateAction::Unsubscribe,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

// =============================================================================
// Lifecycle Notifications
// =============================================================================

/// Notification raised by a registry as subscriptions come and go.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// A subscription was admitted and registered.
    Added {
        /// Subscription ID.
        id: SubscriptionId,
        /// Owner of the subscription.
        context: CallerContext,
    },
    /// A subscription reached the `Cancelled` state.
    Cancelled {
        /// Subscription ID.
        id: SubscriptionId,
        /// Why it was cancelled.
        reason: CancelReason,
    },
    /// The registry-wide set of subscribed keys changed.
    KeysChanged(KeyChanges),
}

// =============================================================================
// Tests
// =============================================================================
