//! Push Engine Errors
//!
//! Caller-facing contract violations are returned synchronously from
//! `subscribe`; subscription faults are delivered through the faulted
//! subscription's own stream.

/// Errors returned when a subscription cannot be created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// The registry already holds its maximum number of subscriptions.
    #[error("subscription limit of {limit} reached")]
    CapacityExceeded {
        /// Configured ceiling.
        limit: usize,
    },

    /// The registry has been disposed.
    #[error("subscription registry has been disposed")]
    Disposed,

    /// The request is malformed.
    #[error("invalid subscription request: {0}")]
    InvalidRequest(String),

    /// The caller's cancellation token fired before the subscription opened.
    #[error("subscription cancelled before it opened")]
    Cancelled,
}

/// Terminal error yielded by a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// A hook or matcher failed while serving this subscription.
    #[error("subscription faulted: {0}")]
    Faulted(String),
}

/// A name could not be resolved to a canonical key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// Blank name.
    #[error("name cannot be empty")]
    EmptyName,

    /// No key is known by this name.
    #[error("unknown name: {0}")]
    NotFound(String),

    /// The backing catalogue could not be consulted.
    #[error("resolver unavailable: {0}")]
    Unavailable(String),
}

/// A subscribe-time hook failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Create a hook error from any message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
