//! Port Interfaces
//!
//! Contracts through which an adapter plugs into the push engine.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`KeyResolver`]: turns caller-supplied names into canonical keys,
//!   possibly by consulting an external catalogue
//! - [`SubscriptionHooks`]: called when keys join or leave a subscription's
//!   filter; may return items to push to that subscription immediately
//!
//! ## Monitoring
//!
//! - [`RegistryMonitor`]: read-only view of a registry for health reporting

use async_trait::async_trait;

use crate::application::error::{HookError, ResolutionError};
use crate::domain::subscription::CallerContext;

// =============================================================================
// Key Resolution
// =============================================================================

/// Resolves caller-supplied names to canonical keys.
///
/// Each name resolves independently; a failed name is dropped from the
/// subscription filter and the rest proceed.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Resolve `names` in order, one result per name.
    async fn resolve(
        &self,
        context: &CallerContext,
        names: &[String],
    ) -> Vec<Result<String, ResolutionError>>;
}

/// Uses names as keys unchanged, rejecting blank names.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl KeyResolver for PassthroughResolver {
    async fn resolve(
        &self,
        _context: &CallerContext,
        names: &[String],
    ) -> Vec<Result<String, ResolutionError>> {
        names
            .iter()
            .map(|name| {
                if name.trim().is_empty() {
                    Err(ResolutionError::EmptyName)
                } else {
                    Ok(name.clone())
                }
            })
            .collect()
    }
}

// =============================================================================
// Subscription Hooks
// =============================================================================

/// Callbacks invoked when keys join or leave a single subscription's filter.
///
/// Errors fault only the subscription the hook ran for.
#[async_trait]
pub trait SubscriptionHooks<T: Send + 'static>: Send + Sync {
    /// Keys were added to a subscription's filter.
    ///
    /// Returned items are queued to that subscription only, ahead of any
    /// later live values.
    async fn on_keys_added(
        &self,
        _context: &CallerContext,
        _keys: &[String],
    ) -> Result<Vec<T>, HookError> {
        Ok(Vec::new())
    }

    /// Keys were removed from a subscription's filter.
    async fn on_keys_removed(
        &self,
        _context: &CallerContext,
        _keys: &[String],
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl<T: Send + 'static> SubscriptionHooks<T> for NoopHooks {}

// =============================================================================
// Monitoring
// =============================================================================

/// Point-in-time registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Live subscriptions.
    pub active_subscriptions: usize,
    /// Distinct keys with at least one subscriber.
    pub distinct_keys: usize,
    /// Items offered to `publish`.
    pub published: u64,
    /// Items placed in subscriber queues.
    pub delivered: u64,
    /// Items discarded by bounded queue policies.
    pub dropped: u64,
    /// Subscribe calls rejected for capacity.
    pub rejected: u64,
}

/// Read-only registry view used by the health endpoint.
pub trait RegistryMonitor: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Current statistics.
    fn stats(&self) -> RegistryStats;

    /// Whether the registry has been disposed.
    fn is_disposed(&self) -> bool;
}
