#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Adapter Push Hub - Live Subscription Fan-out
//!
//! Push-subscription engine for process-data adapters. Producers publish tag
//! values and events as they arrive; the engine fans each item out to every
//! live subscription whose filter matches, with per-subscription queues,
//! optional rate limiting, and admission control.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Item and subscription types with no runtime dependencies
//!   - `values`: Tag values, events and their routing keys
//!   - `subscription`: IDs, requests, lifecycle events, matchers, key refcounts
//!
//! - **Application**: The push engine and its port definitions
//!   - `ports`: Key resolution, subscription hooks, registry monitoring
//!   - `services`: Generic registry plus tag value, event and topic pushes
//!
//! - **Infrastructure**: Host services
//!   - `catalog`: In-memory tag catalogue resolver
//!   - `config`: Environment configuration
//!   - `health`: Health check and metrics HTTP endpoint
//!   - `simulator`: Simulated data source for the demo host
//!
//! # Data Flow
//!
//! ```text
//!                      ┌──────────────────────┐
//! Source ── publish ──►│ SubscriptionRegistry │──► queue ──► Subscription 1
//!                      │  (snapshot fan-out)  │──► limiter ─► Subscription 2
//!                      └──────────────────────┘──► queue ──► Subscription N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Item and subscription types.
pub mod domain;

/// Application layer - Push engine and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and host services.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::subscription::{
    CallerContext, CancelReason, ExactMatcher, KeyChanges, Matcher, PredicateMatcher,
    SubscriptionEvent, SubscriptionId, SubscriptionRequest, SubscriptionState,
    SubscriptionUpdate, SubscriptionUpdateAction, TopicHierarchyMatcher,
};
pub use domain::values::{
    EventMessage, EventPriority, PushItem, TagValue, TagValueStatus, Variant,
};

// Errors
pub use application::error::{HookError, PushError, ResolutionError, SubscriptionError};

// Ports
pub use application::ports::{
    KeyResolver, NoopHooks, PassthroughResolver, RegistryMonitor, RegistryStats,
    SubscriptionHooks,
};

// Push engine
pub use application::services::{
    CurrentValueCache, EventMessagePush, EventMessageTopicPush, KeyFilterMode, PushOptions,
    QueuePolicy, RegistryBuilder, SnapshotTagValuePush, SnapshotTagValuePushOptions,
    Subscription, SubscriptionRegistry,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, HubConfig, OverflowPolicy, PushSettings, ServerSettings, SimulationSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
