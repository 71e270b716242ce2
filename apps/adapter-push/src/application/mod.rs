//! Application Layer - Push registries and port definitions.
//!
//! This layer contains the generic subscription registry, its three
//! specializations, and the port interfaces through which adapters plug in
//! key resolution and subscribe-time hooks.

/// Error types surfaced to subscribers and producers.
pub mod error;

/// Port interfaces (key resolution, hooks, monitoring).
pub mod ports;

/// Subscription registry and push specializations.
pub mod services;
