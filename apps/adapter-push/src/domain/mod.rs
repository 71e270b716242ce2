//! Domain Layer - Core value and subscription types.
//!
//! Pure types with no runtime dependencies: the value model carried by the
//! push engine, subscription identifiers and requests, key matchers and
//! key reference counting.

/// Tag value and event message types.
pub mod values;

/// Subscription types, matchers and key tracking.
pub mod subscription;
