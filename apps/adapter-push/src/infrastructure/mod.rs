//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the host's ambient services.

/// In-memory tag catalogue used for tag name resolution.
pub mod catalog;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Simulated tag value and event source.
pub mod simulator;

/// OpenTelemetry tracing integration.
pub mod telemetry;
