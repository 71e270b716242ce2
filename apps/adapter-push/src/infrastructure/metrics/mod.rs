//! Prometheus Metrics Module
//!
//! Exposes push engine metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Items**: Counts of items published, delivered and dropped per registry
//! - **Subscriptions**: Active and rejected subscription counts
//! - **Latency**: Fan-out duration per publish
//!
//! Every metric carries a `registry` label naming the push specialization.
//! Recording is a no-op until [`init_metrics`] installs the recorder.
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "push_items_published_total",
        "Total items offered to a push registry"
    );
    describe_counter!(
        "push_items_delivered_total",
        "Total items placed in subscriber queues"
    );
    describe_counter!(
        "push_items_dropped_total",
        "Total items discarded by bounded subscriber queues"
    );

    describe_gauge!(
        "push_active_subscriptions",
        "Number of live subscriptions"
    );
    describe_counter!(
        "push_subscriptions_rejected_total",
        "Total subscribe calls rejected at the concurrency ceiling"
    );

    describe_histogram!(
        "push_fanout_seconds",
        "Time to fan one item out to all matching subscriptions"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an item offered to `registry`.
pub fn record_item_published(registry: &'static str) {
    counter!("push_items_published_total", "registry" => registry).increment(1);
}

/// Record items placed in subscriber queues.
pub fn record_items_delivered(registry: &'static str, count: u64) {
    counter!("push_items_delivered_total", "registry" => registry).increment(count);
}

/// Record items discarded by a queue policy.
pub fn record_items_dropped(registry: &'static str, count: u64) {
    counter!("push_items_dropped_total", "registry" => registry).increment(count);
}

/// Record a subscribe call rejected for capacity.
pub fn record_subscription_rejected(registry: &'static str) {
    counter!("push_subscriptions_rejected_total", "registry" => registry).increment(1);
}

/// Update the live subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(registry: &'static str, count: usize) {
    gauge!("push_active_subscriptions", "registry" => registry).set(count as f64);
}

/// Record how long one fan-out took.
pub fn record_fanout_duration(registry: &'static str, duration: Duration) {
    histogram!("push_fanout_seconds", "registry" => registry).record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
