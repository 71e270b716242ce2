//! Adapter Push Hub Binary
//!
//! Runs the push engine against a simulated data source.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin adapter-push
//! ```
//!
//! # Environment Variables
//!
//! - `PUSH_MAX_TAG_VALUE_SUBSCRIPTIONS`: Tag value subscription ceiling (default: 0 = unbounded)
//! - `PUSH_MAX_EVENT_SUBSCRIPTIONS`: Event subscription ceiling (default: 0 = unbounded)
//! - `PUSH_MAX_TOPIC_SUBSCRIPTIONS`: Topic event subscription ceiling (default: 0 = unbounded)
//! - `PUSH_QUEUE_CAPACITY`: Per-subscription queue capacity (default: 0 = unbounded)
//! - `PUSH_QUEUE_OVERFLOW`: drop-oldest | drop-newest (default: drop-oldest)
//! - `PUSH_EMIT_CURRENT_VALUE`: Send cached values on subscribe (default: true)
//! - `PUSH_TOPIC_HIERARCHY`: Match topics hierarchically (default: true)
//! - `PUSH_HEALTH_PORT`: Health check and metrics HTTP port (default: 8083)
//! - `PUSH_SIM_INTERVAL_MS`: Simulated sample interval (default: 1000)
//! - `PUSH_SIM_TAGS`: Comma separated simulated tags
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: adapter-push-hub)
//! - `RUST_LOG`: Log filter (default: `adapter_push=info`)

use std::sync::Arc;
use std::time::Duration;

use adapter_push::application::ports::{KeyResolver, RegistryMonitor};
use adapter_push::infrastructure::catalog::{TagCatalogResolver, TagDefinition};
use adapter_push::infrastructure::health::{HealthServer, HealthServerState};
use adapter_push::infrastructure::simulator::{PushTargets, SimulatedSource};
use adapter_push::infrastructure::telemetry;
use adapter_push::{
    EventMessagePush, EventMessageTopicPush, HubConfig, Matcher, SnapshotTagValuePush,
    SubscriptionEvent, TopicHierarchyMatcher, init_metrics,
};
use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        otel_export = telemetry_guard.is_exporting(),
        "Starting Adapter Push Hub"
    );

    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = HubConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Tag catalogue for name resolution
    let catalog = TagCatalogResolver::with_tags(
        config
            .simulation
            .tags
            .iter()
            .map(|tag| TagDefinition::new(tag.clone(), tag.clone()).with_units("ratio")),
    );
    let resolver: Arc<dyn KeyResolver> = Arc::new(catalog);

    // Push specializations
    let tag_values = SnapshotTagValuePush::new(config.push.tag_value_options(), resolver);
    let events = EventMessagePush::new(config.push.event_options());
    let topic_matcher: Option<Arc<dyn Matcher>> = config
        .push
        .topic_hierarchy
        .then(|| Arc::new(TopicHierarchyMatcher::default()) as Arc<dyn Matcher>);
    let topic_events = EventMessageTopicPush::new(config.push.topic_options(), topic_matcher);

    let upstream_watch = spawn_upstream_watch(&tag_values, shutdown_token.clone());

    // Health server
    let monitors: Vec<Arc<dyn RegistryMonitor>> = vec![
        Arc::new(tag_values.registry().clone()),
        Arc::new(events.registry().clone()),
        Arc::new(topic_events.registry().clone()),
    ];
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        monitors,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Simulated source
    let source = SimulatedSource::new(
        config.simulation.tags.clone(),
        config.simulation.interval,
        PushTargets {
            tag_values: tag_values.clone(),
            events: events.clone(),
            topic_events: topic_events.clone(),
        },
        shutdown_token.clone(),
    );
    let source_handle = tokio::spawn(source.run());

    tracing::info!("Adapter push hub ready");

    await_shutdown(shutdown_token).await;

    // Stop producers before tearing down subscriptions.
    join_with_timeout("simulated source", source_handle).await;

    tag_values.dispose();
    events.dispose();
    topic_events.dispose();

    join_with_timeout("upstream watch", upstream_watch).await;
    join_with_timeout("health server", health_handle).await;

    tracing::info!("Adapter push hub stopped");
    Ok(())
}

/// Log upstream subscribe/unsubscribe transitions for tag values.
///
/// A real adapter would open or close its source subscriptions here.
fn spawn_upstream_watch(tag_values: &SnapshotTagValuePush, cancel: CancellationToken) -> JoinHandle<()> {
    let mut lifecycle = tag_values.registry().lifecycle_events();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = lifecycle.recv() => event,
            };
            match event {
                Ok(SubscriptionEvent::KeysChanged(changes)) => {
                    for key in &changes.subscribed {
                        tracing::info!(key = %key, "Upstream subscribe");
                    }
                    for key in &changes.unsubscribed {
                        tracing::info!(key = %key, "Upstream unsubscribe");
                    }
                }
                Ok(SubscriptionEvent::Added { id, context }) => {
                    tracing::info!(
                        subscription_id = %id,
                        session_id = %context.session_id(),
                        "Tag value subscription added"
                    );
                }
                Ok(SubscriptionEvent::Cancelled { id, reason }) => {
                    tracing::info!(
                        subscription_id = %id,
                        reason = reason.as_str(),
                        "Tag value subscription cancelled"
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Lifecycle watcher lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Wait for a background task, giving up after [`SHUTDOWN_TIMEOUT`].
async fn join_with_timeout(name: &str, handle: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task failed"),
        Err(_) => tracing::warn!(task = name, "Task did not stop before shutdown timeout"),
    }
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        max_tag_value_subscriptions = config.push.max_tag_value_subscriptions,
        max_event_subscriptions = config.push.max_event_subscriptions,
        max_topic_subscriptions = config.push.max_topic_subscriptions,
        queue_capacity = config.push.queue_capacity,
        overflow = config.push.overflow.as_str(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        tags = ?config.simulation.tags,
        interval_ms = u64::try_from(config.simulation.interval.as_millis()).unwrap_or(u64::MAX),
        "Simulation settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
