//! Simulated Data Source
//!
//! Stands in for a real process-data connection: generates a sine wave per
//! configured tag on a fixed interval and raises events, pushing everything
//! into the hub's push specializations.
//!
//! # Generated Data
//!
//! - One [`TagValue`] per tag per tick, phase-shifted per tag
//! - A `simulator/status` event every [`STATUS_EVERY_TICKS`] ticks
//! - An `alarms/<tag>` event when a tag crosses [`ALARM_THRESHOLD`] upwards

use std::collections::HashSet;
use std::f64::consts::TAU;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

use crate::application::services::{EventMessagePush, EventMessageTopicPush, SnapshotTagValuePush};
use crate::domain::values::{EventMessage, EventPriority, TagValue, TagValueStatus};

/// Ticks per full sine period.
const PERIOD_TICKS: u64 = 60;

/// Ticks between status events.
pub const STATUS_EVERY_TICKS: u64 = 10;

/// Value above which an alarm event is raised.
pub const ALARM_THRESHOLD: f64 = 0.95;

/// Topic of periodic status events.
pub const STATUS_TOPIC: &str = "simulator/status";

/// Push targets fed by the simulator.
#[derive(Debug, Clone)]
pub struct PushTargets {
    /// Tag value push.
    pub tag_values: SnapshotTagValuePush,
    /// Receive-all event push.
    pub events: EventMessagePush,
    /// Topic event push.
    pub topic_events: EventMessageTopicPush,
}

/// Generates simulated tag values and events.
pub struct SimulatedSource {
    tags: Vec<String>,
    interval: Duration,
    targets: PushTargets,
    cancel: CancellationToken,
    alarmed: HashSet<String>,
}

impl SimulatedSource {
    /// Create a source for `tags`, ticking every `interval`.
    #[must_use]
    pub fn new(
        tags: Vec<String>,
        interval: Duration,
        targets: PushTargets,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tags,
            interval,
            targets,
            cancel,
            alarmed: HashSet::new(),
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = IntervalStream::new(interval);
        let mut tick: u64 = 0;

        tracing::info!(
            tags = self.tags.len(),
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "Simulated source started"
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!(ticks = tick, "Simulated source cancelled");
                    break;
                }
                next = ticks.next() => {
                    if next.is_none() {
                        break;
                    }
                    self.step(tick);
                    tick = tick.wrapping_add(1);
                }
            }
        }

        tracing::info!("Simulated source stopped");
    }

    /// Publish one tick's worth of values and events.
    pub fn step(&mut self, tick: u64) {
        for (index, tag) in self.tags.iter().enumerate() {
            let value = sample(tick, index);
            self.targets.tag_values.value_received(
                TagValue::new(tag.clone(), value)
                    .with_status(TagValueStatus::Good)
                    .with_units("ratio"),
            );

            if value > ALARM_THRESHOLD {
                if self.alarmed.insert(tag.clone()) {
                    self.raise(
                        EventMessage::new(format!("{tag} above {ALARM_THRESHOLD}"))
                            .with_topic(format!("alarms/{tag}"))
                            .with_category("alarm")
                            .with_priority(EventPriority::High)
                            .with_property("tag", tag.clone())
                            .with_property("value", format!("{value:.3}")),
                    );
                }
            } else {
                self.alarmed.remove(tag);
            }
        }

        if tick % STATUS_EVERY_TICKS == 0 {
            self.raise(
                EventMessage::new("simulator running")
                    .with_topic(STATUS_TOPIC)
                    .with_category("status")
                    .with_priority(EventPriority::Low)
                    .with_property("tick", tick.to_string()),
            );
        }
    }

    fn raise(&self, event: EventMessage) {
        self.targets.events.value_received(event.clone());
        self.targets.topic_events.value_received(event);
    }
}

/// Sine sample for tag `index` at `tick`.
#[allow(clippy::cast_precision_loss)]
fn sample(tick: u64, index: usize) -> f64 {
    let phase = (tick % PERIOD_TICKS) as f64 / PERIOD_TICKS as f64;
    let offset = index as f64 * 0.25;
    ((phase + offset) * TAU).sin()
}
