//! Application Services
//!
//! The push engine and its specializations.
//!
//! - `SubscriptionRegistry`: generic admission, fan-out and cancellation
//! - `SnapshotTagValuePush`: tag values keyed by tag ID, with a current-value cache
//! - `EventMessagePush`: events delivered to every subscriber
//! - `EventMessageTopicPush`: events filtered by topic

mod queue;
mod rate_limit;
mod registry;
mod subscription;

pub mod events;
pub mod tag_values;

pub use events::{EVENT_REGISTRY, EventMessagePush, EventMessageTopicPush, TOPIC_EVENT_REGISTRY};
pub use queue::QueuePolicy;
pub use registry::{KeyFilterMode, PushOptions, RegistryBuilder, SubscriptionRegistry};
pub use subscription::Subscription;
pub use tag_values::{
    CurrentValueCache, SnapshotTagValuePush, SnapshotTagValuePushOptions, TAG_VALUE_REGISTRY,
};
