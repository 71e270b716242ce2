//! Process Data Value Types
//!
//! The minimal value model carried through the push engine: tag value
//! snapshots and event messages. The engine only ever inspects the routing
//! key of an item; payloads, quality and timestamps pass through untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Push Items
// =============================================================================

/// An item that can be fanned out to push subscribers.
pub trait PushItem: Clone + Send + Sync + 'static {
    /// Key used for filter matching.
    ///
    /// `None` (or an empty string) never matches a keyed subscription.
    fn routing_key(&self) -> Option<&str>;
}

// =============================================================================
// Variant
// =============================================================================

/// A scalar or array value held by a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Variant {
    /// No value.
    #[default]
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Double precision float.
    Double(f64),
    /// Text value.
    Text(String),
    /// Array of values.
    Array(Vec<Self>),
}

impl Variant {
    /// Get the name of the variant type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Int64(_) => "int64",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Array(_) => "array",
        }
    }

    /// Numeric view of the value, if it has one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int64(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            Self::Null | Self::Text(_) | Self::Array(_) => None,
        }
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<i64> for Variant {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

// =============================================================================
// Tag Values
// =============================================================================

/// Quality of a tag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TagValueStatus {
    /// Value is trustworthy.
    #[default]
    Good,
    /// Value may be stale or estimated.
    Uncertain,
    /// Value should not be used.
    Bad,
}

/// A snapshot value for a single tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagValue {
    /// Canonical tag identifier.
    pub tag_id: String,
    /// Sample timestamp.
    pub utc_sample_time: DateTime<Utc>,
    /// The value.
    pub value: Variant,
    /// Value quality.
    pub status: TagValueStatus,
    /// Engineering units, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl TagValue {
    /// Create a good-quality value sampled now.
    #[must_use]
    pub fn new(tag_id: impl Into<String>, value: impl Into<Variant>) -> Self {
        Self {
            tag_id: tag_id.into(),
            utc_sample_time: Utc::now(),
            value: value.into(),
            status: TagValueStatus::Good,
            units: None,
        }
    }

    /// Set the sample time.
    #[must_use]
    pub fn with_sample_time(mut self, utc_sample_time: DateTime<Utc>) -> Self {
        self.utc_sample_time = utc_sample_time;
        self
    }

    /// Set the quality status.
    #[must_use]
    pub fn with_status(mut self, status: TagValueStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the engineering units.
    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }
}

impl PushItem for TagValue {
    fn routing_key(&self) -> Option<&str> {
        Some(&self.tag_id)
    }
}

// =============================================================================
// Event Messages
// =============================================================================

/// Event priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    /// Informational.
    Low,
    /// Normal priority.
    #[default]
    Medium,
    /// Needs attention.
    High,
    /// Needs immediate attention.
    Critical,
}

/// A discrete event raised by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Optional, possibly hierarchical, topic (e.g. `plant/area1/alarms`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Event timestamp.
    pub utc_event_time: DateTime<Utc>,
    /// Optional category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Event text.
    pub message: String,
    /// Priority.
    pub priority: EventPriority,
    /// Free-form properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl EventMessage {
    /// Create an event raised now with no topic.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            topic: None,
            utc_event_time: Utc::now(),
            category: None,
            message: message.into(),
            priority: EventPriority::default(),
            properties: BTreeMap::new(),
        }
    }

    /// Set the topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

impl PushItem for EventMessage {
    fn routing_key(&self) -> Option<&str> {
        self.topic.as_deref()
    }
}

// =============================================================================
// Tests
// =============================================================================
