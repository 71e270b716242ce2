//! Push Hub Configuration Settings
//!
//! Configuration types for the push hub, loaded from environment variables.

use std::time::Duration;

use crate::application::services::{PushOptions, QueuePolicy, SnapshotTagValuePushOptions};

/// What a bounded subscriber queue discards when full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the oldest queued item.
    #[default]
    DropOldest,
    /// Discard the incoming item.
    DropNewest,
}

impl OverflowPolicy {
    /// Parse a policy name (`drop-oldest` or `drop-newest`, case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for any other name.
    pub fn parse(key: &str, value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "drop-oldest" | "drop_oldest" => Ok(Self::DropOldest),
            "drop-newest" | "drop_newest" => Ok(Self::DropNewest),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Policy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DropOldest => "drop-oldest",
            Self::DropNewest => "drop-newest",
        }
    }
}

/// Push engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSettings {
    /// Concurrent tag value subscriptions (0 = unbounded).
    pub max_tag_value_subscriptions: usize,
    /// Concurrent event subscriptions (0 = unbounded).
    pub max_event_subscriptions: usize,
    /// Concurrent topic event subscriptions (0 = unbounded).
    pub max_topic_subscriptions: usize,
    /// Per-subscription queue capacity (0 = unbounded).
    pub queue_capacity: usize,
    /// Overflow policy for bounded queues.
    pub overflow: OverflowPolicy,
    /// Queue cached tag values to new subscribers.
    pub emit_current_value_on_subscribe: bool,
    /// Match topics hierarchically (`a` receives `a/b`) instead of exactly.
    pub topic_hierarchy: bool,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            max_tag_value_subscriptions: 0,
            max_event_subscriptions: 0,
            max_topic_subscriptions: 0,
            queue_capacity: 0,
            overflow: OverflowPolicy::default(),
            emit_current_value_on_subscribe: true,
            topic_hierarchy: true,
        }
    }
}

impl PushSettings {
    /// Queue policy implied by capacity and overflow settings.
    #[must_use]
    pub const fn queue_policy(&self) -> QueuePolicy {
        match (self.queue_capacity, self.overflow) {
            (0, _) => QueuePolicy::Unbounded,
            (n, OverflowPolicy::DropOldest) => QueuePolicy::DropOldest(n),
            (n, OverflowPolicy::DropNewest) => QueuePolicy::DropNewest(n),
        }
    }

    /// Options for the tag value push.
    #[must_use]
    pub const fn tag_value_options(&self) -> SnapshotTagValuePushOptions {
        SnapshotTagValuePushOptions {
            push: self.options(self.max_tag_value_subscriptions),
            emit_current_value_on_subscribe: self.emit_current_value_on_subscribe,
        }
    }

    /// Options for the receive-all event push.
    #[must_use]
    pub const fn event_options(&self) -> PushOptions {
        self.options(self.max_event_subscriptions)
    }

    /// Options for the topic event push.
    #[must_use]
    pub const fn topic_options(&self) -> PushOptions {
        self.options(self.max_topic_subscriptions)
    }

    const fn options(&self, limit: usize) -> PushOptions {
        PushOptions {
            max_concurrent_subscriptions: Some(limit),
            queue_policy: self.queue_policy(),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Simulated data source settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationSettings {
    /// Interval between generated samples.
    pub interval: Duration,
    /// Tags to generate values for.
    pub tags: Vec<String>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            tags: vec![
                "Sinusoid1".to_string(),
                "Sinusoid2".to_string(),
                "Ramp1".to_string(),
            ],
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubConfig {
    /// Push engine settings.
    pub push: PushSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Simulated source settings.
    pub simulation: SimulationSettings,
}

impl HubConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PUSH_QUEUE_OVERFLOW` names an unknown policy.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unset or unparsable numbers fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `PUSH_QUEUE_OVERFLOW` names an unknown policy.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let overflow = match lookup("PUSH_QUEUE_OVERFLOW") {
            Some(value) if !value.trim().is_empty() => {
                OverflowPolicy::parse("PUSH_QUEUE_OVERFLOW", &value)?
            }
            _ => defaults.push.overflow,
        };

        let push = PushSettings {
            max_tag_value_subscriptions: parse_env_usize(
                &lookup,
                "PUSH_MAX_TAG_VALUE_SUBSCRIPTIONS",
                defaults.push.max_tag_value_subscriptions,
            ),
            max_event_subscriptions: parse_env_usize(
                &lookup,
                "PUSH_MAX_EVENT_SUBSCRIPTIONS",
                defaults.push.max_event_subscriptions,
            ),
            max_topic_subscriptions: parse_env_usize(
                &lookup,
                "PUSH_MAX_TOPIC_SUBSCRIPTIONS",
                defaults.push.max_topic_subscriptions,
            ),
            queue_capacity: parse_env_usize(
                &lookup,
                "PUSH_QUEUE_CAPACITY",
                defaults.push.queue_capacity,
            ),
            overflow,
            emit_current_value_on_subscribe: parse_env_bool(
                &lookup,
                "PUSH_EMIT_CURRENT_VALUE",
                defaults.push.emit_current_value_on_subscribe,
            ),
            topic_hierarchy: parse_env_bool(
                &lookup,
                "PUSH_TOPIC_HIERARCHY",
                defaults.push.topic_hierarchy,
            ),
        };

        let server = ServerSettings {
            health_port: parse_env_u16(&lookup, "PUSH_HEALTH_PORT", defaults.server.health_port),
        };

        let simulation = SimulationSettings {
            interval: parse_env_duration_millis(
                &lookup,
                "PUSH_SIM_INTERVAL_MS",
                defaults.simulation.interval,
            ),
            tags: parse_env_list(&lookup, "PUSH_SIM_TAGS").unwrap_or(defaults.simulation.tags),
        };

        Ok(Self {
            push,
            server,
            simulation,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable holds a value that cannot be used.
    #[error("invalid value {value:?} for environment variable {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

fn parse_env_u16(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key)
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&ms| ms > 0)
        .map_or(default, Duration::from_millis)
}

fn parse_env_list(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Vec<String>> {
    let items: Vec<String> = lookup(key)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<HubConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        HubConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, HubConfig::default());
        assert_eq!(config.push.queue_policy(), QueuePolicy::Unbounded);
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.simulation.interval, Duration::from_millis(1000));
    }

    #[test]
    fn reads_push_settings() {
        let config = config_from(&[
            ("PUSH_MAX_TAG_VALUE_SUBSCRIPTIONS", "10"),
            ("PUSH_MAX_EVENT_SUBSCRIPTIONS", "5"),
            ("PUSH_QUEUE_CAPACITY", "100"),
            ("PUSH_QUEUE_OVERFLOW", "drop-newest"),
            ("PUSH_EMIT_CURRENT_VALUE", "false"),
        ])
        .unwrap();

        assert_eq!(config.push.max_tag_value_subscriptions, 10);
        assert_eq!(config.push.max_event_subscriptions, 5);
        assert_eq!(config.push.max_topic_subscriptions, 0);
        assert_eq!(config.push.queue_policy(), QueuePolicy::DropNewest(100));

        let tag_options = config.push.tag_value_options();
        assert_eq!(tag_options.push.subscription_limit(), Some(10));
        assert!(!tag_options.emit_current_value_on_subscribe);
        assert_eq!(config.push.topic_options().subscription_limit(), None);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("PUSH_QUEUE_CAPACITY", "lots"),
            ("PUSH_HEALTH_PORT", "99999"),
            ("PUSH_SIM_INTERVAL_MS", "0"),
        ])
        .unwrap();
        assert_eq!(config.push.queue_capacity, 0);
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.simulation.interval, Duration::from_millis(1000));
    }

    #[test]
    fn unknown_overflow_policy_is_an_error() {
        let err = config_from(&[("PUSH_QUEUE_OVERFLOW", "block")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "PUSH_QUEUE_OVERFLOW".to_string(),
                value: "block".to_string(),
            }
        );
    }

    #[test]
    fn simulation_tags_are_split_and_trimmed() {
        let config = config_from(&[("PUSH_SIM_TAGS", " A , B,,C ")]).unwrap();
        assert_eq!(config.simulation.tags, vec!["A", "B", "C"]);

        let config = config_from(&[("PUSH_SIM_TAGS", " , ")]).unwrap();
        assert_eq!(config.simulation.tags, SimulationSettings::default().tags);
    }

    #[test_case("drop-oldest", OverflowPolicy::DropOldest ; "kebab oldest")]
    #[test_case("DROP_NEWEST", OverflowPolicy::DropNewest ; "snake upper newest")]
    #[test_case(" drop-newest ", OverflowPolicy::DropNewest ; "padded")]
    fn overflow_policy_parsing(input: &str, expected: OverflowPolicy) {
        assert_eq!(OverflowPolicy::parse("K", input), Ok(expected));
    }

    #[test]
    fn overflow_policy_names() {
        assert_eq!(OverflowPolicy::DropOldest.as_str(), "drop-oldest");
        assert_eq!(OverflowPolicy::DropNewest.as_str(), "drop-newest");
    }
}
