//! Configuration Module
//!
//! Configuration loading for the push hub.

mod settings;

pub use settings::{
    ConfigError, HubConfig, OverflowPolicy, PushSettings, ServerSettings, SimulationSettings,
};
