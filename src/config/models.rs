//! Configuration data structures for Synapse plugins.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files.
//! They are intentionally serde-friendly and include defaults so that
//! minimal configs remain concise. Validation lives in
//! [`crate::config::validation`]; deserializing a config does not validate
//! it.

use serde::{Deserialize, Serialize};

/// Default queuing timeout for the throughput limiter, in milliseconds.
fn default_timeout_msec() -> i64 {
    200
}

/// Fields shared by every plugin configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PluginCommonConfig {
    /// Configured plugin name; stable across reconstructions of the plugin.
    pub plugin_name: String,
}

/// Configuration for the throughput rate limiter plugin.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ThroughputLimiterConfig {
    #[serde(flatten)]
    pub common: PluginCommonConfig,

    /// Allowed request rate in requests per second. `0` rejects every
    /// request, `-1` disables limiting entirely.
    pub tps: f64,

    /// How long a request may queue for a slot, in milliseconds. `0` means
    /// no queuing (reject immediately on exhaustion), `-1` means wait
    /// forever.
    #[serde(default = "default_timeout_msec")]
    pub timeout_msec: i64,

    /// When set, the flow-controlled percentage observed by this plugin
    /// instance is attached to the task under this key after admission.
    #[serde(default)]
    pub flow_control_percentage_key: Option<String>,
}

impl Default for ThroughputLimiterConfig {
    fn default() -> Self {
        Self {
            common: PluginCommonConfig::default(),
            tps: 0.0,
            timeout_msec: default_timeout_msec(),
            flow_control_percentage_key: None,
        }
    }
}
