use eyre::Result;
use thiserror::Error;

use crate::{config::models::ThroughputLimiterConfig, core::pattern::validate_pattern};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid path pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Plugin configuration validator
pub struct PluginConfigValidator;

impl PluginConfigValidator {
    /// Validate a throughput limiter configuration.
    ///
    /// Configuration errors surface here, to the configurator; they never
    /// reach the request path.
    pub fn validate_throughput_limiter(config: &ThroughputLimiterConfig) -> ValidationResult<()> {
        if config.common.plugin_name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "plugin_name".to_string(),
            });
        }

        if !config.tps.is_finite() || config.tps < -1.0 {
            return Err(ValidationError::InvalidField {
                field: "tps".to_string(),
                message: "invalid throughput rate limit".to_string(),
            });
        }

        if config.timeout_msec < -1 {
            return Err(ValidationError::InvalidField {
                field: "timeout_msec".to_string(),
                message: "invalid queuing timeout".to_string(),
            });
        }

        if config.timeout_msec == 0 {
            tracing::warn!(
                plugin = %config.common.plugin_name,
                "zero queuing timeout applied, no request can be queued by the limiter"
            );
        } else if config.timeout_msec == -1 {
            tracing::warn!(
                plugin = %config.common.plugin_name,
                "infinite queuing timeout applied, no request can be timed out from the queue"
            );
        }

        Ok(())
    }

    /// Validate a mux entry path pattern.
    pub fn validate_entry_pattern(pattern: &str) -> ValidationResult<()> {
        validate_pattern(pattern).map_err(|e| ValidationError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::PluginCommonConfig;

    fn limiter_config(tps: f64, timeout_msec: i64) -> ThroughputLimiterConfig {
        ThroughputLimiterConfig {
            common: PluginCommonConfig {
                plugin_name: "limiter".to_string(),
            },
            tps,
            timeout_msec,
            flow_control_percentage_key: None,
        }
    }

    #[test]
    fn accepts_boundary_values() {
        for (tps, timeout) in [(0.0, 0), (-1.0, -1), (100.5, 200), (0.5, 1)] {
            let config = limiter_config(tps, timeout);
            assert!(
                PluginConfigValidator::validate_throughput_limiter(&config).is_ok(),
                "tps {tps} timeout {timeout}"
            );
        }
    }

    #[test]
    fn rejects_invalid_tps() {
        for tps in [-2.0, f64::NAN, f64::INFINITY] {
            let config = limiter_config(tps, 200);
            assert!(
                matches!(
                    PluginConfigValidator::validate_throughput_limiter(&config),
                    Err(ValidationError::InvalidField { ref field, .. }) if field == "tps"
                ),
                "tps {tps}"
            );
        }
    }

    #[test]
    fn rejects_invalid_timeout() {
        let config = limiter_config(1.0, -2);
        assert!(matches!(
            PluginConfigValidator::validate_throughput_limiter(&config),
            Err(ValidationError::InvalidField { ref field, .. }) if field == "timeout_msec"
        ));
    }

    #[test]
    fn rejects_missing_plugin_name() {
        let config = ThroughputLimiterConfig {
            tps: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            PluginConfigValidator::validate_throughput_limiter(&config),
            Err(ValidationError::MissingField { .. })
        ));
    }

    #[test]
    fn rejects_malformed_pattern() {
        assert!(PluginConfigValidator::validate_entry_pattern("/r/{user}").is_ok());
        assert!(matches!(
            PluginConfigValidator::validate_entry_pattern("/r/{user"),
            Err(ValidationError::InvalidPattern { .. })
        ));
    }
}
