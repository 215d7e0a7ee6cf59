pub mod loader;
pub mod models;
pub mod validation;

pub use models::{PluginCommonConfig, ThroughputLimiterConfig};
pub use validation::{PluginConfigValidator, ValidationError, ValidationResult};
