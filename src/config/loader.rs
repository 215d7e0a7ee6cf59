use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ThroughputLimiterConfig;

/// Load a throughput limiter configuration from a file using the config
/// crate. Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_limiter_config(config_path: &str) -> Result<ThroughputLimiterConfig> {
    load_limiter_config_sync(config_path)
}

/// Load a throughput limiter configuration synchronously
pub fn load_limiter_config_sync(config_path: &str) -> Result<ThroughputLimiterConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let limiter_config: ThroughputLimiterConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(limiter_config)
}
