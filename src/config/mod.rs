//! Configuration management
//!
//! Layered configuration loaded from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the
//! pattern `MEDIABOX__<section>__<key>`:
//! - `MEDIABOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `MEDIABOX__STORAGE__ROOT=/srv/media`
//! - `MEDIABOX__CONCURRENCY__DOWNLOADS=5`
//!
//! # Configuration File
//!
//! By default the configuration is loaded from `config/mediabox.toml`;
//! override the location with the `MEDIABOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    ConcurrencyConfig, Config, ExtractorConfig, ProgressConfig, ReclaimConfig, RetryConfig,
    ServerConfig, StorageConfig, TranscodeConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = sources::load()?;
        validation::validate(&mut config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let mut config = sources::load_from_sources(path)?;
        validation::validate(&mut config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[storage]
root = "/srv/media"
min_free_space = "1GB"

[concurrency]
downloads = 4
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.storage.root.to_str().unwrap(), "/srv/media");
        assert_eq!(config.storage.min_free_space.as_u64(), 1024 * 1024 * 1024);
        assert_eq!(config.concurrency.downloads, 4);
        // Untouched sections fall back to defaults
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.reclaim.threshold_minutes, 30);
    }

    #[test]
    fn test_validation_clamps_limits() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[concurrency]
conversions = 12
channel_batch = 40
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.concurrency.conversions, 5);
        assert_eq!(config.concurrency.channel_batch, 10);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_from_path("does/not/exist.toml".into()).unwrap();
        assert_eq!(config.concurrency.downloads, 3);
        assert_eq!(config.storage.min_free_space.as_u64(), 500 * 1024 * 1024);
        assert_eq!(config.progress.min_interval_secs, 3);
        assert_eq!(config.progress.min_delta_pct, 5.0);
    }
}
