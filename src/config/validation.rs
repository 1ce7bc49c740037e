use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("storage.root must not be empty")]
    EmptyStorageRoot,

    #[error("concurrency.downloads must be at least 1, got {0}")]
    InvalidDownloadLimit(usize),

    #[error("retry.max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(u32),

    #[error("progress.min_delta_pct must be in (0, 100], got {0}")]
    InvalidProgressDelta(f32),

    #[error("transcode.{0} must not be empty")]
    EmptyBinary(&'static str),
}

/// Validate and normalize a loaded configuration.
///
/// Per-class concurrency limits that only make sense inside a range are
/// clamped rather than rejected: conversions to 1..=5, channel batch to
/// 1..=10. Hard errors are reserved for values with no sane interpretation.
pub fn validate(config: &mut Config) -> Result<(), ValidationError> {
    if config.storage.root.as_os_str().is_empty() {
        return Err(ValidationError::EmptyStorageRoot);
    }

    if config.concurrency.downloads == 0 {
        return Err(ValidationError::InvalidDownloadLimit(0));
    }

    config.concurrency.conversions = config.concurrency.conversions.clamp(1, 5);
    config.concurrency.channel_batch = config.concurrency.channel_batch.clamp(1, 10);

    if config.retry.max_attempts == 0 {
        return Err(ValidationError::InvalidMaxAttempts(0));
    }
    if config.retry.channel_attempts == 0 {
        return Err(ValidationError::InvalidMaxAttempts(0));
    }

    if !(0.0..=100.0).contains(&config.progress.min_delta_pct)
        || config.progress.min_delta_pct == 0.0
    {
        return Err(ValidationError::InvalidProgressDelta(
            config.progress.min_delta_pct,
        ));
    }

    if config.transcode.ffmpeg_bin.is_empty() {
        return Err(ValidationError::EmptyBinary("ffmpeg_bin"));
    }
    if config.transcode.ffprobe_bin.is_empty() {
        return Err(ValidationError::EmptyBinary("ffprobe_bin"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let mut config = Config::default();
        assert!(validate(&mut config).is_ok());
    }

    #[test]
    fn conversion_limit_is_clamped() {
        let mut config = Config::default();
        config.concurrency.conversions = 50;
        validate(&mut config).unwrap();
        assert_eq!(config.concurrency.conversions, 5);

        config.concurrency.conversions = 0;
        validate(&mut config).unwrap();
        assert_eq!(config.concurrency.conversions, 1);
    }

    #[test]
    fn channel_batch_limit_is_clamped() {
        let mut config = Config::default();
        config.concurrency.channel_batch = 99;
        validate(&mut config).unwrap();
        assert_eq!(config.concurrency.channel_batch, 10);

        config.concurrency.channel_batch = 0;
        validate(&mut config).unwrap();
        assert_eq!(config.concurrency.channel_batch, 1);
    }

    #[test]
    fn zero_downloads_rejected() {
        let mut config = Config::default();
        config.concurrency.downloads = 0;
        assert!(matches!(
            validate(&mut config),
            Err(ValidationError::InvalidDownloadLimit(0))
        ));
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(validate(&mut config).is_err());
    }
}
