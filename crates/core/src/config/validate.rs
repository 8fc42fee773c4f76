use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Registration attempt limit is at least 1
/// - Scheduler interval and concurrency are non-zero
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.registration.attempt_limit == 0 {
        return Err(ConfigError::ValidationError(
            "registration.attempt_limit must be at least 1".to_string(),
        ));
    }

    if config.scheduler.sweep_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.sweep_interval_ms cannot be 0".to_string(),
        ));
    }

    if config.scheduler.max_concurrent_jobs == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.max_concurrent_jobs cannot be 0".to_string(),
        ));
    }

    Ok(())
}
