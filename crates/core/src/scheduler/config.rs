//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the registration scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enable/disable the periodic retry sweep.
    /// Triggered jobs and manual retries run either way.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often the sweep looks for submissions to retry (milliseconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Only submissions completed within this many hours are retried.
    #[serde(default = "default_sweep_window")]
    pub sweep_window_hours: u64,

    /// Maximum number of jobs talking to backends at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60_000 // 1 minute
}

fn default_sweep_window() -> u64 {
    48
}

fn default_max_concurrent_jobs() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            sweep_interval_ms: default_sweep_interval(),
            sweep_window_hours: default_sweep_window(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.sweep_interval_ms, 60_000);
        assert_eq!(config.sweep_window_hours, 48);
        assert_eq!(config.max_concurrent_jobs, 4);
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: SchedulerConfig = toml::from_str("enabled = false").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.sweep_interval_ms, 60_000);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            enabled = true
            sweep_interval_ms = 5000
            sweep_window_hours = 24
            max_concurrent_jobs = 8
        "#;
        let config: SchedulerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.sweep_interval_ms, 5000);
        assert_eq!(config.sweep_window_hours, 24);
        assert_eq!(config.max_concurrent_jobs, 8);
    }
}
