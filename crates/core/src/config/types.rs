use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::scheduler::SchedulerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Per-plugin settings keyed by plugin identifier.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginSettings>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("registrar.db")
}

/// Global registration settings.
///
/// Passed explicitly into the gating evaluator and the executor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegistrationConfig {
    /// Attempts after which automatic registration stops.
    #[serde(default = "default_attempt_limit")]
    pub attempt_limit: u32,

    /// Hold registration until a required payment has been received.
    #[serde(default)]
    pub wait_for_payment_to_register: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            attempt_limit: default_attempt_limit(),
            wait_for_payment_to_register: false,
        }
    }
}

fn default_attempt_limit() -> u32 {
    5
}

/// Administrative settings for a single registration plugin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PluginSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Config as returned over the API.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub registration: RegistrationConfig,
    pub scheduler: SchedulerConfig,
    pub disabled_plugins: Vec<String>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            registration: config.registration.clone(),
            scheduler: config.scheduler.clone(),
            disabled_plugins: config
                .plugins
                .iter()
                .filter(|(_, settings)| !settings.enabled)
                .map(|(id, _)| id.clone())
                .collect(),
        }
    }
}
