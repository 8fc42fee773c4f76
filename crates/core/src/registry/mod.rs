//! Registration plugin registry.
//!
//! Plugins implement [`RegistrationPlugin`] and are collected once at startup
//! into an immutable [`PluginRegistry`]. Whether a plugin is enabled comes
//! from configuration, not from the plugin itself.
//!
//! # Example
//!
//! ```ignore
//! use registrar_core::registry::PluginRegistry;
//!
//! let registry = PluginRegistry::builder()
//!     .with_demo_plugins()?
//!     .build(&config.plugins);
//!
//! let plugin = registry.get("demo").expect("registered");
//! ```

mod demo;
mod error;
mod memo;
mod plugin;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::PluginSettings;

pub use demo::{DemoOptions, DemoRegistration, ExceptionDemoRegistration, FailingDemoRegistration};
pub use error::{ConfigCheckError, OptionsError, RegistrationError, RegistryError};
pub use memo::{execute_unless_result_exists, ResultMemo};
pub use plugin::RegistrationPlugin;
pub use types::{parse_options, RegistrationResult};

struct PluginEntry {
    plugin: Arc<dyn RegistrationPlugin>,
    enabled: bool,
}

/// Immutable map from identifier to plugin.
pub struct PluginRegistry {
    plugins: BTreeMap<String, PluginEntry>,
}

/// Collects plugins before the registry is frozen.
#[derive(Default)]
pub struct PluginRegistryBuilder {
    plugins: BTreeMap<String, Arc<dyn RegistrationPlugin>>,
}

impl PluginRegistryBuilder {
    /// Add a plugin. Identifiers must be unique.
    pub fn register(mut self, plugin: Arc<dyn RegistrationPlugin>) -> Result<Self, RegistryError> {
        let identifier = plugin.identifier().to_string();
        if self.plugins.contains_key(&identifier) {
            return Err(RegistryError::Duplicate(identifier));
        }
        self.plugins.insert(identifier, plugin);
        Ok(self)
    }

    /// Add the built-in demo plugins.
    pub fn with_demo_plugins(self) -> Result<Self, RegistryError> {
        self.register(Arc::new(DemoRegistration))?
            .register(Arc::new(FailingDemoRegistration))?
            .register(Arc::new(ExceptionDemoRegistration))
    }

    /// Freeze the registry. Plugins without settings are enabled.
    pub fn build(self, settings: &BTreeMap<String, PluginSettings>) -> PluginRegistry {
        for identifier in settings.keys() {
            if !self.plugins.contains_key(identifier) {
                warn!(plugin = %identifier, "Settings given for unknown registration plugin");
            }
        }

        let plugins = self
            .plugins
            .into_iter()
            .map(|(identifier, plugin)| {
                let enabled = settings
                    .get(&identifier)
                    .map(|s| s.enabled)
                    .unwrap_or(true);
                (identifier, PluginEntry { plugin, enabled })
            })
            .collect();

        PluginRegistry { plugins }
    }
}

/// Operator view of one plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginCheck {
    pub identifier: String,
    pub verbose_name: String,
    pub enabled: bool,
    /// Set when `check_config` failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::default()
    }

    /// Look up a plugin by identifier, enabled or not.
    pub fn get(&self, identifier: &str) -> Option<Arc<dyn RegistrationPlugin>> {
        self.plugins
            .get(identifier)
            .map(|entry| Arc::clone(&entry.plugin))
    }

    /// Look up a plugin, failing for unknown identifiers.
    pub fn resolve(&self, identifier: &str) -> Result<Arc<dyn RegistrationPlugin>, RegistryError> {
        self.get(identifier)
            .ok_or_else(|| RegistryError::UnknownPlugin(identifier.to_string()))
    }

    /// Unknown plugins count as disabled.
    pub fn is_enabled(&self, identifier: &str) -> bool {
        self.plugins
            .get(identifier)
            .map(|entry| entry.enabled)
            .unwrap_or(false)
    }

    /// Identifiers in sorted order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every plugin's configuration check.
    pub async fn check_plugins(&self) -> Vec<PluginCheck> {
        let mut report = Vec::with_capacity(self.plugins.len());
        for (identifier, entry) in &self.plugins {
            let error = match entry.plugin.check_config().await {
                Ok(()) => None,
                Err(e) => {
                    warn!(plugin = %identifier, error = %e, "Plugin configuration check failed");
                    Some(e.to_string())
                }
            };
            report.push(PluginCheck {
                identifier: identifier.clone(),
                verbose_name: entry.plugin.verbose_name().to_string(),
                enabled: entry.enabled,
                error,
            });
        }
        report
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.plugins.iter().map(|(id, entry)| (id, entry.enabled)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRegistrationPlugin;

    fn settings(disabled: &[&str]) -> BTreeMap<String, PluginSettings> {
        disabled
            .iter()
            .map(|id| (id.to_string(), PluginSettings { enabled: false }))
            .collect()
    }

    #[test]
    fn test_build_with_demo_plugins() {
        let registry = PluginRegistry::builder()
            .with_demo_plugins()
            .unwrap()
            .build(&BTreeMap::new());

        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.identifiers().collect::<Vec<_>>(),
            vec!["demo", "exception-demo", "failing-demo"]
        );
        assert!(registry.is_enabled("demo"));
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let result = PluginRegistry::builder()
            .register(Arc::new(DemoRegistration))
            .unwrap()
            .register(Arc::new(MockRegistrationPlugin::new("demo")));

        assert!(matches!(result, Err(RegistryError::Duplicate(id)) if id == "demo"));
    }

    #[test]
    fn test_settings_disable_plugins() {
        let registry = PluginRegistry::builder()
            .with_demo_plugins()
            .unwrap()
            .build(&settings(&["failing-demo", "not-registered"]));

        assert!(!registry.is_enabled("failing-demo"));
        assert!(registry.is_enabled("demo"));
        assert!(!registry.is_enabled("not-registered"));
        assert!(registry.get("failing-demo").is_some());
    }

    #[test]
    fn test_resolve_unknown_plugin() {
        let registry = PluginRegistry::builder().build(&BTreeMap::new());
        assert!(registry.is_empty());
        assert!(matches!(
            registry.resolve("email"),
            Err(RegistryError::UnknownPlugin(_))
        ));
    }

    #[tokio::test]
    async fn test_check_plugins_reports_failures() {
        let broken = MockRegistrationPlugin::new("broken");
        broken.set_check_error("API root unreachable").await;

        let registry = PluginRegistry::builder()
            .register(Arc::new(broken))
            .unwrap()
            .register(Arc::new(DemoRegistration))
            .unwrap()
            .build(&settings(&["demo"]));

        let report = registry.check_plugins().await;
        assert_eq!(report.len(), 2);

        let broken = report.iter().find(|c| c.identifier == "broken").unwrap();
        assert_eq!(broken.error.as_deref(), Some("API root unreachable"));
        assert!(broken.enabled);

        let demo = report.iter().find(|c| c.identifier == "demo").unwrap();
        assert!(demo.error.is_none());
        assert!(!demo.enabled);
    }
}
