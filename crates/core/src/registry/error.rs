//! Error types for registration plugins and the plugin registry.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Typed failure signalled by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The remote system rejected or failed to process the submission.
    #[error("Registration failed: {0}")]
    Failed(String),

    /// Anything the plugin did not anticipate.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Plugin options failed validation.
///
/// Carries one message per offending field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionsError {
    pub fields: BTreeMap<String, String>,
}

impl OptionsError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Error for a single field.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new().with_field(field, message)
    }

    pub fn with_field(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.fields.insert(field.into(), message.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid plugin options")?;
        for (i, (field, message)) in self.fields.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{field}: {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for OptionsError {}

/// Returned by a plugin's configuration self-check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ConfigCheckError(pub String);

/// Errors from building or querying the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Plugin already registered: {0}")]
    Duplicate(String),

    #[error("Unknown registration plugin: {0}")]
    UnknownPlugin(String),
}
