//! Values exchanged between the orchestrator and plugins.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::OptionsError;

/// What a plugin hands back after (pre-)registering a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    /// Reference assigned by the backend, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Data merged into the submission's registration result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl RegistrationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    /// Insert a single key into `data`.
    pub fn with_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}

/// Validate raw options by deserializing them into `T`.
///
/// Missing options (`null`) are read as an empty object so that `T`'s
/// defaults apply. The normalized options are returned as JSON.
pub fn parse_options<T>(options: &Value) -> Result<Value, OptionsError>
where
    T: DeserializeOwned + Serialize,
{
    let raw = match options {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };

    let parsed: T = serde_json::from_value(raw).map_err(|e| options_error(&e))?;
    serde_json::to_value(parsed).map_err(|e| OptionsError::field("options", e.to_string()))
}

fn options_error(error: &serde_json::Error) -> OptionsError {
    let message = error.to_string();
    // serde reports "unknown field `x`, expected ..." and "missing field `x`".
    let field = message
        .split('`')
        .nth(1)
        .filter(|_| message.contains("field `"))
        .unwrap_or("options");
    OptionsError::field(field, message.clone())
}
