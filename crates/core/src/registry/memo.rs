//! Per-step results that survive failed registration attempts.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::debug;

use super::error::RegistrationError;
use crate::submission::{Submission, SubmissionError, SubmissionStore};

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Step results of a plugin, stored in the submission's `plugin_payload`.
///
/// Each saved value is written to the store right away, so it is still there
/// when a later step of the same attempt fails and the plugin is retried.
pub struct ResultMemo {
    store: Option<Arc<dyn SubmissionStore>>,
    submission_id: String,
    values: Mutex<Map<String, Value>>,
}

impl ResultMemo {
    /// Memo backed by the store, seeded with the submission's current payload.
    pub fn new(store: Arc<dyn SubmissionStore>, submission: &Submission) -> Self {
        Self {
            store: Some(store),
            submission_id: submission.id.clone(),
            values: Mutex::new(submission.registration_result.plugin_payload.clone()),
        }
    }

    /// Memo that only lives as long as the value itself.
    pub fn detached(submission: &Submission) -> Self {
        Self {
            store: None,
            submission_id: submission.id.clone(),
            values: Mutex::new(submission.registration_result.plugin_payload.clone()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().unwrap().get(key).cloned()
    }

    /// Store `value` under `key`, persisting it first when backed by a store.
    pub fn save(&self, key: &str, value: Value) -> Result<(), SubmissionError> {
        if let Some(ref store) = self.store {
            store.save_result_value(&self.submission_id, key, value.clone())?;
        }
        self.values.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}

/// Run a plugin sub-step unless an earlier attempt already stored its result.
///
/// The result is looked up and saved under `key`. A retried plugin skips
/// side effects that already happened, even when the attempt that ran them
/// failed later on.
pub async fn execute_unless_result_exists<F, Fut>(
    memo: &ResultMemo,
    key: &str,
    step: F,
) -> Result<Value, RegistrationError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, RegistrationError>>,
{
    if let Some(existing) = memo.get(key).filter(is_set) {
        debug!(submission_id = %memo.submission_id, key, "Reusing stored step result");
        return Ok(existing);
    }

    let value = step().await?;
    memo.save(key, value.clone()).map_err(|e| {
        RegistrationError::Unexpected(format!("could not store result of '{}': {}", key, e))
    })?;
    Ok(value)
}
