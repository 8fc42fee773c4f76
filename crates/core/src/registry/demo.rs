//! Demo plugins for trying out the registration flow without a backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::error::{OptionsError, RegistrationError};
use super::memo::ResultMemo;
use super::plugin::RegistrationPlugin;
use super::types::{parse_options, RegistrationResult};
use crate::submission::Submission;

/// Options shared by all demo plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemoOptions {
    /// Log an extra line when registering.
    #[serde(default)]
    pub extra_line: bool,
}

/// Always succeeds and echoes its options back.
#[derive(Debug, Default)]
pub struct DemoRegistration;

#[async_trait]
impl RegistrationPlugin for DemoRegistration {
    fn identifier(&self) -> &str {
        "demo"
    }

    fn verbose_name(&self) -> &str {
        "Demo - log to console"
    }

    fn configuration_options(&self, options: &Value) -> Result<Value, OptionsError> {
        parse_options::<DemoOptions>(options)
    }

    async fn register_submission(
        &self,
        submission: &Submission,
        options: &Value,
        _memo: &ResultMemo,
    ) -> Result<RegistrationResult, RegistrationError> {
        info!(
            submission_id = %submission.id,
            form = %submission.form_name,
            reference = ?submission.public_registration_reference,
            "Demo registration"
        );
        if options["extra_line"].as_bool().unwrap_or(false) {
            info!(submission_id = %submission.id, "Demo registration extra line");
        }

        Ok(RegistrationResult::new().with_entry("demo", json!({ "options": options })))
    }
}

/// Always fails with a typed registration failure.
#[derive(Debug, Default)]
pub struct FailingDemoRegistration;

#[async_trait]
impl RegistrationPlugin for FailingDemoRegistration {
    fn identifier(&self) -> &str {
        "failing-demo"
    }

    fn verbose_name(&self) -> &str {
        "Demo - fail registration"
    }

    fn configuration_options(&self, options: &Value) -> Result<Value, OptionsError> {
        parse_options::<DemoOptions>(options)
    }

    async fn register_submission(
        &self,
        _submission: &Submission,
        _options: &Value,
        _memo: &ResultMemo,
    ) -> Result<RegistrationResult, RegistrationError> {
        Err(RegistrationError::Failed("Demo failing registration".to_string()))
    }
}

/// Always fails with an unexpected error.
#[derive(Debug, Default)]
pub struct ExceptionDemoRegistration;

#[async_trait]
impl RegistrationPlugin for ExceptionDemoRegistration {
    fn identifier(&self) -> &str {
        "exception-demo"
    }

    fn verbose_name(&self) -> &str {
        "Demo - raise an unexpected error"
    }

    fn configuration_options(&self, options: &Value) -> Result<Value, OptionsError> {
        parse_options::<DemoOptions>(options)
    }

    async fn register_submission(
        &self,
        _submission: &Submission,
        _options: &Value,
        _memo: &ResultMemo,
    ) -> Result<RegistrationResult, RegistrationError> {
        Err(RegistrationError::Unexpected(
            "Demo exception registration".to_string(),
        ))
    }
}
