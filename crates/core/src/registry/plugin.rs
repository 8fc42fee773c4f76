//! The registration plugin contract.

use async_trait::async_trait;
use serde_json::Value;

use super::error::{ConfigCheckError, OptionsError, RegistrationError};
use super::memo::ResultMemo;
use super::types::RegistrationResult;
use crate::submission::Submission;

/// A backend that completed submissions are delivered to.
///
/// The orchestrator only calls the `*_submission` and payment hooks with
/// options that went through [`configuration_options`](Self::configuration_options)
/// first.
#[async_trait]
pub trait RegistrationPlugin: Send + Sync {
    /// Unique identifier used in a submission's backend config.
    fn identifier(&self) -> &str;

    /// Human readable name for the operator overview.
    fn verbose_name(&self) -> &str;

    /// Validate raw options and return them normalized.
    fn configuration_options(&self, options: &Value) -> Result<Value, OptionsError>;

    /// Deliver the submission to the backend.
    ///
    /// Plugins that talk to a backend in several steps keep each step's
    /// result in `memo` (see [`execute_unless_result_exists`]), so a retry
    /// does not repeat steps that already succeeded.
    ///
    /// [`execute_unless_result_exists`]: super::execute_unless_result_exists
    async fn register_submission(
        &self,
        submission: &Submission,
        options: &Value,
        memo: &ResultMemo,
    ) -> Result<RegistrationResult, RegistrationError>;

    /// Reserve a reference ahead of registration.
    async fn pre_register_submission(
        &self,
        _submission: &Submission,
        _options: &Value,
    ) -> Result<RegistrationResult, RegistrationError> {
        Ok(RegistrationResult::default())
    }

    /// Tell the backend the submission has been paid for.
    async fn update_payment_status(
        &self,
        _submission: &Submission,
        _options: &Value,
    ) -> Result<(), RegistrationError> {
        Ok(())
    }

    /// Check that the plugin's own service configuration is usable.
    async fn check_config(&self) -> Result<(), ConfigCheckError> {
        Ok(())
    }
}
