//! Mock registration plugin for testing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::registry::{
    parse_options, ConfigCheckError, OptionsError, RegistrationError, RegistrationPlugin,
    RegistrationResult, ResultMemo,
};
use crate::submission::Submission;

/// Options accepted by the mock. Anything else is rejected.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A recorded plugin call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub submission_id: String,
    pub options: Value,
    pub timestamp: Instant,
}

enum Scripted {
    Return(Result<RegistrationResult, RegistrationError>),
    Panic(String),
}

impl Scripted {
    fn play(self) -> Result<RegistrationResult, RegistrationError> {
        match self {
            Scripted::Return(result) => result,
            Scripted::Panic(message) => panic!("{}", message),
        }
    }
}

/// Mock implementation of the RegistrationPlugin trait.
///
/// Provides controllable behavior for testing:
/// - Queue results, errors or panics for the next calls
/// - Track calls for assertions
/// - Simulate slow backends
///
/// Calls with nothing queued succeed with an empty result.
///
/// # Example
///
/// ```rust,ignore
/// use registrar_core::testing::MockRegistrationPlugin;
///
/// let plugin = Arc::new(MockRegistrationPlugin::new("zgw"));
/// plugin.set_next_error(RegistrationError::Failed("down".into())).await;
///
/// // First registration fails, the second succeeds.
/// assert_eq!(plugin.register_calls().await, 0);
/// ```
pub struct MockRegistrationPlugin {
    identifier: String,
    register_queue: Arc<RwLock<VecDeque<Scripted>>>,
    pre_register_queue: Arc<RwLock<VecDeque<Scripted>>>,
    registrations: Arc<RwLock<Vec<RecordedCall>>>,
    pre_registrations: Arc<RwLock<Vec<RecordedCall>>>,
    payment_updates: Arc<RwLock<Vec<String>>>,
    check_error: Arc<RwLock<Option<String>>>,
    delay: Arc<RwLock<Option<Duration>>>,
}

impl std::fmt::Debug for MockRegistrationPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRegistrationPlugin")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl MockRegistrationPlugin {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            register_queue: Arc::new(RwLock::new(VecDeque::new())),
            pre_register_queue: Arc::new(RwLock::new(VecDeque::new())),
            registrations: Arc::new(RwLock::new(Vec::new())),
            pre_registrations: Arc::new(RwLock::new(Vec::new())),
            payment_updates: Arc::new(RwLock::new(Vec::new())),
            check_error: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(None)),
        }
    }

    /// Queue the outcome of the next `register_submission` call.
    pub async fn set_next_result(&self, result: Result<RegistrationResult, RegistrationError>) {
        self.register_queue
            .write()
            .await
            .push_back(Scripted::Return(result));
    }

    /// Queue a failure for the next `register_submission` call.
    pub async fn set_next_error(&self, error: RegistrationError) {
        self.set_next_result(Err(error)).await;
    }

    /// Make the next `register_submission` call panic.
    pub async fn set_next_panic(&self, message: &str) {
        self.register_queue
            .write()
            .await
            .push_back(Scripted::Panic(message.to_string()));
    }

    /// Queue the result of the next `pre_register_submission` call.
    pub async fn set_next_pre_registration(&self, result: RegistrationResult) {
        self.pre_register_queue
            .write()
            .await
            .push_back(Scripted::Return(Ok(result)));
    }

    /// Make the next `pre_register_submission` call fail.
    pub async fn set_next_pre_registration_error(&self, message: &str) {
        self.pre_register_queue
            .write()
            .await
            .push_back(Scripted::Return(Err(RegistrationError::Failed(
                message.to_string(),
            ))));
    }

    /// Make `check_config` fail with this message.
    pub async fn set_check_error(&self, message: &str) {
        *self.check_error.write().await = Some(message.to_string());
    }

    /// Delay every register and pre-register call.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    pub async fn register_calls(&self) -> usize {
        self.registrations.read().await.len()
    }

    pub async fn pre_register_calls(&self) -> usize {
        self.pre_registrations.read().await.len()
    }

    pub async fn payment_updates(&self) -> usize {
        self.payment_updates.read().await.len()
    }

    /// All recorded `register_submission` calls, oldest first.
    pub async fn recorded_registrations(&self) -> Vec<RecordedCall> {
        self.registrations.read().await.clone()
    }

    async fn record(calls: &RwLock<Vec<RecordedCall>>, submission: &Submission, options: &Value) {
        calls.write().await.push(RecordedCall {
            submission_id: submission.id.clone(),
            options: options.clone(),
            timestamp: Instant::now(),
        });
    }

    async fn wait(&self) {
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RegistrationPlugin for MockRegistrationPlugin {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn verbose_name(&self) -> &str {
        "Mock registration"
    }

    fn configuration_options(&self, options: &Value) -> Result<Value, OptionsError> {
        parse_options::<MockOptions>(options)
    }

    async fn register_submission(
        &self,
        submission: &Submission,
        options: &Value,
        _memo: &ResultMemo,
    ) -> Result<RegistrationResult, RegistrationError> {
        Self::record(&self.registrations, submission, options).await;
        self.wait().await;

        let scripted = self.register_queue.write().await.pop_front();
        match scripted {
            Some(scripted) => scripted.play(),
            None => Ok(RegistrationResult::new()),
        }
    }

    async fn pre_register_submission(
        &self,
        submission: &Submission,
        options: &Value,
    ) -> Result<RegistrationResult, RegistrationError> {
        Self::record(&self.pre_registrations, submission, options).await;
        self.wait().await;

        let scripted = self.pre_register_queue.write().await.pop_front();
        match scripted {
            Some(scripted) => scripted.play(),
            None => Ok(RegistrationResult::new()),
        }
    }

    async fn update_payment_status(
        &self,
        submission: &Submission,
        _options: &Value,
    ) -> Result<(), RegistrationError> {
        self.payment_updates.write().await.push(submission.id.clone());
        Ok(())
    }

    async fn check_config(&self) -> Result<(), ConfigCheckError> {
        match self.check_error.read().await.clone() {
            Some(message) => Err(ConfigCheckError(message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use serde_json::json;

    #[tokio::test]
    async fn test_queued_results_are_played_in_order() {
        let plugin = MockRegistrationPlugin::new("mock");
        plugin
            .set_next_error(RegistrationError::Failed("first".to_string()))
            .await;
        plugin
            .set_next_result(Ok(RegistrationResult::new().with_reference("R-2")))
            .await;
        let submission = fixtures::pre_registered_submission("mock");
        let memo = ResultMemo::detached(&submission);

        assert!(plugin
            .register_submission(&submission, &json!({}), &memo)
            .await
            .is_err());
        let second = plugin
            .register_submission(&submission, &json!({}), &memo)
            .await
            .unwrap();
        assert_eq!(second.reference.as_deref(), Some("R-2"));
        let third = plugin
            .register_submission(&submission, &json!({}), &memo)
            .await
            .unwrap();
        assert_eq!(third, RegistrationResult::new());

        assert_eq!(plugin.register_calls().await, 3);
        let recorded = plugin.recorded_registrations().await;
        assert_eq!(recorded[0].submission_id, submission.id);
    }

    #[test]
    fn test_options_are_validated() {
        let plugin = MockRegistrationPlugin::new("mock");
        assert!(plugin.configuration_options(&json!({"label": "x"})).is_ok());
        assert!(plugin.configuration_options(&Value::Null).is_ok());
        assert!(plugin
            .configuration_options(&json!({"unknown": 1}))
            .is_err());
    }
}
