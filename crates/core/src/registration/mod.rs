//! Pre-registration and registration of completed submissions.
//!
//! The [`Registrar`] owns the per-submission state machine. It never runs
//! work in the background itself; the scheduler decides when to call it.

mod executor;
mod pre_registration;
mod types;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::warn;

use crate::audit::{AuditEvent, AuditHandle};
use crate::config::RegistrationConfig;
use crate::registry::{PluginRegistry, RegistrationError, RegistrationPlugin, RegistrationResult};
use crate::submission::{RegistrationBackendConfig, Submission, SubmissionError, SubmissionStore};

pub use types::{
    AttemptFailure, AttemptFailureKind, AttemptOutcome, PostSubmissionEvent,
    PreRegistrationOutcome, RegistrarError, RetryPolicy,
};

/// Payload key under which a backend reference is kept when it differs from
/// the submission's public reference.
pub const BACKEND_REFERENCE_KEY: &str = "backend_reference";

/// Runs pre-registration and registration for single submissions.
pub struct Registrar {
    store: Arc<dyn SubmissionStore>,
    registry: Arc<PluginRegistry>,
    config: RegistrationConfig,
    audit: Option<AuditHandle>,
}

impl Registrar {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        registry: Arc<PluginRegistry>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            audit: None,
        }
    }

    /// Emit audit events for every attempt.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn store(&self) -> &Arc<dyn SubmissionStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Pre-register if needed, then register.
    ///
    /// A pre-registration that did not finish leaves registration gated, so
    /// the returned outcome is the registration skip in that case. Under
    /// [`RetryPolicy::Surface`] a pre-registration failure is returned as
    /// an error before registration is tried.
    pub async fn process_submission(
        &self,
        submission_id: &str,
        event: PostSubmissionEvent,
        policy: RetryPolicy,
    ) -> Result<AttemptOutcome, RegistrarError> {
        let pre_registration = self.pre_register(submission_id, event, policy).await?;
        tracing::debug!(
            submission_id,
            ready = pre_registration.is_ready(),
            "Pre-registration step finished"
        );
        self.register(submission_id, event, policy).await
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }

    fn load(&self, submission_id: &str) -> Result<Submission, RegistrarError> {
        self.store
            .get(submission_id)?
            .ok_or_else(|| SubmissionError::NotFound(submission_id.to_string()).into())
    }

    /// Resolve the backend's plugin and validate its options.
    fn prepare(
        &self,
        backend: &RegistrationBackendConfig,
    ) -> Result<(Arc<dyn RegistrationPlugin>, Value), AttemptFailure> {
        let plugin = self
            .registry
            .resolve(&backend.backend)
            .map_err(|e| AttemptFailure::new(AttemptFailureKind::UnknownPlugin, e.to_string()))?;

        if !self.registry.is_enabled(&backend.backend) {
            return Err(AttemptFailure::new(
                AttemptFailureKind::PluginDisabled,
                format!("Registration plugin '{}' is not enabled", backend.backend),
            ));
        }

        let validated = std::panic::catch_unwind(AssertUnwindSafe(|| {
            plugin.configuration_options(&backend.options)
        }));
        match validated {
            Ok(Ok(options)) => Ok((plugin, options)),
            Ok(Err(e)) => Err(AttemptFailure::new(
                AttemptFailureKind::InvalidOptions,
                e.to_string(),
            )),
            Err(panic) => Err(AttemptFailure::new(
                AttemptFailureKind::Unexpected,
                panic_message(panic.as_ref()),
            )),
        }
    }
}

/// Await a plugin call, turning a panic into an unexpected error.
async fn guarded<T, F>(call: F) -> Result<T, RegistrationError>
where
    F: Future<Output = Result<T, RegistrationError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(RegistrationError::Unexpected(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("plugin panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("plugin panicked: {}", message)
    } else {
        "plugin panicked".to_string()
    }
}

/// Turn a plugin result into the payload to merge.
///
/// The public reference never changes once assigned. A different reference
/// from the backend is kept in the payload instead.
fn merge_payload(
    submission: &Submission,
    plugin: &str,
    result: RegistrationResult,
) -> Option<Map<String, Value>> {
    let RegistrationResult { reference, data } = result;
    let mut payload = data;

    if let (Some(existing), Some(reference)) =
        (submission.public_registration_reference.as_deref(), reference)
    {
        if existing != reference {
            warn!(
                submission_id = %submission.id,
                plugin,
                existing,
                backend_reference = %reference,
                "Backend returned a different reference, keeping the existing one"
            );
            payload
                .get_or_insert_with(Map::new)
                .insert(BACKEND_REFERENCE_KEY.to_string(), Value::String(reference));
        }
    }

    payload
}
