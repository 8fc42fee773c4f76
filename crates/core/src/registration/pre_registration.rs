use tracing::{debug, error, info, warn};

use super::{
    guarded, merge_payload, AttemptFailure, AttemptFailureKind, PostSubmissionEvent,
    PreRegistrationOutcome, RegistrarError, Registrar, RetryPolicy,
};
use crate::audit::AuditEvent;
use crate::gating::{evaluate_pre_registration, PreRegistrationVerdict};
use crate::metrics;
use crate::submission::{unique_reference, PreRegistrationUpdate, Submission, SubmissionError};

impl Registrar {
    /// Assign the public reference of a completed submission, asking the
    /// backend for one when a plugin is configured.
    ///
    /// A submission always leaves this step with a reference. When the
    /// plugin fails, a generated fallback is stored together with the
    /// failure and the step runs again on the next trigger.
    pub async fn pre_register(
        &self,
        submission_id: &str,
        event: PostSubmissionEvent,
        policy: RetryPolicy,
    ) -> Result<PreRegistrationOutcome, RegistrarError> {
        let mut submission = self.load(submission_id)?;

        match evaluate_pre_registration(&submission, self.config()) {
            PreRegistrationVerdict::Proceed => {}
            PreRegistrationVerdict::AttemptLimitExceeded if policy == RetryPolicy::Surface => {
                info!(
                    submission_id,
                    attempts = submission.registration_attempts,
                    "Manual retry past the attempt limit"
                );
            }
            PreRegistrationVerdict::NotComplete => {
                warn!(submission_id, "Cannot pre-register a submission that is not completed");
                return Ok(PreRegistrationOutcome::Skipped {
                    verdict: PreRegistrationVerdict::NotComplete,
                });
            }
            verdict => {
                debug!(submission_id, verdict = verdict.as_str(), "Pre-registration skipped");
                return Ok(PreRegistrationOutcome::Skipped { verdict });
            }
        }

        let Some(backend) = submission.configured_backend().cloned() else {
            let update = PreRegistrationUpdate {
                fallback_reference: Some(unique_reference(self.store().as_ref())?),
                ..Default::default()
            };
            return self.commit_pre_registration(&submission, None, update).await;
        };

        let (plugin, options) = match self.prepare(&backend) {
            Ok(prepared) => prepared,
            Err(failure) => {
                return self
                    .fail_pre_registration(&submission, &backend.backend, failure, policy)
                    .await;
            }
        };

        if event == PostSubmissionEvent::OnRetry && submission.public_registration_reference.is_some()
        {
            submission = self.store().remember_temporary_reference(submission_id)?;
        }

        debug!(submission_id, plugin = %backend.backend, "Pre-registering submission");
        let result = match guarded(plugin.pre_register_submission(&submission, &options)).await {
            Ok(result) => result,
            Err(e) => {
                return self
                    .fail_pre_registration(&submission, &backend.backend, e.into(), policy)
                    .await;
            }
        };

        let plugin_reference = result
            .reference
            .clone()
            .filter(|r| !r.trim().is_empty());
        let fallback_reference = if submission.public_registration_reference.is_none()
            && plugin_reference.is_none()
        {
            Some(unique_reference(self.store().as_ref())?)
        } else {
            None
        };
        let update = PreRegistrationUpdate {
            plugin_reference,
            fallback_reference,
            payload: merge_payload(&submission, &backend.backend, result),
        };

        self.commit_pre_registration(&submission, Some(&backend.backend), update)
            .await
    }

    async fn commit_pre_registration(
        &self,
        submission: &Submission,
        plugin: Option<&str>,
        update: PreRegistrationUpdate,
    ) -> Result<PreRegistrationOutcome, RegistrarError> {
        let from_plugin =
            submission.public_registration_reference.is_none() && update.plugin_reference.is_some();

        let updated = match self.store().complete_pre_registration(&submission.id, update) {
            Ok(updated) => updated,
            Err(SubmissionError::InvalidState { reason, .. }) => {
                debug!(submission_id = %submission.id, %reason, "Pre-registration already completed");
                return Ok(PreRegistrationOutcome::Skipped {
                    verdict: PreRegistrationVerdict::AlreadyDone,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let reference = updated.public_registration_reference.unwrap_or_default();
        let result = if from_plugin {
            "plugin_reference"
        } else {
            "fallback_reference"
        };
        metrics::PRE_REGISTRATIONS.with_label_values(&[result]).inc();

        info!(
            submission_id = %submission.id,
            reference = %reference,
            plugin = plugin.unwrap_or("none"),
            from_plugin,
            "Pre-registration completed"
        );

        self.emit(AuditEvent::PreRegistrationCompleted {
            submission_id: submission.id.clone(),
            reference: reference.clone(),
            from_plugin,
            plugin: plugin.map(String::from),
        })
        .await;

        Ok(PreRegistrationOutcome::Completed {
            reference,
            from_plugin,
        })
    }

    async fn fail_pre_registration(
        &self,
        submission: &Submission,
        plugin: &str,
        failure: AttemptFailure,
        policy: RetryPolicy,
    ) -> Result<PreRegistrationOutcome, RegistrarError> {
        let fallback = match submission.public_registration_reference {
            Some(_) => None,
            None => Some(unique_reference(self.store().as_ref())?),
        };

        if failure.kind == AttemptFailureKind::Unexpected {
            error!(submission_id = %submission.id, plugin, error = %failure, "Pre-registration crashed");
        } else {
            warn!(submission_id = %submission.id, plugin, error = %failure, "Pre-registration failed");
        }

        self.store()
            .fail_pre_registration(&submission.id, fallback, failure.to_string())?;
        metrics::PRE_REGISTRATIONS.with_label_values(&["failed"]).inc();

        self.emit(AuditEvent::PreRegistrationFailed {
            submission_id: submission.id.clone(),
            plugin: Some(plugin.to_string()),
            error: failure.to_string(),
        })
        .await;

        Ok(PreRegistrationOutcome::Failed { failure }.into_result(policy)?)
    }
}
