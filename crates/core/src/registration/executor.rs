use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{
    guarded, merge_payload, AttemptFailure, AttemptFailureKind, AttemptOutcome,
    PostSubmissionEvent, RegistrarError, Registrar, RetryPolicy,
};
use crate::audit::{AuditEvent, SkipReason};
use crate::gating::{evaluate_registration, GateVerdict};
use crate::metrics;
use crate::registry::ResultMemo;
use crate::submission::{RegistrationStatus, ResultUpdate, Submission};

fn skip_reason(verdict: GateVerdict) -> Option<SkipReason> {
    match verdict {
        GateVerdict::SkipWaitingOnCosign => Some(SkipReason::CosignRequired),
        GateVerdict::SkipWaitingOnPayment => Some(SkipReason::PaymentPending),
        GateVerdict::SkipAttemptLimitExceeded => Some(SkipReason::AttemptLimitExceeded),
        _ => None,
    }
}

impl Registrar {
    /// Register a submission with its configured backend.
    ///
    /// Runs the gates, claims the attempt with a compare-and-set on the
    /// attempt counter, calls the plugin and records the outcome. Failures
    /// are always persisted; `policy` decides whether they are also returned
    /// as errors.
    pub async fn register(
        &self,
        submission_id: &str,
        event: PostSubmissionEvent,
        policy: RetryPolicy,
    ) -> Result<AttemptOutcome, RegistrarError> {
        let submission = self.load(submission_id)?;

        match evaluate_registration(&submission, self.config()) {
            GateVerdict::Proceed => {}
            GateVerdict::SkipAttemptLimitExceeded if policy == RetryPolicy::Surface => {
                info!(
                    submission_id,
                    attempts = submission.registration_attempts,
                    "Manual retry past the attempt limit"
                );
            }
            verdict => {
                self.report_skip(&submission, verdict).await;
                return Ok(AttemptOutcome::Skipped { verdict });
            }
        }

        let Some(submission) = self.store().begin_attempt(
            submission_id,
            submission.registration_attempts,
            Utc::now(),
        )?
        else {
            debug!(submission_id, "Another worker started this attempt first");
            return Ok(AttemptOutcome::AlreadyInProgress);
        };
        let attempt = submission.registration_attempts;
        let backend = submission.configured_backend().cloned();

        self.emit(AuditEvent::RegistrationStarted {
            submission_id: submission.id.clone(),
            plugin: backend.as_ref().map(|b| b.backend.clone()),
            attempt,
            trigger: event.as_str().to_string(),
        })
        .await;

        let Some(backend) = backend else {
            info!(submission_id, "No registration backend configured, nothing to register");
            self.store().save_registration_status(
                submission_id,
                RegistrationStatus::Success,
                ResultUpdate::Success { payload: None },
            )?;
            metrics::REGISTRATION_ATTEMPTS
                .with_label_values(&["none", "no_backend"])
                .inc();
            self.emit(AuditEvent::RegistrationSkipped {
                submission_id: submission.id.clone(),
                reason: SkipReason::NoBackendConfigured,
            })
            .await;
            return Ok(AttemptOutcome::NoBackend);
        };
        let plugin_id = backend.backend.as_str();

        let (plugin, options) = match self.prepare(&backend) {
            Ok(prepared) => prepared,
            Err(failure) => {
                return self
                    .fail_attempt(&submission, plugin_id, attempt, failure, policy)
                    .await;
            }
        };

        info!(submission_id, plugin = plugin_id, attempt, trigger = %event, "Registering submission");
        let timer = metrics::REGISTRATION_DURATION
            .with_label_values(&[plugin_id])
            .start_timer();
        let memo = ResultMemo::new(Arc::clone(self.store()), &submission);
        let result = guarded(plugin.register_submission(&submission, &options, &memo)).await;
        timer.observe_duration();

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                return self
                    .fail_attempt(&submission, plugin_id, attempt, e.into(), policy)
                    .await;
            }
        };

        if self.config().wait_for_payment_to_register
            && event == PostSubmissionEvent::OnPaymentComplete
        {
            self.store().mark_payment_registered(submission_id)?;
        }

        let payload = merge_payload(&submission, plugin_id, result);
        let updated = self.store().save_registration_status(
            submission_id,
            RegistrationStatus::Success,
            ResultUpdate::Success { payload },
        )?;

        metrics::REGISTRATION_ATTEMPTS
            .with_label_values(&[plugin_id, "success"])
            .inc();
        info!(submission_id, plugin = plugin_id, attempt, "Registration succeeded");
        self.emit(AuditEvent::RegistrationSucceeded {
            submission_id: submission.id.clone(),
            plugin: plugin_id.to_string(),
            attempt,
        })
        .await;

        Ok(AttemptOutcome::Registered {
            plugin: plugin_id.to_string(),
            reference: updated.public_registration_reference,
        })
    }

    /// Tell the backend that a registered submission has been paid for.
    ///
    /// Returns `false` when there is nothing to tell: the submission is not
    /// registered yet, payment is not required or not made, or the backend
    /// already knows.
    pub async fn update_payment_status(&self, submission_id: &str) -> Result<bool, RegistrarError> {
        let submission = self.load(submission_id)?;
        let payment = &submission.payment;

        if !submission.is_registered()
            || !payment.required
            || !payment.user_has_paid
            || payment.registered
        {
            debug!(submission_id, "No payment status update needed");
            return Ok(false);
        }

        let Some(backend) = submission.configured_backend().cloned() else {
            debug!(submission_id, "No registration backend to update payment status with");
            return Ok(false);
        };

        let (plugin, options) = self.prepare(&backend)?;
        if let Err(e) = guarded(plugin.update_payment_status(&submission, &options)).await {
            let failure = AttemptFailure::from(e);
            warn!(submission_id, plugin = %backend.backend, error = %failure, "Payment status update failed");
            return Err(failure.into());
        }

        self.store().mark_payment_registered(submission_id)?;
        info!(submission_id, plugin = %backend.backend, "Payment status registered");
        self.emit(AuditEvent::PaymentStatusRegistered {
            submission_id: submission.id.clone(),
            plugin: backend.backend.clone(),
        })
        .await;

        Ok(true)
    }

    async fn report_skip(&self, submission: &Submission, verdict: GateVerdict) {
        debug!(submission_id = %submission.id, verdict = verdict.as_str(), "Registration skipped");
        metrics::REGISTRATION_SKIPS
            .with_label_values(&[verdict.as_str()])
            .inc();

        if let Some(reason) = skip_reason(verdict) {
            self.emit(AuditEvent::RegistrationSkipped {
                submission_id: submission.id.clone(),
                reason,
            })
            .await;
        }
    }

    async fn fail_attempt(
        &self,
        submission: &Submission,
        plugin: &str,
        attempt: u32,
        failure: AttemptFailure,
        policy: RetryPolicy,
    ) -> Result<AttemptOutcome, RegistrarError> {
        if failure.kind == AttemptFailureKind::Unexpected {
            error!(submission_id = %submission.id, plugin, attempt, error = %failure, "Registration crashed");
        } else {
            warn!(submission_id = %submission.id, plugin, attempt, error = %failure, "Registration failed");
        }

        self.store().save_registration_status(
            &submission.id,
            RegistrationStatus::Failed,
            ResultUpdate::Failure {
                trace: failure.to_string(),
            },
        )?;

        metrics::REGISTRATION_ATTEMPTS
            .with_label_values(&[plugin, failure.kind.as_str()])
            .inc();
        self.emit(AuditEvent::RegistrationFailed {
            submission_id: submission.id.clone(),
            plugin: Some(plugin.to_string()),
            attempt,
            kind: failure.kind.as_str().to_string(),
            error: failure.message.clone(),
        })
        .await;

        Ok(AttemptOutcome::Failed { failure }.into_result(policy)?)
    }
}
