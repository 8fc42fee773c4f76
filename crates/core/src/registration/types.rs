//! Outcome and error types of the registrar.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gating::{GateVerdict, PreRegistrationVerdict};
use crate::registry::RegistrationError;
use crate::submission::SubmissionError;

/// What caused a (pre-)registration to be triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostSubmissionEvent {
    OnCompletion,
    OnPaymentComplete,
    OnRetry,
}

impl PostSubmissionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostSubmissionEvent::OnCompletion => "on_completion",
            PostSubmissionEvent::OnPaymentComplete => "on_payment_complete",
            PostSubmissionEvent::OnRetry => "on_retry",
        }
    }

    /// The event a single run for both `self` and `other` should carry.
    ///
    /// A payment is never dropped, since only that event tells the backend
    /// the submission was paid for. Otherwise a retry wins over completion.
    pub fn merge(self, other: PostSubmissionEvent) -> PostSubmissionEvent {
        use PostSubmissionEvent::*;
        match (self, other) {
            (OnPaymentComplete, _) | (_, OnPaymentComplete) => OnPaymentComplete,
            (OnRetry, _) | (_, OnRetry) => OnRetry,
            (OnCompletion, OnCompletion) => OnCompletion,
        }
    }
}

impl std::fmt::Display for PostSubmissionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether attempt failures are returned to the caller.
///
/// Scheduled work swallows failures (they are persisted and retried later);
/// an operator's manual retry surfaces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Swallow,
    Surface,
}

/// Class of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptFailureKind {
    PluginDisabled,
    UnknownPlugin,
    InvalidOptions,
    RegistrationFailed,
    Unexpected,
}

impl AttemptFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptFailureKind::PluginDisabled => "plugin_disabled",
            AttemptFailureKind::UnknownPlugin => "unknown_plugin",
            AttemptFailureKind::InvalidOptions => "invalid_options",
            AttemptFailureKind::RegistrationFailed => "registration_failed",
            AttemptFailureKind::Unexpected => "unexpected",
        }
    }

    /// Configuration problems an operator has to fix before a retry can work.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            AttemptFailureKind::PluginDisabled
                | AttemptFailureKind::UnknownPlugin
                | AttemptFailureKind::InvalidOptions
        )
    }
}

/// A failed (pre-)registration attempt. The message is what gets stored as
/// the failure trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{}: {message}", kind.as_str())]
pub struct AttemptFailure {
    pub kind: AttemptFailureKind,
    pub message: String,
}

impl AttemptFailure {
    pub fn new(kind: AttemptFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<RegistrationError> for AttemptFailure {
    fn from(error: RegistrationError) -> Self {
        match error {
            RegistrationError::Failed(message) => {
                Self::new(AttemptFailureKind::RegistrationFailed, message)
            }
            RegistrationError::Unexpected(message) => {
                Self::new(AttemptFailureKind::Unexpected, message)
            }
        }
    }
}

/// Result of one registration trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// A gate stopped the attempt before anything was written.
    Skipped { verdict: GateVerdict },
    /// Another worker started an attempt first.
    AlreadyInProgress,
    /// The plugin accepted the submission.
    Registered {
        plugin: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    /// No backend is configured; recorded as a success.
    NoBackend,
    /// The attempt failed and was recorded.
    Failed { failure: AttemptFailure },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::Registered { .. } | AttemptOutcome::NoBackend
        )
    }

    /// Under [`RetryPolicy::Surface`] a failure becomes an error.
    pub fn into_result(self, policy: RetryPolicy) -> Result<Self, AttemptFailure> {
        match (self, policy) {
            (AttemptOutcome::Failed { failure }, RetryPolicy::Surface) => Err(failure),
            (outcome, _) => Ok(outcome),
        }
    }
}

/// Result of one pre-registration trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PreRegistrationOutcome {
    Skipped { verdict: PreRegistrationVerdict },
    Completed { reference: String, from_plugin: bool },
    /// A fallback reference was assigned and the failure recorded.
    Failed { failure: AttemptFailure },
}

impl PreRegistrationOutcome {
    /// Under [`RetryPolicy::Surface`] a failure becomes an error.
    pub fn into_result(self, policy: RetryPolicy) -> Result<Self, AttemptFailure> {
        match (self, policy) {
            (PreRegistrationOutcome::Failed { failure }, RetryPolicy::Surface) => Err(failure),
            (outcome, _) => Ok(outcome),
        }
    }

    /// True when registration may follow.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            PreRegistrationOutcome::Completed { .. }
                | PreRegistrationOutcome::Skipped {
                    verdict: PreRegistrationVerdict::AlreadyDone
                }
        )
    }
}

/// Errors returned by [`Registrar`](super::Registrar) operations.
#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error(transparent)]
    Store(#[from] SubmissionError),

    #[error("Attempt failed: {0}")]
    Attempt(#[from] AttemptFailure),
}
