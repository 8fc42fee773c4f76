//! Decides whether a submission may be (pre-)registered right now.
//!
//! Both evaluators are pure: they read a submission snapshot and the
//! registration config, and never touch storage.

use serde::Serialize;

use crate::config::RegistrationConfig;
use crate::submission::Submission;

/// Verdict of [`evaluate_registration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateVerdict {
    Proceed,
    SkipAlreadyDone,
    SkipNotComplete,
    SkipPreRegistrationPending,
    SkipAttemptLimitExceeded,
    SkipWaitingOnCosign,
    SkipWaitingOnPayment,
}

impl GateVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateVerdict::Proceed => "proceed",
            GateVerdict::SkipAlreadyDone => "skip_already_done",
            GateVerdict::SkipNotComplete => "skip_not_complete",
            GateVerdict::SkipPreRegistrationPending => "skip_pre_registration_pending",
            GateVerdict::SkipAttemptLimitExceeded => "skip_attempt_limit_exceeded",
            GateVerdict::SkipWaitingOnCosign => "skip_waiting_on_cosign",
            GateVerdict::SkipWaitingOnPayment => "skip_waiting_on_payment",
        }
    }

    pub fn is_proceed(&self) -> bool {
        matches!(self, GateVerdict::Proceed)
    }
}

/// Evaluate the registration gates. First match wins:
///
/// 1. already registered
/// 2. not completed
/// 3. pre-registration pending
/// 4. attempt limit reached
/// 5. waiting on co-sign
/// 6. waiting on payment (only when configured to wait)
pub fn evaluate_registration(submission: &Submission, config: &RegistrationConfig) -> GateVerdict {
    if submission.is_registered() {
        GateVerdict::SkipAlreadyDone
    } else if !submission.is_completed() {
        GateVerdict::SkipNotComplete
    } else if !submission.pre_registration_completed {
        GateVerdict::SkipPreRegistrationPending
    } else if submission.registration_attempts >= config.attempt_limit {
        GateVerdict::SkipAttemptLimitExceeded
    } else if submission.waiting_on_cosign() {
        GateVerdict::SkipWaitingOnCosign
    } else if config.wait_for_payment_to_register
        && submission.payment.required
        && !submission.payment.user_has_paid
    {
        GateVerdict::SkipWaitingOnPayment
    } else {
        GateVerdict::Proceed
    }
}

/// Verdict of [`evaluate_pre_registration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreRegistrationVerdict {
    Proceed,
    NotComplete,
    AlreadyDone,
    AttemptLimitExceeded,
}

impl PreRegistrationVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreRegistrationVerdict::Proceed => "proceed",
            PreRegistrationVerdict::NotComplete => "not_complete",
            PreRegistrationVerdict::AlreadyDone => "already_done",
            PreRegistrationVerdict::AttemptLimitExceeded => "attempt_limit_exceeded",
        }
    }
}

/// Evaluate the pre-registration preconditions.
pub fn evaluate_pre_registration(
    submission: &Submission,
    config: &RegistrationConfig,
) -> PreRegistrationVerdict {
    if !submission.is_completed() {
        PreRegistrationVerdict::NotComplete
    } else if submission.pre_registration_completed {
        PreRegistrationVerdict::AlreadyDone
    } else if submission.registration_attempts >= config.attempt_limit {
        PreRegistrationVerdict::AttemptLimitExceeded
    } else {
        PreRegistrationVerdict::Proceed
    }
}
