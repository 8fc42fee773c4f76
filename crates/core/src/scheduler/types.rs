//! Types for the registration scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registration::RegistrarError;

/// Work the scheduler can run for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    PreRegistration,
    Registration,
    /// Pre-registration followed by registration.
    PostSubmission,
    PaymentStatus,
    ManualRetry,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::PreRegistration => "pre_registration",
            JobKind::Registration => "registration",
            JobKind::PostSubmission => "post_submission",
            JobKind::PaymentStatus => "payment_status",
            JobKind::ManualRetry => "manual_retry",
        }
    }

    /// The job that covers both `self` and `other`.
    pub(crate) fn merge(self, other: JobKind) -> JobKind {
        if self == other {
            self
        } else {
            JobKind::PostSubmission
        }
    }
}

/// Result of a schedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// A new job was spawned.
    Enqueued,
    /// A job for this submission is already running. The request is folded
    /// into one follow-up run after it.
    AlreadyInFlight,
}

/// Errors from synchronous triggers.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("submission {0} is already being processed")]
    AlreadyInFlight(String),

    #[error(transparent)]
    Registrar(#[from] RegistrarError),
}

/// Current status of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether the sweep loop is running.
    pub running: bool,
    /// Submissions with a job running or waiting for a worker.
    pub in_flight: usize,
    /// Free worker slots.
    pub available_workers: usize,
    pub max_concurrent_jobs: usize,
    /// Completed sweeps since startup.
    pub sweeps_completed: u64,
    pub last_sweep_at: Option<DateTime<Utc>>,
    /// Submissions the last sweep re-scheduled.
    pub last_sweep_rescheduled: usize,
}
