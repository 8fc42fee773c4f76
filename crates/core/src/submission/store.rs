//! Submission storage trait and types.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use super::{
    CosignRequirement, PaymentState, RegistrationBackendConfig, RegistrationStatus, ResultUpdate,
    Submission,
};

/// Error type for submission storage operations.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// Submission not found.
    #[error("Submission not found: {0}")]
    NotFound(String),

    /// Cannot perform operation due to current state.
    #[error("Cannot {operation} submission {submission_id}: {reason}")]
    InvalidState {
        submission_id: String,
        operation: String,
        reason: String,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl SubmissionError {
    pub(crate) fn invalid_state(
        submission_id: &str,
        operation: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            submission_id: submission_id.to_string(),
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

/// Request to create a new submission.
#[derive(Debug, Clone, Default)]
pub struct CreateSubmissionRequest {
    pub form_name: String,
    pub registration_backend: Option<RegistrationBackendConfig>,
    pub cosign: Option<CosignRequirement>,
    pub payment: PaymentState,
}

/// Data written when pre-registration finishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreRegistrationUpdate {
    /// Reference proposed by the plugin, used when none is assigned yet.
    pub plugin_reference: Option<String>,
    /// Fallback reference, used when neither an existing nor a plugin reference is present.
    pub fallback_reference: Option<String>,
    /// Payload merged into the registration result.
    pub payload: Option<Map<String, Value>>,
}

/// Filter for querying submissions.
#[derive(Debug, Clone, Default)]
pub struct SubmissionFilter {
    /// Filter by registration status.
    pub status: Option<RegistrationStatus>,
    /// Filter on completion.
    pub completed: Option<bool>,
    /// Filter on the pre-registration flag.
    pub pre_registration_completed: Option<bool>,
    /// Only submissions completed at or after this time.
    pub completed_after: Option<DateTime<Utc>>,
    /// Only submissions with fewer attempts than this.
    pub attempts_below: Option<u32>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl SubmissionFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: RegistrationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn with_pre_registration_completed(mut self, done: bool) -> Self {
        self.pre_registration_completed = Some(done);
        self
    }

    pub fn with_completed_after(mut self, after: DateTime<Utc>) -> Self {
        self.completed_after = Some(after);
        self
    }

    pub fn with_attempts_below(mut self, limit: u32) -> Self {
        self.attempts_below = Some(limit);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for submission storage backends.
///
/// Every mutating method is a single read-modify-write unit: implementations
/// must make it atomic with respect to concurrent callers.
pub trait SubmissionStore: Send + Sync {
    /// Create a new submission.
    fn create(&self, request: CreateSubmissionRequest) -> Result<Submission, SubmissionError>;

    /// Get a submission by ID.
    fn get(&self, id: &str) -> Result<Option<Submission>, SubmissionError>;

    /// List submissions matching the filter, oldest first.
    fn list(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>, SubmissionError>;

    /// Count submissions matching the filter.
    fn count(&self, filter: &SubmissionFilter) -> Result<i64, SubmissionError>;

    /// Set `completed_on`. Completing twice keeps the first timestamp.
    fn mark_completed(
        &self,
        id: &str,
        completed_on: DateTime<Utc>,
    ) -> Result<Submission, SubmissionError>;

    /// Record the co-sign. Fails if the submission has no co-sign requirement.
    fn record_cosign(&self, id: &str, signed_on: DateTime<Utc>)
        -> Result<Submission, SubmissionError>;

    /// Record that the user paid.
    fn record_payment(&self, id: &str) -> Result<Submission, SubmissionError>;

    /// Record that the registration backend was told about the payment.
    fn mark_payment_registered(&self, id: &str) -> Result<Submission, SubmissionError>;

    /// Whether any submission already carries this public reference.
    fn reference_exists(&self, reference: &str) -> Result<bool, SubmissionError>;

    /// Keep the current public reference as the temporary internal reference.
    fn remember_temporary_reference(&self, id: &str) -> Result<Submission, SubmissionError>;

    /// Assign the reference and set `pre_registration_completed`.
    ///
    /// An existing public reference is never replaced. Fails with
    /// `InvalidState` if pre-registration was already completed.
    fn complete_pre_registration(
        &self,
        id: &str,
        update: PreRegistrationUpdate,
    ) -> Result<Submission, SubmissionError>;

    /// Record a failed pre-registration, assigning `fallback_reference` if the
    /// submission has no reference yet.
    fn fail_pre_registration(
        &self,
        id: &str,
        fallback_reference: Option<String>,
        trace: String,
    ) -> Result<Submission, SubmissionError>;

    /// Start a registration attempt.
    ///
    /// Compare-and-set on `registration_attempts`: succeeds only if the stored
    /// count still equals `expected_attempts` and the status is not `Success`.
    /// Returns `None` when another attempt got there first.
    fn begin_attempt(
        &self,
        id: &str,
        expected_attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Result<Option<Submission>, SubmissionError>;

    /// Merge one value into the registration result's `plugin_payload`.
    ///
    /// Runs in its own transaction, independent of the attempt status.
    fn save_result_value(
        &self,
        id: &str,
        key: &str,
        value: Value,
    ) -> Result<Submission, SubmissionError>;

    /// Move to `status` and apply `update` to the registration result.
    fn save_registration_status(
        &self,
        id: &str,
        status: RegistrationStatus,
        update: ResultUpdate,
    ) -> Result<Submission, SubmissionError>;
}
