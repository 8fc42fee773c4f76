use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a registration attempt was skipped, as reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CosignRequired,
    PaymentPending,
    AttemptLimitExceeded,
    NoBackendConfigured,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::CosignRequired => "cosign_required",
            SkipReason::PaymentPending => "payment_pending",
            SkipReason::AttemptLimitExceeded => "attempt_limit_exceeded",
            SkipReason::NoBackendConfigured => "no_backend_configured",
        }
    }
}

/// Audit event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Submission lifecycle
    SubmissionCreated {
        submission_id: String,
        form_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backend: Option<String>,
    },
    SubmissionCompleted {
        submission_id: String,
    },

    // Pre-registration
    PreRegistrationCompleted {
        submission_id: String,
        reference: String,
        /// False when the reference was generated locally.
        from_plugin: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plugin: Option<String>,
    },
    PreRegistrationFailed {
        submission_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plugin: Option<String>,
        error: String,
    },

    // Registration attempts
    RegistrationStarted {
        submission_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plugin: Option<String>,
        /// Attempt number, starting at 1.
        attempt: u32,
        /// What triggered the attempt (on_completion, on_payment_complete, on_retry).
        trigger: String,
    },
    RegistrationSucceeded {
        submission_id: String,
        plugin: String,
        attempt: u32,
    },
    RegistrationFailed {
        submission_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plugin: Option<String>,
        attempt: u32,
        /// Failure class (plugin_disabled, invalid_options, registration_failed, ...).
        kind: String,
        error: String,
    },
    RegistrationSkipped {
        submission_id: String,
        reason: SkipReason,
    },

    // Payment
    PaymentStatusRegistered {
        submission_id: String,
        plugin: String,
    },

    // Operator actions
    RetryRequested {
        submission_id: String,
        requested_by: String,
    },
}

impl AuditEvent {
    /// Get the event type as a string (for storage/filtering)
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::SubmissionCreated { .. } => "submission_created",
            Self::SubmissionCompleted { .. } => "submission_completed",
            Self::PreRegistrationCompleted { .. } => "pre_registration_completed",
            Self::PreRegistrationFailed { .. } => "pre_registration_failed",
            Self::RegistrationStarted { .. } => "registration_started",
            Self::RegistrationSucceeded { .. } => "registration_succeeded",
            Self::RegistrationFailed { .. } => "registration_failed",
            Self::RegistrationSkipped { .. } => "registration_skipped",
            Self::PaymentStatusRegistered { .. } => "payment_status_registered",
            Self::RetryRequested { .. } => "retry_requested",
        }
    }

    /// The submission this event is about, if any.
    pub fn submission_id(&self) -> Option<&str> {
        match self {
            Self::ServiceStarted { .. } | Self::ServiceStopped { .. } => None,
            Self::SubmissionCreated { submission_id, .. }
            | Self::SubmissionCompleted { submission_id }
            | Self::PreRegistrationCompleted { submission_id, .. }
            | Self::PreRegistrationFailed { submission_id, .. }
            | Self::RegistrationStarted { submission_id, .. }
            | Self::RegistrationSucceeded { submission_id, .. }
            | Self::RegistrationFailed { submission_id, .. }
            | Self::RegistrationSkipped { submission_id, .. }
            | Self::PaymentStatusRegistered { submission_id, .. }
            | Self::RetryRequested { submission_id, .. } => Some(submission_id),
        }
    }

    /// The operator behind the event, for events caused by a person.
    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::RetryRequested { requested_by, .. } => Some(requested_by),
            _ => None,
        }
    }

    /// The registration backend involved, when known.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Self::SubmissionCreated { backend, .. } => backend.as_deref(),
            Self::PreRegistrationCompleted { plugin, .. }
            | Self::PreRegistrationFailed { plugin, .. }
            | Self::RegistrationStarted { plugin, .. }
            | Self::RegistrationFailed { plugin, .. } => plugin.as_deref(),
            Self::RegistrationSucceeded { plugin, .. }
            | Self::PaymentStatusRegistered { plugin, .. } => Some(plugin),
            _ => None,
        }
    }

    /// Why an attempt did not succeed: the failure kind or the skip reason.
    pub fn outcome(&self) -> Option<&str> {
        match self {
            Self::RegistrationFailed { kind, .. } => Some(kind),
            Self::RegistrationSkipped { reason, .. } => Some(reason.as_str()),
            Self::PreRegistrationFailed { .. } => Some("pre_registration_failed"),
            _ => None,
        }
    }
}

/// A stored audit event, with the columns it is searched by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub submission_id: Option<String>,
    pub plugin: Option<String>,
    /// Failure kind or skip reason.
    pub outcome: Option<String>,
    pub actor: Option<String>,
    pub data: AuditEvent,
}

impl AuditRecord {
    /// Unsaved record for `event`; the store assigns the id.
    pub fn new(timestamp: DateTime<Utc>, event: AuditEvent) -> Self {
        Self {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            submission_id: event.submission_id().map(String::from),
            plugin: event.plugin().map(String::from),
            outcome: event.outcome().map(String::from),
            actor: event.actor().map(String::from),
            data: event,
        }
    }
}
