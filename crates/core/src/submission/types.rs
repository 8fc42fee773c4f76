//! Core submission data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Registration status of a submission.
///
/// State machine flow:
/// ```text
/// NotStarted -> InProgress -> Success
///                   |
///                   v
///                Failed -> InProgress (retry)
/// ```
///
/// `Success` is terminal: no trigger re-enters `InProgress` from it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    #[default]
    NotStarted,
    InProgress,
    Success,
    Failed,
}

impl RegistrationStatus {
    /// Returns the status as a string (for storage and filtering).
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::NotStarted => "not_started",
            RegistrationStatus::InProgress => "in_progress",
            RegistrationStatus::Success => "success",
            RegistrationStatus::Failed => "failed",
        }
    }

    /// Parse a status from its storage string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_started" => Some(RegistrationStatus::NotStarted),
            "in_progress" => Some(RegistrationStatus::InProgress),
            "success" => Some(RegistrationStatus::Success),
            "failed" => Some(RegistrationStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if no further registration may happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistrationStatus::Success)
    }

    /// Whether a transition to `next` is allowed.
    pub fn can_transition_to(&self, next: RegistrationStatus) -> bool {
        use RegistrationStatus::*;
        match (self, next) {
            (Success, _) => false,
            (NotStarted, InProgress) | (Failed, InProgress) => true,
            (InProgress, Success) | (InProgress, Failed) => true,
            // Pre-registration may fail before any attempt starts.
            (NotStarted, Failed) | (Failed, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Co-sign requirement attached to a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CosignRequirement {
    /// Whether a second party must sign before registration.
    pub required: bool,
    /// When the co-sign happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_on: Option<DateTime<Utc>>,
}

impl CosignRequirement {
    pub fn required() -> Self {
        Self {
            required: true,
            signed_on: None,
        }
    }

    pub fn is_satisfied(&self) -> bool {
        !self.required || self.signed_on.is_some()
    }
}

/// Payment bookkeeping relevant to registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentState {
    /// The form requires a payment.
    #[serde(default)]
    pub required: bool,
    /// The payment provider confirmed the user paid.
    #[serde(default)]
    pub user_has_paid: bool,
    /// The registration backend has been told about the payment.
    #[serde(default)]
    pub registered: bool,
}

impl PaymentState {
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }
}

/// Which registration plugin handles a submission, and its options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrationBackendConfig {
    /// Plugin identifier (e.g. "email", "demo").
    pub backend: String,
    /// Plugin specific options, validated by the plugin itself.
    #[serde(default)]
    pub options: Value,
}

impl RegistrationBackendConfig {
    pub fn new(backend: impl Into<String>, options: Value) -> Self {
        Self {
            backend: backend.into(),
            options,
        }
    }

    /// An empty identifier counts as "no backend".
    pub fn is_configured(&self) -> bool {
        !self.backend.trim().is_empty()
    }
}

/// Persisted registration result of a submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegistrationResultRecord {
    /// Reference seen on an earlier attempt, kept so retries converge on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_internal_reference: Option<String>,

    /// Merged payload returned by the plugin(s).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub plugin_payload: Map<String, Value>,

    /// Failure detail of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_trace: Option<String>,
}

/// Change applied to a [`RegistrationResultRecord`] together with a status update.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultUpdate {
    /// Merge the payload and clear any stored failure.
    Success { payload: Option<Map<String, Value>> },
    /// Store the failure trace, leaving the payload alone.
    Failure { trace: String },
}

impl RegistrationResultRecord {
    /// Apply an update in place.
    pub fn apply(&mut self, update: ResultUpdate) {
        match update {
            ResultUpdate::Success { payload } => {
                self.failure_trace = None;
                if let Some(payload) = payload {
                    self.plugin_payload.extend(payload);
                }
            }
            ResultUpdate::Failure { trace } => {
                self.failure_trace = Some(trace);
            }
        }
    }

    pub fn has_failure(&self) -> bool {
        self.failure_trace.is_some()
    }
}

/// A completed (or in-progress) form submission, as seen by the registrar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    /// Unique identifier (UUID).
    pub id: String,

    /// Name of the form the submission belongs to.
    pub form_name: String,

    pub created_at: DateTime<Utc>,

    /// Set once data entry is finished. Nothing is registered before that.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_on: Option<DateTime<Utc>>,

    #[serde(default)]
    pub pre_registration_completed: bool,

    /// Public reference handed to the citizen. Assigned once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_registration_reference: Option<String>,

    #[serde(default)]
    pub registration_status: RegistrationStatus,

    #[serde(default)]
    pub registration_attempts: u32,

    #[serde(default)]
    pub registration_result: RegistrationResultRecord,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cosign: Option<CosignRequirement>,

    #[serde(default)]
    pub payment: PaymentState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_register_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_backend: Option<RegistrationBackendConfig>,

    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn is_completed(&self) -> bool {
        self.completed_on.is_some()
    }

    /// True while a required co-sign has not been given.
    pub fn waiting_on_cosign(&self) -> bool {
        self.cosign
            .as_ref()
            .map(|cosign| !cosign.is_satisfied())
            .unwrap_or(false)
    }

    /// The backend config, if one is set and names a plugin.
    pub fn configured_backend(&self) -> Option<&RegistrationBackendConfig> {
        self.registration_backend
            .as_ref()
            .filter(|backend| backend.is_configured())
    }

    pub fn is_registered(&self) -> bool {
        self.registration_status == RegistrationStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission() -> Submission {
        let now = Utc::now();
        Submission {
            id: "sub-1".to_string(),
            form_name: "Parking permit".to_string(),
            created_at: now,
            completed_on: None,
            pre_registration_completed: false,
            public_registration_reference: None,
            registration_status: RegistrationStatus::NotStarted,
            registration_attempts: 0,
            registration_result: RegistrationResultRecord::default(),
            cosign: None,
            payment: PaymentState::default(),
            last_register_date: None,
            registration_backend: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_strings_round_trip() {
        for status in [
            RegistrationStatus::NotStarted,
            RegistrationStatus::InProgress,
            RegistrationStatus::Success,
            RegistrationStatus::Failed,
        ] {
            assert_eq!(RegistrationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RegistrationStatus::parse("unknown"), None);
    }

    #[test]
    fn test_success_is_terminal() {
        let success = RegistrationStatus::Success;
        assert!(success.is_terminal());
        assert!(!success.can_transition_to(RegistrationStatus::InProgress));
        assert!(!success.can_transition_to(RegistrationStatus::Failed));
    }

    #[test]
    fn test_failed_can_be_retried() {
        let failed = RegistrationStatus::Failed;
        assert!(!failed.is_terminal());
        assert!(failed.can_transition_to(RegistrationStatus::InProgress));
        assert!(!RegistrationStatus::InProgress.can_transition_to(RegistrationStatus::NotStarted));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&RegistrationStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_waiting_on_cosign() {
        let mut sub = submission();
        assert!(!sub.waiting_on_cosign());

        sub.cosign = Some(CosignRequirement::required());
        assert!(sub.waiting_on_cosign());

        sub.cosign = Some(CosignRequirement {
            required: true,
            signed_on: Some(Utc::now()),
        });
        assert!(!sub.waiting_on_cosign());

        sub.cosign = Some(CosignRequirement {
            required: false,
            signed_on: None,
        });
        assert!(!sub.waiting_on_cosign());
    }

    #[test]
    fn test_blank_backend_is_not_configured() {
        let mut sub = submission();
        sub.registration_backend = Some(RegistrationBackendConfig::new("  ", json!({})));
        assert!(sub.configured_backend().is_none());

        sub.registration_backend = Some(RegistrationBackendConfig::new("email", json!({})));
        assert_eq!(sub.configured_backend().unwrap().backend, "email");
    }

    #[test]
    fn test_result_success_clears_failure_and_merges_payload() {
        let mut record = RegistrationResultRecord {
            temporary_internal_reference: Some("OF-ABC123".to_string()),
            plugin_payload: json!({"zaak": "old", "kept": 1})
                .as_object()
                .cloned()
                .unwrap(),
            failure_trace: Some("boom".to_string()),
        };

        record.apply(ResultUpdate::Success {
            payload: json!({"zaak": "new"}).as_object().cloned(),
        });

        assert!(record.failure_trace.is_none());
        assert_eq!(record.plugin_payload["zaak"], "new");
        assert_eq!(record.plugin_payload["kept"], 1);
        assert_eq!(
            record.temporary_internal_reference.as_deref(),
            Some("OF-ABC123")
        );
    }

    #[test]
    fn test_result_failure_keeps_payload() {
        let mut record = RegistrationResultRecord::default();
        record
            .plugin_payload
            .insert("document".to_string(), json!("doc-1"));

        record.apply(ResultUpdate::Failure {
            trace: "remote rejected".to_string(),
        });

        assert!(record.has_failure());
        assert_eq!(record.plugin_payload["document"], "doc-1");
    }

    #[test]
    fn test_empty_result_record_serializes_compactly() {
        let json = serde_json::to_string(&RegistrationResultRecord::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
