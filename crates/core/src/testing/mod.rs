//! Testing utilities and mock implementations.
//!
//! Provides a scriptable registration plugin and submission fixtures so the
//! registrar and scheduler can be exercised without real backends.
//!
//! # Example
//!
//! ```rust,ignore
//! use registrar_core::testing::{fixtures, MockRegistrationPlugin};
//!
//! let plugin = Arc::new(MockRegistrationPlugin::new("mock"));
//! plugin.set_next_panic("backend exploded").await;
//!
//! let submission = fixtures::pre_registered_submission("mock");
//! ```

mod mock_registration_plugin;

pub use mock_registration_plugin::{MockOptions, MockRegistrationPlugin, RecordedCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;
    use serde_json::json;

    use crate::submission::{
        PaymentState, RegistrationBackendConfig, RegistrationResultRecord, RegistrationStatus,
        Submission,
    };

    /// A completed submission that still needs pre-registration.
    pub fn completed_submission(backend: &str) -> Submission {
        let now = Utc::now();
        Submission {
            id: uuid::Uuid::new_v4().to_string(),
            form_name: "Test form".to_string(),
            created_at: now,
            completed_on: Some(now),
            pre_registration_completed: false,
            public_registration_reference: None,
            registration_status: RegistrationStatus::NotStarted,
            registration_attempts: 0,
            registration_result: RegistrationResultRecord::default(),
            cosign: None,
            payment: PaymentState::default(),
            last_register_date: None,
            registration_backend: Some(RegistrationBackendConfig::new(backend, json!({}))),
            updated_at: now,
        }
    }

    /// A submission that is ready to be registered.
    pub fn pre_registered_submission(backend: &str) -> Submission {
        let mut submission = completed_submission(backend);
        submission.pre_registration_completed = true;
        submission.public_registration_reference = Some("OF-TEST23".to_string());
        submission
    }
}
