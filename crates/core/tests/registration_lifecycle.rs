//! Registration lifecycle integration tests.
//!
//! These tests drive submissions through the scheduler and registrar the way
//! the server does:
//! created -> completed -> pre-registered -> registered

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;

use registrar_core::{
    registry::{execute_unless_result_exists, OptionsError, RegistrationPlugin, ResultMemo},
    submission::{CosignRequirement, PaymentState, RegistrationBackendConfig},
    testing::MockRegistrationPlugin,
    AttemptOutcome, CreateSubmissionRequest, GateVerdict, PluginRegistry, PostSubmissionEvent,
    RegistrationConfig, RegistrationError, RegistrationResult, RegistrationScheduler,
    RegistrationStatus, Registrar, RetryPolicy, ScheduleOutcome, SchedulerConfig,
    SqliteSubmissionStore, Submission, SubmissionStore, TriggerError,
};

const IDLE: Duration = Duration::from_secs(5);

/// Plugin whose pre-registration fails once, then hands back whatever
/// reference it was shown on the retry.
struct DeterministicPlugin {
    pre_register_calls: AtomicUsize,
}

#[async_trait]
impl RegistrationPlugin for DeterministicPlugin {
    fn identifier(&self) -> &str {
        "deterministic"
    }

    fn verbose_name(&self) -> &str {
        "Deterministic"
    }

    fn configuration_options(&self, _options: &Value) -> Result<Value, OptionsError> {
        Ok(json!({}))
    }

    async fn register_submission(
        &self,
        _submission: &Submission,
        _options: &Value,
        _memo: &ResultMemo,
    ) -> Result<RegistrationResult, RegistrationError> {
        Ok(RegistrationResult::new())
    }

    async fn pre_register_submission(
        &self,
        submission: &Submission,
        _options: &Value,
    ) -> Result<RegistrationResult, RegistrationError> {
        if self.pre_register_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(RegistrationError::Failed("object store unavailable".to_string()));
        }
        let mut result = RegistrationResult::new();
        if let Some(ref reference) = submission.registration_result.temporary_internal_reference {
            result = result.with_reference(reference.clone());
        }
        Ok(result)
    }
}

/// Plugin that uploads a document and then creates a case for it. Creating
/// the case fails on the first call.
#[derive(Default)]
struct DocumentThenCasePlugin {
    uploads: AtomicUsize,
    case_calls: AtomicUsize,
}

#[async_trait]
impl RegistrationPlugin for DocumentThenCasePlugin {
    fn identifier(&self) -> &str {
        "zaak"
    }

    fn verbose_name(&self) -> &str {
        "Document then case"
    }

    fn configuration_options(&self, _options: &Value) -> Result<Value, OptionsError> {
        Ok(json!({}))
    }

    async fn register_submission(
        &self,
        submission: &Submission,
        _options: &Value,
        memo: &ResultMemo,
    ) -> Result<RegistrationResult, RegistrationError> {
        let document = execute_unless_result_exists(memo, "document", || async {
            let upload = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({
                "url": format!("https://documents.example/{}/{}", submission.id, upload)
            }))
        })
        .await?;

        let case = execute_unless_result_exists(memo, "case", || async {
            if self.case_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(RegistrationError::Failed("case service unavailable".to_string()));
            }
            Ok(json!({ "document": document["url"].clone() }))
        })
        .await?;

        Ok(RegistrationResult::new().with_entry("case_document", case["document"].clone()))
    }
}

/// Test helper to create all dependencies for lifecycle testing.
struct TestHarness {
    store: Arc<SqliteSubmissionStore>,
    plugin: Arc<MockRegistrationPlugin>,
    cases: Arc<DocumentThenCasePlugin>,
    scheduler: RegistrationScheduler,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(RegistrationConfig {
            attempt_limit: 3,
            wait_for_payment_to_register: true,
        })
    }

    fn with_config(config: RegistrationConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("registrar.db");

        let store = Arc::new(
            SqliteSubmissionStore::new(&db_path).expect("Failed to create submission store"),
        );
        let plugin = Arc::new(MockRegistrationPlugin::new("email"));
        let cases = Arc::new(DocumentThenCasePlugin::default());
        let registry = PluginRegistry::builder()
            .register(plugin.clone())
            .expect("register mock")
            .register(cases.clone())
            .expect("register cases")
            .register(Arc::new(DeterministicPlugin {
                pre_register_calls: AtomicUsize::new(0),
            }))
            .expect("register deterministic")
            .build(&Default::default());

        let registrar = Registrar::new(store.clone(), Arc::new(registry), config);
        let scheduler = RegistrationScheduler::new(
            SchedulerConfig {
                enabled: false,
                ..Default::default()
            },
            Arc::new(registrar),
            None,
        );

        Self {
            store,
            plugin,
            cases,
            scheduler,
            _temp_dir: temp_dir,
        }
    }

    fn create(&self, request: CreateSubmissionRequest) -> String {
        self.store.create(request).expect("create submission").id
    }

    fn create_completed(&self, request: CreateSubmissionRequest) -> String {
        let id = self.create(request);
        self.store
            .mark_completed(&id, Utc::now())
            .expect("complete submission");
        id
    }

    fn get(&self, id: &str) -> Submission {
        self.store.get(id).unwrap().expect("submission exists")
    }

    async fn complete_and_wait(&self, id: &str) {
        self.scheduler
            .schedule_post_submission(id, PostSubmissionEvent::OnCompletion);
        assert!(self.scheduler.wait_idle(IDLE).await, "jobs did not finish");
    }
}

fn email_backend() -> CreateSubmissionRequest {
    CreateSubmissionRequest {
        form_name: "Contactformulier".to_string(),
        registration_backend: Some(RegistrationBackendConfig::new(
            "email",
            json!({"label": "kcc"}),
        )),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_completed_submission_is_registered_once() {
    let harness = TestHarness::new();
    let id = harness.create_completed(email_backend());

    harness.complete_and_wait(&id).await;

    let submission = harness.get(&id);
    assert_eq!(submission.registration_status, RegistrationStatus::Success);
    assert_eq!(submission.registration_attempts, 1);
    assert!(!submission
        .public_registration_reference
        .unwrap_or_default()
        .is_empty());
    assert_eq!(harness.plugin.register_calls().await, 1);

    let calls = harness.plugin.recorded_registrations().await;
    assert_eq!(calls[0].options, json!({"label": "kcc"}));
}

#[tokio::test]
async fn test_success_is_idempotent() {
    let harness = TestHarness::new();
    let id = harness.create_completed(email_backend());
    harness.complete_and_wait(&id).await;
    let reference = harness.get(&id).public_registration_reference;

    for event in [
        PostSubmissionEvent::OnCompletion,
        PostSubmissionEvent::OnPaymentComplete,
        PostSubmissionEvent::OnRetry,
    ] {
        harness.scheduler.schedule_post_submission(&id, event);
        assert!(harness.scheduler.wait_idle(IDLE).await);
    }
    let outcome = harness.scheduler.retry_now(&id, "admin").await.unwrap();

    assert_eq!(
        outcome,
        AttemptOutcome::Skipped {
            verdict: GateVerdict::SkipAlreadyDone
        }
    );
    assert_eq!(harness.plugin.register_calls().await, 1);
    let submission = harness.get(&id);
    assert_eq!(submission.public_registration_reference, reference);
    assert_eq!(submission.registration_attempts, 1);
}

#[tokio::test]
async fn test_reference_is_stable_across_pre_registration_retries() {
    let harness = TestHarness::new();
    let id = harness.create_completed(CreateSubmissionRequest {
        form_name: "Objecten".to_string(),
        registration_backend: Some(RegistrationBackendConfig::new("deterministic", json!({}))),
        ..Default::default()
    });

    harness.complete_and_wait(&id).await;
    let first = harness.get(&id);
    assert!(!first.pre_registration_completed);
    assert_eq!(first.registration_status, RegistrationStatus::Failed);
    let reference = first
        .public_registration_reference
        .expect("fallback reference assigned on failure");

    let outcome = harness.scheduler.retry_now(&id, "admin").await.unwrap();
    assert!(outcome.is_success());

    let submission = harness.get(&id);
    assert!(submission.pre_registration_completed);
    assert_eq!(submission.public_registration_reference, Some(reference.clone()));
    assert_eq!(
        submission.registration_result.temporary_internal_reference,
        Some(reference)
    );
    assert!(submission.registration_result.failure_trace.is_none());
}

#[tokio::test]
async fn test_gated_triggers_do_not_count_attempts() {
    let harness = TestHarness::new();
    let id = harness.create_completed(CreateSubmissionRequest {
        cosign: Some(CosignRequirement::required()),
        ..email_backend()
    });

    for _ in 0..3 {
        harness.complete_and_wait(&id).await;
    }

    let submission = harness.get(&id);
    assert_eq!(submission.registration_status, RegistrationStatus::NotStarted);
    assert_eq!(submission.registration_attempts, 0);
    assert_eq!(harness.plugin.register_calls().await, 0);

    harness.store.record_cosign(&id, Utc::now()).unwrap();
    harness
        .scheduler
        .schedule_registration(&id, PostSubmissionEvent::OnCompletion);
    assert!(harness.scheduler.wait_idle(IDLE).await);

    let submission = harness.get(&id);
    assert_eq!(submission.registration_status, RegistrationStatus::Success);
    assert_eq!(submission.registration_attempts, 1);
}

#[tokio::test]
async fn test_attempts_increase_by_one_per_executed_attempt() {
    let harness = TestHarness::new();
    let id = harness.create_completed(email_backend());
    harness
        .plugin
        .set_next_error(RegistrationError::Failed("mail server down".to_string()))
        .await;
    harness
        .plugin
        .set_next_error(RegistrationError::Unexpected("timeout".to_string()))
        .await;

    harness.complete_and_wait(&id).await;
    assert_eq!(harness.get(&id).registration_attempts, 1);

    harness
        .scheduler
        .schedule_registration(&id, PostSubmissionEvent::OnRetry);
    assert!(harness.scheduler.wait_idle(IDLE).await);
    assert_eq!(harness.get(&id).registration_attempts, 2);

    harness
        .scheduler
        .schedule_registration(&id, PostSubmissionEvent::OnRetry);
    assert!(harness.scheduler.wait_idle(IDLE).await);
    let submission = harness.get(&id);
    assert_eq!(submission.registration_attempts, 3);
    assert_eq!(submission.registration_status, RegistrationStatus::Success);
}

#[tokio::test]
async fn test_cosign_gate_wins_over_payment_gate() {
    let harness = TestHarness::new();
    let id = harness.create_completed(CreateSubmissionRequest {
        cosign: Some(CosignRequirement::required()),
        payment: PaymentState::required(),
        ..email_backend()
    });
    let registrar = harness.scheduler.registrar();
    registrar
        .pre_register(&id, PostSubmissionEvent::OnCompletion, RetryPolicy::Swallow)
        .await
        .unwrap();

    let outcome = registrar
        .register(&id, PostSubmissionEvent::OnCompletion, RetryPolicy::Swallow)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        AttemptOutcome::Skipped {
            verdict: GateVerdict::SkipWaitingOnCosign
        }
    );
}

#[tokio::test]
async fn test_attempt_limit_is_enforced() {
    let harness = TestHarness::new();
    let id = harness.create_completed(email_backend());
    for _ in 0..3 {
        harness
            .plugin
            .set_next_error(RegistrationError::Failed("rejected".to_string()))
            .await;
    }

    harness.complete_and_wait(&id).await;
    for _ in 0..2 {
        harness
            .scheduler
            .schedule_registration(&id, PostSubmissionEvent::OnRetry);
        assert!(harness.scheduler.wait_idle(IDLE).await);
    }
    assert_eq!(harness.plugin.register_calls().await, 3);

    let outcome = harness
        .scheduler
        .registrar()
        .register(&id, PostSubmissionEvent::OnRetry, RetryPolicy::Swallow)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        AttemptOutcome::Skipped {
            verdict: GateVerdict::SkipAttemptLimitExceeded
        }
    );
    assert_eq!(harness.plugin.register_calls().await, 3);
    assert_eq!(harness.get(&id).registration_attempts, 3);

    // The sweep leaves it alone as well.
    assert_eq!(harness.scheduler.sweep().await, 0);
}

#[tokio::test]
async fn test_unsatisfied_cosign_never_reaches_plugin() {
    let harness = TestHarness::new();
    let id = harness.create_completed(CreateSubmissionRequest {
        cosign: Some(CosignRequirement::required()),
        ..email_backend()
    });

    harness.complete_and_wait(&id).await;

    let submission = harness.get(&id);
    assert_eq!(submission.registration_status, RegistrationStatus::NotStarted);
    assert!(submission.pre_registration_completed);
    assert_eq!(harness.plugin.register_calls().await, 0);
}

#[tokio::test]
async fn test_manual_retry_after_failure() {
    let harness = TestHarness::new();
    let id = harness.create_completed(email_backend());
    harness
        .plugin
        .set_next_error(RegistrationError::Failed("zaak type unknown".to_string()))
        .await;

    harness.complete_and_wait(&id).await;
    let failed = harness.get(&id);
    assert_eq!(failed.registration_status, RegistrationStatus::Failed);
    assert!(failed.registration_result.has_failure());

    let outcome = harness.scheduler.retry_now(&id, "support").await.unwrap();

    assert!(outcome.is_success());
    let submission = harness.get(&id);
    assert_eq!(submission.registration_attempts, 2);
    assert_eq!(submission.registration_status, RegistrationStatus::Success);
    assert!(submission.registration_result.failure_trace.is_none());
}

#[tokio::test]
async fn test_payment_wait_then_payment_event() {
    let harness = TestHarness::new();
    let id = harness.create_completed(CreateSubmissionRequest {
        payment: PaymentState::required(),
        ..email_backend()
    });

    harness.complete_and_wait(&id).await;
    assert_eq!(
        harness.get(&id).registration_status,
        RegistrationStatus::NotStarted
    );

    harness.store.record_payment(&id).unwrap();
    harness
        .scheduler
        .schedule_registration(&id, PostSubmissionEvent::OnPaymentComplete);
    assert!(harness.scheduler.wait_idle(IDLE).await);

    let submission = harness.get(&id);
    assert_eq!(submission.registration_status, RegistrationStatus::Success);
    assert!(submission.payment.registered);
}

#[tokio::test]
async fn test_concurrent_retries_run_once() {
    let harness = TestHarness::new();
    harness.plugin.set_delay(Duration::from_millis(100)).await;
    let id = harness.create_completed(email_backend());
    harness
        .scheduler
        .registrar()
        .pre_register(&id, PostSubmissionEvent::OnCompletion, RetryPolicy::Swallow)
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        harness.scheduler.retry_now(&id, "a"),
        harness.scheduler.retry_now(&id, "b"),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(TriggerError::AlreadyInFlight(_)))));
    assert_eq!(harness.plugin.register_calls().await, 1);
    assert_eq!(harness.get(&id).registration_attempts, 1);
}

#[tokio::test]
async fn test_state_survives_reopening_the_database() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("registrar.db");

    let id = {
        let store = SqliteSubmissionStore::new(&db_path).unwrap();
        let id = store.create(email_backend()).unwrap().id;
        store.mark_completed(&id, Utc::now()).unwrap();
        id
    };

    let store = Arc::new(SqliteSubmissionStore::new(&db_path).unwrap());
    let registry = PluginRegistry::builder()
        .register(Arc::new(MockRegistrationPlugin::new("email")))
        .unwrap()
        .build(&Default::default());
    let registrar = Registrar::new(store.clone(), Arc::new(registry), RegistrationConfig::default());

    let outcome = registrar
        .process_submission(&id, PostSubmissionEvent::OnCompletion, RetryPolicy::Surface)
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(
        store.get(&id).unwrap().unwrap().registration_status,
        RegistrationStatus::Success
    );
}

#[tokio::test]
async fn test_finished_plugin_steps_are_not_repeated_on_retry() {
    let harness = TestHarness::new();
    let id = harness.create_completed(CreateSubmissionRequest {
        form_name: "Melding openbare ruimte".to_string(),
        registration_backend: Some(RegistrationBackendConfig::new("zaak", json!({}))),
        ..Default::default()
    });
    let registrar = harness.scheduler.registrar();
    registrar
        .pre_register(&id, PostSubmissionEvent::OnCompletion, RetryPolicy::Swallow)
        .await
        .unwrap();

    let first = registrar
        .register(&id, PostSubmissionEvent::OnCompletion, RetryPolicy::Swallow)
        .await
        .unwrap();
    assert!(matches!(first, AttemptOutcome::Failed { .. }));

    let failed = harness.get(&id);
    assert_eq!(failed.registration_status, RegistrationStatus::Failed);
    assert!(failed.registration_result.has_failure());
    let document_url = failed.registration_result.plugin_payload["document"]["url"].clone();
    assert!(document_url.is_string());

    let second = registrar
        .register(&id, PostSubmissionEvent::OnRetry, RetryPolicy::Swallow)
        .await
        .unwrap();
    assert!(second.is_success());

    assert_eq!(harness.cases.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(harness.cases.case_calls.load(Ordering::SeqCst), 2);

    let submission = harness.get(&id);
    let payload = &submission.registration_result.plugin_payload;
    assert_eq!(payload["document"]["url"], document_url);
    assert_eq!(payload["case"]["document"], document_url);
    assert_eq!(payload["case_document"], document_url);
    assert_eq!(submission.registration_attempts, 2);
}

#[tokio::test]
async fn test_payment_arriving_mid_job_is_registered() {
    let harness = TestHarness::new();
    harness.plugin.set_delay(Duration::from_millis(150)).await;
    let id = harness.create_completed(CreateSubmissionRequest {
        payment: PaymentState::required(),
        ..email_backend()
    });

    assert_eq!(
        harness
            .scheduler
            .schedule_post_submission(&id, PostSubmissionEvent::OnCompletion),
        ScheduleOutcome::Enqueued
    );
    harness.store.record_payment(&id).unwrap();
    assert_eq!(
        harness
            .scheduler
            .schedule_registration(&id, PostSubmissionEvent::OnPaymentComplete),
        ScheduleOutcome::AlreadyInFlight
    );
    assert_eq!(
        harness
            .scheduler
            .schedule_registration(&id, PostSubmissionEvent::OnCompletion),
        ScheduleOutcome::AlreadyInFlight
    );
    assert!(harness.scheduler.wait_idle(IDLE).await);

    let submission = harness.get(&id);
    assert_eq!(submission.registration_status, RegistrationStatus::Success);
    assert_eq!(submission.registration_attempts, 1);
    assert!(submission.payment.registered);
}
