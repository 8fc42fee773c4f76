//! Common test utilities for driving the router in-process.
//!
//! The fixture wires real SQLite stores in a temporary directory, a
//! controllable mock registration plugin and the demo plugins, and exposes
//! the axum router for `oneshot` requests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use registrar_core::{
    create_audit_system, testing::MockRegistrationPlugin, AuditStore, Config, DatabaseConfig,
    PluginRegistry, PluginSettings, Registrar, RegistrationConfig, RegistrationScheduler,
    SchedulerConfig, SqliteAuditStore, SqliteSubmissionStore, SubmissionStore,
};
use registrar_server::api::middleware::OPERATOR_HEADER;

/// Identifier of the mock plugin registered by the fixture.
pub const MOCK_PLUGIN: &str = "mock";

/// In-process server with a mock registration plugin.
pub struct TestFixture {
    pub router: Router,
    /// Mock plugin - configure results and inspect calls
    pub plugin: Arc<MockRegistrationPlugin>,
    pub scheduler: Arc<RegistrationScheduler>,
    pub submission_store: Arc<dyn SubmissionStore>,
    /// Temporary directory holding the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub attempt_limit: u32,
    pub wait_for_payment_to_register: bool,
    /// Plugins to register as disabled
    pub disabled_plugins: Vec<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            attempt_limit: 5,
            wait_for_payment_to_register: false,
            disabled_plugins: Vec::new(),
        }
    }
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let plugins: BTreeMap<String, PluginSettings> = test_config
            .disabled_plugins
            .iter()
            .map(|id| (id.clone(), PluginSettings { enabled: false }))
            .collect();

        let config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            registration: RegistrationConfig {
                attempt_limit: test_config.attempt_limit,
                wait_for_payment_to_register: test_config.wait_for_payment_to_register,
            },
            scheduler: SchedulerConfig {
                enabled: false,
                ..Default::default()
            },
            plugins,
            ..Default::default()
        };

        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&db_path).expect("Failed to create audit store"),
        );
        let submission_store: Arc<dyn SubmissionStore> = Arc::new(
            SqliteSubmissionStore::new(&db_path).expect("Failed to create submission store"),
        );

        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let plugin = Arc::new(MockRegistrationPlugin::new(MOCK_PLUGIN));
        let registry = Arc::new(
            PluginRegistry::builder()
                .with_demo_plugins()
                .and_then(|b| b.register(Arc::clone(&plugin) as _))
                .expect("Failed to register plugins")
                .build(&config.plugins),
        );

        let registrar = Arc::new(
            Registrar::new(
                Arc::clone(&submission_store),
                Arc::clone(&registry),
                config.registration.clone(),
            )
            .with_audit(audit_handle.clone()),
        );
        let scheduler = Arc::new(RegistrationScheduler::new(
            config.scheduler.clone(),
            registrar,
            Some(audit_handle.clone()),
        ));

        let state = Arc::new(registrar_server::state::AppState::new(
            config,
            audit_handle,
            audit_store,
            Arc::clone(&submission_store),
            registry,
            Arc::clone(&scheduler),
        ));

        let router = registrar_server::api::create_router(state);

        Self {
            router,
            plugin,
            scheduler,
            submission_store,
            temp_dir,
        }
    }

    /// Create a submission for the given backend and return its ID.
    pub async fn create_submission(&self, backend: Option<&str>, extra: Value) -> String {
        let mut body = json!({ "form_name": "Aanvraag parkeervergunning" });
        if let Some(backend) = backend {
            body["registration_backend"] = json!({ "backend": backend, "options": {} });
        }
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                body.insert(key.clone(), value.clone());
            }
        }

        let response = self.post("/api/v1/submissions", body).await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["id"]
            .as_str()
            .expect("submission id")
            .to_string()
    }

    /// Wait until no job is running, failing the test on timeout.
    pub async fn settle(&self) {
        assert!(
            self.scheduler.wait_idle(Duration::from_secs(5)).await,
            "Scheduler did not become idle"
        );
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), None).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None, None).await
    }

    /// Send a POST request on behalf of an operator.
    pub async fn post_as(&self, path: &str, operator: &str) -> TestResponse {
        self.request("POST", path, None, Some(operator)).await
    }

    /// Send a GET request and return the raw body text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        operator: Option<&str>,
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        if let Some(operator) = operator {
            request_builder = request_builder.header(OPERATOR_HEADER, operator);
        }

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
