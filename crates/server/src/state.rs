use std::sync::Arc;

use registrar_core::{
    AuditHandle, AuditStore, Config, PluginRegistry, RegistrationScheduler, SanitizedConfig,
    SubmissionStore,
};

/// Shared application state
pub struct AppState {
    config: Config,
    audit: AuditHandle,
    audit_store: Arc<dyn AuditStore>,
    submission_store: Arc<dyn SubmissionStore>,
    registry: Arc<PluginRegistry>,
    scheduler: Arc<RegistrationScheduler>,
}

impl AppState {
    pub fn new(
        config: Config,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
        submission_store: Arc<dyn SubmissionStore>,
        registry: Arc<PluginRegistry>,
        scheduler: Arc<RegistrationScheduler>,
    ) -> Self {
        Self {
            config,
            audit,
            audit_store,
            submission_store,
            registry,
            scheduler,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn audit(&self) -> &AuditHandle {
        &self.audit
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn submission_store(&self) -> &dyn SubmissionStore {
        self.submission_store.as_ref()
    }

    pub fn registry(&self) -> &PluginRegistry {
        self.registry.as_ref()
    }

    pub fn scheduler(&self) -> &RegistrationScheduler {
        self.scheduler.as_ref()
    }
}
