pub mod audit;
pub mod config;
pub mod gating;
pub mod metrics;
pub mod registration;
pub mod registry;
pub mod scheduler;
pub mod submission;
pub mod testing;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditEventEnvelope, AuditFilter, AuditHandle,
    AuditOrder, AuditRecord, AuditStore, AuditWriter, SkipReason, SqliteAuditStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    PluginSettings, RegistrationConfig, SanitizedConfig, ServerConfig,
};
pub use gating::{
    evaluate_pre_registration, evaluate_registration, GateVerdict, PreRegistrationVerdict,
};
pub use registration::{
    AttemptFailure, AttemptFailureKind, AttemptOutcome, PostSubmissionEvent,
    PreRegistrationOutcome, RegistrarError, Registrar, RetryPolicy,
};
pub use registry::{
    execute_unless_result_exists, PluginCheck, PluginRegistry, RegistrationError,
    RegistrationPlugin, RegistrationResult, ResultMemo,
};
pub use scheduler::{
    RegistrationScheduler, ScheduleOutcome, SchedulerConfig, SchedulerStatus, TriggerError,
};
pub use submission::{
    CosignRequirement, CreateSubmissionRequest, PaymentState, RegistrationBackendConfig,
    RegistrationStatus, SqliteSubmissionStore, Submission, SubmissionError, SubmissionFilter,
    SubmissionStore,
};
