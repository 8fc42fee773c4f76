use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Event types that mean a submission did not get registered this time.
pub const PROBLEM_EVENT_TYPES: &[&str] = &[
    "pre_registration_failed",
    "registration_failed",
    "registration_skipped",
];

/// Most events a single submission timeline returns.
pub const TIMELINE_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuditOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Which audit records to return.
///
/// Every set field narrows the result. `event_types` matches any of the
/// listed types; an empty list matches all of them.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub submission_id: Option<String>,
    pub event_types: Vec<String>,
    pub plugin: Option<String>,
    /// Failure kind or skip reason.
    pub outcome: Option<String>,
    pub actor: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub order: AuditOrder,
    pub limit: i64,
    pub offset: i64,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    /// Everything recorded for one submission, oldest first.
    pub fn timeline(submission_id: impl Into<String>) -> Self {
        Self {
            submission_id: Some(submission_id.into()),
            order: AuditOrder::OldestFirst,
            limit: TIMELINE_LIMIT,
            ..Default::default()
        }
    }

    pub fn with_submission_id(mut self, submission_id: impl Into<String>) -> Self {
        self.submission_id = Some(submission_id.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    /// Only failed and skipped attempts.
    pub fn problems_only(mut self) -> Self {
        self.event_types = PROBLEM_EVENT_TYPES.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_time_range(
        mut self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.since = since;
        self.until = until;
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

/// Trait for audit event storage
pub trait AuditStore: Send + Sync {
    /// Insert an audit record, returns the assigned ID
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    /// Query audit records in the filter's order
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Count matching audit records
    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;

    /// Matching records per outcome, ignoring records without one.
    ///
    /// Paging fields of the filter are ignored.
    fn outcome_counts(&self, filter: &AuditFilter) -> Result<BTreeMap<String, i64>, AuditError>;

    /// Everything recorded for one submission, oldest first.
    fn timeline(&self, submission_id: &str) -> Result<Vec<AuditRecord>, AuditError> {
        self.query(&AuditFilter::timeline(submission_id))
    }
}
