//! Audit API: search across registration events and per-submission history.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use registrar_core::{AuditError, AuditFilter, AuditRecord, RegistrationStatus, SubmissionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::submissions::{error_response, store_error, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for audit queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for audit queries
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for the audit search
#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    pub submission_id: Option<String>,
    /// One event type, or several separated by commas
    pub event_type: Option<String>,
    /// Registration backend involved in the event
    pub plugin: Option<String>,
    /// Failure kind (`invalid_options`, ...) or skip reason (`payment_pending`, ...)
    pub outcome: Option<String>,
    /// Only failed and skipped attempts
    #[serde(default)]
    pub problems: bool,
    /// Operator who requested a retry
    pub actor: Option<String>,
    /// Events at or after this timestamp (ISO 8601)
    pub since: Option<DateTime<Utc>>,
    /// Events at or before this timestamp (ISO 8601)
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of events to return (default 100, max 1000)
    pub limit: Option<i64>,
    /// Pagination offset (default 0)
    pub offset: Option<i64>,
}

impl AuditQueryParams {
    fn filter(&self) -> AuditFilter {
        let mut filter = AuditFilter::new().with_time_range(self.since, self.until);

        if self.problems {
            filter = filter.problems_only();
        }
        for event_type in self
            .event_type
            .iter()
            .flat_map(|types| types.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            filter = filter.with_event_type(event_type);
        }
        if let Some(ref submission_id) = self.submission_id {
            filter = filter.with_submission_id(submission_id);
        }
        if let Some(ref plugin) = self.plugin {
            filter = filter.with_plugin(plugin);
        }
        if let Some(ref outcome) = self.outcome {
            filter = filter.with_outcome(outcome);
        }
        if let Some(ref actor) = self.actor {
            filter = filter.with_actor(actor);
        }

        filter
            .with_limit(self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT))
            .with_offset(self.offset.unwrap_or(0).max(0))
    }
}

/// Response for the audit search
#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Total number of matching events
    pub total: i64,
    /// Matching events per failure kind or skip reason
    pub outcomes: BTreeMap<String, i64>,
    pub limit: i64,
    pub offset: i64,
}

/// Everything recorded for one submission, oldest first
#[derive(Debug, Serialize)]
pub struct SubmissionTimeline {
    pub submission_id: String,
    pub registration_status: RegistrationStatus,
    pub registration_attempts: u32,
    pub events: Vec<AuditRecord>,
    pub outcomes: BTreeMap<String, i64>,
}

fn audit_error(error: AuditError) -> ApiError {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to read audit events: {}", error),
    )
}

/// Search audit events
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, ApiError> {
    let filter = params.filter();
    let store = state.audit_store();

    let events = store.query(&filter).map_err(audit_error)?;
    let total = store.count(&filter).map_err(audit_error)?;
    let outcomes = store.outcome_counts(&filter).map_err(audit_error)?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        outcomes,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

/// History of one submission's registration
pub async fn submission_timeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SubmissionTimeline>, ApiError> {
    let submission = state
        .submission_store()
        .get(&id)
        .map_err(store_error)?
        .ok_or_else(|| store_error(SubmissionError::NotFound(id.clone())))?;

    let store = state.audit_store();
    let events = store.timeline(&id).map_err(audit_error)?;
    let outcomes = store
        .outcome_counts(&AuditFilter::timeline(&id))
        .map_err(audit_error)?;

    Ok(Json(SubmissionTimeline {
        submission_id: submission.id,
        registration_status: submission.registration_status,
        registration_attempts: submission.registration_attempts,
        events,
        outcomes,
    }))
}
