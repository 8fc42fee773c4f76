//! Submission API handlers.
//!
//! Intake and lifecycle events from the form flow land here and are handed
//! to the registration scheduler. Only `retry` runs synchronously.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use registrar_core::{
    AttemptFailureKind, AttemptOutcome, AuditEvent, CosignRequirement, CreateSubmissionRequest,
    PaymentState, PostSubmissionEvent, RegistrarError, RegistrationBackendConfig,
    RegistrationStatus, ScheduleOutcome, Submission, SubmissionError, SubmissionFilter,
    TriggerError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::middleware::Operator;
use crate::state::AppState;

/// Maximum allowed limit for submission queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for submission queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a submission
#[derive(Debug, Deserialize)]
pub struct CreateSubmissionBody {
    pub form_name: String,
    /// Plugin and options used to register the submission
    pub registration_backend: Option<RegistrationBackendConfig>,
    /// A second party must co-sign before registration
    #[serde(default)]
    pub cosign_required: bool,
    /// The form requires a payment
    #[serde(default)]
    pub payment_required: bool,
}

/// Query parameters for listing submissions
#[derive(Debug, Deserialize)]
pub struct ListSubmissionsParams {
    /// Filter by registration status
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Response for listing submissions
#[derive(Debug, Serialize)]
pub struct ListSubmissionsResponse {
    pub submissions: Vec<Submission>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Response for lifecycle events that schedule background work
#[derive(Debug, Serialize)]
pub struct ScheduledResponse {
    pub submission: Submission,
    pub scheduled: ScheduleOutcome,
}

/// Response for a manual retry
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    pub submission: Option<Submission>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct SubmissionErrorResponse {
    pub error: String,
    /// Failure class for surfaced registration failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<AttemptFailureKind>,
}

pub(super) type ApiError = (StatusCode, Json<SubmissionErrorResponse>);

pub(super) fn error_response(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(SubmissionErrorResponse {
            error: error.to_string(),
            kind: None,
        }),
    )
}

pub(super) fn store_error(error: SubmissionError) -> ApiError {
    let status = match error {
        SubmissionError::NotFound(_) => StatusCode::NOT_FOUND,
        SubmissionError::InvalidState { .. } => StatusCode::CONFLICT,
        SubmissionError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, error)
}

fn trigger_error(error: TriggerError) -> ApiError {
    match error {
        TriggerError::AlreadyInFlight(_) => error_response(StatusCode::CONFLICT, error),
        TriggerError::Registrar(RegistrarError::Store(e)) => store_error(e),
        TriggerError::Registrar(RegistrarError::Attempt(failure)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(SubmissionErrorResponse {
                error: failure.to_string(),
                kind: Some(failure.kind),
            }),
        ),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new submission
pub async fn create_submission(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSubmissionBody>,
) -> Result<(StatusCode, Json<Submission>), impl IntoResponse> {
    if body.form_name.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "form_name must not be empty",
        ));
    }

    let request = CreateSubmissionRequest {
        form_name: body.form_name,
        registration_backend: body.registration_backend,
        cosign: body.cosign_required.then(CosignRequirement::required),
        payment: if body.payment_required {
            PaymentState::required()
        } else {
            PaymentState::default()
        },
    };

    match state.submission_store().create(request) {
        Ok(submission) => {
            state.audit().try_emit(AuditEvent::SubmissionCreated {
                submission_id: submission.id.clone(),
                form_name: submission.form_name.clone(),
                backend: submission
                    .configured_backend()
                    .map(|b| b.backend.clone()),
            });

            Ok((StatusCode::CREATED, Json(submission)))
        }
        Err(e) => Err(store_error(e)),
    }
}

/// Get a submission by ID
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Submission>, impl IntoResponse> {
    match state.submission_store().get(&id) {
        Ok(Some(submission)) => Ok(Json(submission)),
        Ok(None) => Err(store_error(SubmissionError::NotFound(id))),
        Err(e) => Err(store_error(e)),
    }
}

/// List submissions with optional filters
pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListSubmissionsParams>,
) -> Result<Json<ListSubmissionsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = SubmissionFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref status) = params.status {
        match RegistrationStatus::parse(status) {
            Some(status) => filter = filter.with_status(status),
            None => {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown registration status: {}", status),
                ));
            }
        }
    }

    let submissions = state.submission_store().list(&filter).map_err(store_error)?;

    // Total ignores pagination
    let count_filter = SubmissionFilter {
        limit: i64::MAX,
        offset: 0,
        ..filter.clone()
    };
    let total = state
        .submission_store()
        .count(&count_filter)
        .map_err(store_error)?;

    Ok(Json(ListSubmissionsResponse {
        submissions,
        total,
        limit,
        offset,
    }))
}

/// The user finished the form: pre-register and register in the background.
pub async fn complete_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ScheduledResponse>), ApiError> {
    let submission = state
        .submission_store()
        .mark_completed(&id, Utc::now())
        .map_err(store_error)?;

    state.audit().try_emit(AuditEvent::SubmissionCompleted {
        submission_id: id.clone(),
    });

    let scheduled = state
        .scheduler()
        .schedule_post_submission(&id, PostSubmissionEvent::OnCompletion);
    info!(submission_id = %id, ?scheduled, "Submission completed");

    Ok((
        StatusCode::ACCEPTED,
        Json(ScheduledResponse {
            submission,
            scheduled,
        }),
    ))
}

/// The co-signer signed: registration may proceed.
pub async fn cosign_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ScheduledResponse>), ApiError> {
    let submission = state
        .submission_store()
        .record_cosign(&id, Utc::now())
        .map_err(store_error)?;

    let scheduled = state
        .scheduler()
        .schedule_registration(&id, PostSubmissionEvent::OnCompletion);
    info!(submission_id = %id, ?scheduled, "Co-sign recorded");

    Ok((
        StatusCode::ACCEPTED,
        Json(ScheduledResponse {
            submission,
            scheduled,
        }),
    ))
}

/// The payment provider confirmed the payment.
pub async fn record_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ScheduledResponse>), ApiError> {
    let submission = state
        .submission_store()
        .record_payment(&id)
        .map_err(store_error)?;

    let scheduled = state
        .scheduler()
        .schedule_registration(&id, PostSubmissionEvent::OnPaymentComplete);
    info!(submission_id = %id, ?scheduled, "Payment recorded");

    Ok((
        StatusCode::ACCEPTED,
        Json(ScheduledResponse {
            submission,
            scheduled,
        }),
    ))
}

/// Retry a submission now and report the outcome.
pub async fn retry_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Operator(operator): Operator,
) -> Result<Json<RetryResponse>, ApiError> {
    let outcome = state
        .scheduler()
        .retry_now(&id, &operator)
        .await
        .map_err(trigger_error)?;

    let submission = state.submission_store().get(&id).map_err(store_error)?;

    Ok(Json(RetryResponse {
        outcome,
        submission,
    }))
}
