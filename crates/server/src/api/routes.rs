use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{audit, handlers, middleware::metrics_middleware, submissions};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Plugins and scheduler
        .route("/plugins", get(handlers::list_plugins))
        .route("/scheduler/status", get(handlers::scheduler_status))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Submissions
        .route("/submissions", post(submissions::create_submission))
        .route("/submissions", get(submissions::list_submissions))
        .route("/submissions/{id}", get(submissions::get_submission))
        .route("/submissions/{id}/complete", post(submissions::complete_submission))
        .route("/submissions/{id}/cosign", post(submissions::cosign_submission))
        .route("/submissions/{id}/payment", post(submissions::record_payment))
        .route("/submissions/{id}/retry", post(submissions::retry_submission))
        .route("/submissions/{id}/audit", get(audit::submission_timeline));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
