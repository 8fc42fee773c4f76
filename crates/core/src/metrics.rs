//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Pre-registration and registration attempts
//! - Gate skips
//! - The retry sweep

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Registration
// =============================================================================

/// Registration attempts by plugin and result.
pub static REGISTRATION_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "registrar_registration_attempts_total",
            "Total registration attempts",
        ),
        &["plugin", "result"], // result: "success", "no_backend", or a failure kind
    )
    .unwrap()
});

/// Plugin call duration in seconds.
pub static REGISTRATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "registrar_registration_duration_seconds",
            "Duration of registration plugin calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["plugin"],
    )
    .unwrap()
});

/// Attempts that stopped at a gate, by verdict.
pub static REGISTRATION_SKIPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "registrar_registration_skips_total",
            "Registration triggers that did not start an attempt",
        ),
        &["reason"],
    )
    .unwrap()
});

/// Pre-registrations by result.
pub static PRE_REGISTRATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "registrar_pre_registrations_total",
            "Total pre-registrations",
        ),
        &["result"], // "plugin_reference", "fallback_reference", "failed"
    )
    .unwrap()
});

// =============================================================================
// Scheduler
// =============================================================================

/// Jobs currently running or waiting for a worker.
pub static JOBS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "registrar_jobs_in_flight",
        "Scheduled jobs currently in flight",
    )
    .unwrap()
});

/// Schedule requests dropped because the same job was in flight.
pub static JOBS_DEDUPLICATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "registrar_jobs_deduplicated_total",
        "Schedule requests ignored because the job was already in flight",
    )
    .unwrap()
});

/// Completed retry sweeps.
pub static SWEEP_RUNS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("registrar_sweep_runs_total", "Total retry sweeps").unwrap()
});

/// Submissions re-scheduled by a sweep.
pub static SWEEP_RESCHEDULED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "registrar_sweep_rescheduled_total",
        "Submissions re-scheduled by the retry sweep",
    )
    .unwrap()
});

/// All metrics defined here, for registration with a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(REGISTRATION_ATTEMPTS.clone()),
        Box::new(REGISTRATION_DURATION.clone()),
        Box::new(REGISTRATION_SKIPS.clone()),
        Box::new(PRE_REGISTRATIONS.clone()),
        Box::new(JOBS_IN_FLIGHT.clone()),
        Box::new(JOBS_DEDUPLICATED.clone()),
        Box::new(SWEEP_RUNS.clone()),
        Box::new(SWEEP_RESCHEDULED.clone()),
    ]
}
