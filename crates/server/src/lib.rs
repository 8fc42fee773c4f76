//! HTTP surface of the registrar: submission intake, lifecycle triggers,
//! operator retries, audit queries and Prometheus metrics.

pub mod api;
pub mod metrics;
pub mod state;
