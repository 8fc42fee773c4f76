//! Registration scheduler.
//!
//! Decides when the registrar runs:
//! - **Triggers**: completion, co-sign and payment events enqueue jobs that
//!   are deduplicated per submission while in flight
//! - **Manual retry**: runs inline and reports failures to the operator
//! - **Sweep**: periodically re-schedules failed submissions that are still
//!   under the attempt limit

mod config;
mod runner;
mod types;

pub use config::SchedulerConfig;
pub use runner::RegistrationScheduler;
pub use types::{JobKind, ScheduleOutcome, SchedulerStatus, TriggerError};
