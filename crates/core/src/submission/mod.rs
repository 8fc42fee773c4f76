//! Submissions and their registration bookkeeping.

mod reference;
mod sqlite_store;
mod store;
mod types;

pub use reference::{random_reference, unique_reference, REFERENCE_PREFIX};
pub use sqlite_store::SqliteSubmissionStore;
pub use store::{
    CreateSubmissionRequest, PreRegistrationUpdate, SubmissionError, SubmissionFilter,
    SubmissionStore,
};
pub use types::{
    CosignRequirement, PaymentState, RegistrationBackendConfig, RegistrationResultRecord,
    RegistrationStatus, ResultUpdate, Submission,
};
