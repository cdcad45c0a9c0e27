//! Dolo Shared Types and Utilities
//!
//! Domain records, database helpers and the submission store shared by the
//! billing pipeline and the HTTP API.

pub mod db;
pub mod error;
pub mod submissions;
pub mod types;
pub mod validation;

pub use db::*;
pub use error::*;
pub use submissions::{
    ContactSubmission, FallbackSink, GenericSubmission, PgGenericSink, PgSpecializedSink,
    PrivateBuildApplication, QuizResult, StartIntake, Submission, SubmissionKind, SubmissionSink,
    SubmitOutcome, UnavailableSink,
};
pub use types::*;
pub use validation::{is_valid_email, MAX_EMAIL_LEN};
