//! Error types for Dolo

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharedError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Table does not exist: {0}")]
    MissingTable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for SharedError {
    fn from(err: sqlx::Error) -> Self {
        if crate::db::sqlstate(&err).as_deref() == Some(crate::db::UNDEFINED_TABLE) {
            return SharedError::MissingTable(err.to_string());
        }
        SharedError::Database(err.to_string())
    }
}

/// Markers of client-side (4xx-class) failures that retrying cannot fix
const NON_RETRYABLE_MARKERS: &[&str] = &["validation", "invalid", "unauthorized", "4xx"];

/// Decide whether an error message describes a transient failure.
///
/// Callers that retry with backoff must stop on 4xx-class messages: anything
/// mentioning validation, invalid input, authorization, or a 4xx status code.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    if NON_RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }
    !contains_4xx_status(&lower)
}

fn contains_4xx_status(message: &str) -> bool {
    let bytes = message.as_bytes();
    bytes.windows(3).enumerate().any(|(i, w)| {
        let boundary_before = i == 0 || !bytes[i - 1].is_ascii_digit();
        let boundary_after = bytes.get(i + 3).map_or(true, |b| !b.is_ascii_digit());
        w[0] == b'4' && w[1].is_ascii_digit() && w[2].is_ascii_digit() && boundary_before && boundary_after
    })
}
