//! Field checks shared by the public form endpoints

use axum::http::{header, HeaderMap};
use dolo_shared::{is_valid_email, MAX_EMAIL_LEN};
use serde::de::DeserializeOwned;

use crate::error::{ApiError, FieldError};

/// Reject anything that is not declared as JSON before touching the body
pub fn require_json(headers: &HeaderMap) -> Result<(), ApiError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false);
    if is_json {
        Ok(())
    } else {
        Err(ApiError::UnsupportedContentType)
    }
}

/// Decode a JSON body after the content type check
pub fn parse_json<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8]) -> Result<T, ApiError> {
    require_json(headers)?;
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// Collects every failing field before answering
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

fn label(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(&mut self, field: &str, message: String) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Required text, `min..=max` characters after trimming
    pub fn text(&mut self, field: &str, value: &str, min: usize, max: usize) -> &mut Self {
        let len = value.trim().chars().count();
        if len == 0 && min > 0 {
            self.fail(field, format!("{} is required", label(field)));
        } else if len < min {
            self.fail(
                field,
                format!("{} must be at least {} characters", label(field), min),
            );
        } else if len > max {
            self.fail(
                field,
                format!("{} must be at most {} characters", label(field), max),
            );
        }
        self
    }

    /// Optional text; only the upper bound applies
    pub fn optional_text(&mut self, field: &str, value: Option<&str>, max: usize) -> &mut Self {
        if let Some(value) = value {
            if value.trim().chars().count() > max {
                self.fail(
                    field,
                    format!("{} must be at most {} characters", label(field), max),
                );
            }
        }
        self
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        let value = value.trim();
        if value.is_empty() {
            self.fail(field, format!("{} is required", label(field)));
        } else if value.len() > MAX_EMAIL_LEN {
            self.fail(
                field,
                format!("{} must be at most {} characters", label(field), MAX_EMAIL_LEN),
            );
        } else if !is_valid_email(value) {
            self.fail(field, "Please enter a valid email address".to_string());
        }
        self
    }

    pub fn optional_email(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => self.email(field, v),
            _ => self,
        }
    }

    pub fn finish(&mut self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::invalid_fields(std::mem::take(&mut self.errors)))
        }
    }
}

/// Trimmed copy, `None` when blank
pub fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn fields(err: ApiError) -> Vec<FieldError> {
        match err {
            ApiError::Validation { fields, .. } => fields,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_length_bounds_are_inclusive() {
        assert!(Validator::new().text("name", "Al", 2, 100).finish().is_ok());
        assert!(Validator::new().text("name", "A", 2, 100).finish().is_err());
        assert!(Validator::new()
            .text("name", &"a".repeat(101), 2, 100)
            .finish()
            .is_err());
    }

    #[test]
    fn test_short_message_names_the_field() {
        let err = Validator::new()
            .text("message", "too short", 10, 5000)
            .finish()
            .unwrap_err();
        let fields = fields(err);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field, "message");
        assert_eq!(fields[0].message, "Message must be at least 10 characters");
    }

    #[test]
    fn test_all_failures_are_collected() {
        let err = Validator::new()
            .text("name", "", 2, 100)
            .email("email", "not-an-email")
            .optional_text("company", Some(&"c".repeat(101)), 100)
            .finish()
            .unwrap_err();
        let names: Vec<_> = fields(err).into_iter().map(|f| f.field).collect();
        assert_eq!(names, vec!["name", "email", "company"]);
    }

    #[test]
    fn test_optional_email_skips_blank() {
        assert!(Validator::new().optional_email("email", Some("  ")).finish().is_ok());
        assert!(Validator::new().optional_email("email", None).finish().is_ok());
        assert!(Validator::new().optional_email("email", Some("x@")).finish().is_err());
    }

    #[test]
    fn test_content_type_check() {
        let mut headers = HeaderMap::new();
        assert!(require_json(&headers).is_err());

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(require_json(&headers).is_err());

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(require_json(&headers).is_ok());
    }
}
