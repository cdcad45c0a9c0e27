//! API error types and handling
//!
//! Every failure leaves the server as
//! `{ "success": false, "error": { "code", "message", "fields"? }, "requestId" }`.
//! Provider and database text is logged, never returned.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dolo_billing::BillingError;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

/// Message shown for any failure the caller cannot fix
pub const GENERIC_ERROR_MESSAGE: &str =
    "Something went wrong, please try again or contact support";

/// Per-request correlation id, taken from `x-request-id` when a proxy set one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(|v| RequestId(v.to_string()))
            .unwrap_or_default())
    }
}

/// One invalid input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Content-Type must be application/json")]
    UnsupportedContentType,

    // Access
    #[error("Invalid or expired access token")]
    InvalidToken,
    #[error("Resource not found")]
    NotFound,

    // Payments
    #[error("Payment provider error: {0}")]
    PaymentProvider(String),
    #[error("Checkout session could not be created: {0}")]
    CheckoutCreation(String),

    // Internal errors
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl ApiError {
    /// Field-level validation failure; the first field names the message
    pub fn invalid_fields(fields: Vec<FieldError>) -> Self {
        let message = match fields.as_slice() {
            [only] => only.message.clone(),
            _ => "Please correct the highlighted fields".to_string(),
        };
        ApiError::Validation { message, fields }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. }
            | ApiError::BadRequest(_)
            | ApiError::UnsupportedContentType
            | ApiError::PaymentProvider(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::CheckoutCreation(_)
            | ApiError::Configuration(_)
            | ApiError::Database(_)
            | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::UnsupportedContentType => "UNSUPPORTED_CONTENT_TYPE",
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::PaymentProvider(_) => "PAYMENT_PROVIDER_ERROR",
            ApiError::CheckoutCreation(_) => "CHECKOUT_ERROR",
            ApiError::Configuration(_) => "CONFIGURATION_ERROR",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::Internal => "INTERNAL_ERROR",
            ApiError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Text safe to show the visitor
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Validation { message, .. } => message.clone(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::UnsupportedContentType | ApiError::InvalidToken | ApiError::NotFound => {
                self.to_string()
            }
            ApiError::ServiceUnavailable => {
                "Payments are temporarily unavailable, please try again later".to_string()
            }
            ApiError::PaymentProvider(_)
            | ApiError::CheckoutCreation(_)
            | ApiError::Configuration(_)
            | ApiError::Database(_)
            | ApiError::Internal => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    /// Attach the request id the response will carry
    pub fn at(self, request_id: &RequestId) -> ErrorResponse {
        ErrorResponse {
            error: self,
            request_id: request_id.clone(),
        }
    }
}

/// An [`ApiError`] bound to the request that produced it
#[derive(Debug)]
pub struct ErrorResponse {
    pub error: ApiError,
    pub request_id: RequestId,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status.is_server_error() {
            tracing::error!(
                request_id = %self.request_id,
                code = self.error.code(),
                error = %self.error,
                "Request failed"
            );
        } else {
            tracing::debug!(
                request_id = %self.request_id,
                code = self.error.code(),
                error = %self.error,
                "Request rejected"
            );
        }

        let mut error = json!({
            "code": self.error.code(),
            "message": self.error.public_message(),
        });
        if let ApiError::Validation { fields, .. } = &self.error {
            if !fields.is_empty() {
                error["fields"] = json!(fields);
            }
        }

        let body = Json(json!({
            "success": false,
            "error": error,
            "requestId": self.request_id.as_str(),
        }));

        (status, body).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.at(&RequestId::new()).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidInput(msg) => ApiError::Validation {
                message: msg,
                fields: Vec::new(),
            },
            BillingError::StripeApi(msg) => {
                tracing::warn!(error = %msg, "Payment provider rejected request");
                ApiError::PaymentProvider(msg)
            }
            BillingError::Config(msg) => ApiError::Configuration(msg),
            BillingError::CheckoutCreation(msg) => ApiError::CheckoutCreation(msg),
            BillingError::NotFound(_) => ApiError::NotFound,
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("Invalid webhook signature".to_string())
            }
            BillingError::WebhookPayloadInvalid(msg) => ApiError::BadRequest(msg),
            other => {
                tracing::error!(error = %other, "Unexpected billing error");
                ApiError::Internal
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            _ => ApiError::Database(err.to_string()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ErrorResponse>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_error_lists_fields() {
        let request_id = RequestId("req-1".to_string());
        let err = ApiError::invalid_fields(vec![FieldError::new(
            "message",
            "Message must be at least 10 characters",
        )]);

        let response = err.at(&request_id).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["requestId"], "req-1");
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["fields"][0]["field"], "message");
        assert_eq!(
            body["error"]["message"],
            "Message must be at least 10 characters"
        );
    }

    #[tokio::test]
    async fn test_provider_text_is_not_exposed() {
        let err = ApiError::from(BillingError::StripeApi(
            "No such customer: cus_secret".to_string(),
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "PAYMENT_PROVIDER_ERROR");
        assert_eq!(body["error"]["message"], GENERIC_ERROR_MESSAGE);
        assert!(!body.to_string().contains("cus_secret"));
        assert!(body["requestId"].as_str().is_some());
    }

    #[test]
    fn test_billing_error_statuses() {
        let cases = [
            (BillingError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (BillingError::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                BillingError::CheckoutCreation("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (BillingError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (BillingError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
