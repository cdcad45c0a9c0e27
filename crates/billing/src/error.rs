//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook payload invalid: {0}")]
    WebhookPayloadInvalid(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkout session could not be created: {0}")]
    CheckoutCreation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Email delivery failed: {0}")]
    EmailDelivery(String),

    #[error("Unknown email template: {0}")]
    UnknownTemplate(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether the caller can fix the request and try again
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidInput(_)
                | BillingError::StripeApi(_)
                | BillingError::WebhookSignatureInvalid
                | BillingError::WebhookPayloadInvalid(_)
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<askama::Error> for BillingError {
    fn from(err: askama::Error) -> Self {
        BillingError::Template(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<dolo_shared::SharedError> for BillingError {
    fn from(err: dolo_shared::SharedError) -> Self {
        match err {
            dolo_shared::SharedError::Validation(msg) => BillingError::InvalidInput(msg),
            other => BillingError::Database(other.to_string()),
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
