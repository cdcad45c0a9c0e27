//! Transactional email delivery
//!
//! Sends rendered templates via the Resend API. Delivery is always
//! best-effort for callers: [`Notifier::send_template`] reports success as a
//! bool and never propagates an error, and every attempt is written to the
//! email log (itself best-effort).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dolo_shared::{EmailLogEntry, EmailStatus};
use serde::Deserialize;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::templates::{self, Branding, TemplateId};

const RESEND_API_URL: &str = "https://api.resend.com";

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Support email
    pub support_email: String,
    /// Receives contact and private-build notifications
    pub admin_email: Option<String>,
    /// Public site URL used in links
    pub public_url: String,
    /// Resend API base URL
    pub api_base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Dolo <hello@dolo.studio>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Dolo".to_string()),
            support_email: std::env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@dolo.studio".to_string()),
            admin_email: std::env::var("ADMIN_EMAIL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            public_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "https://dolo.studio".to_string()),
            api_base_url: std::env::var("RESEND_API_URL")
                .unwrap_or_else(|_| RESEND_API_URL.to_string()),
            timeout: Duration::from_secs(15),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }

    pub fn branding(&self) -> Branding {
        Branding {
            app_name: self.app_name.clone(),
            support_email: self.support_email.clone(),
            public_url: self.public_url.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email provider not configured")]
    NotConfigured,

    #[error("Email provider rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Email provider unavailable: {0}")]
    Transient(String),
}

impl EmailError {
    /// Network failures, timeouts, 5xx and 429 are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, EmailError::Transient(_))
    }
}

impl From<EmailError> for BillingError {
    fn from(err: EmailError) -> Self {
        BillingError::EmailDelivery(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SendReceipt {
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, EmailError>;
}

#[derive(Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

/// [`EmailSender`] for the Resend HTTP API
#[derive(Clone)]
pub struct ResendEmailSender {
    config: EmailConfig,
    client: reqwest::Client,
    /// Backoff multiplier in milliseconds; delays are 2x then 4x this value
    retry_factor: u64,
}

impl ResendEmailSender {
    const ATTEMPTS: usize = 3;

    pub fn new(config: EmailConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for email");
                reqwest::Client::new()
            });
        Self {
            config,
            client,
            retry_factor: 100,
        }
    }

    #[cfg(test)]
    fn with_fast_retries(mut self) -> Self {
        self.retry_factor = 1;
        self
    }

    async fn send_once(&self, email: &OutgoingEmail) -> Result<SendReceipt, EmailError> {
        let mut body = serde_json::json!({
            "from": self.config.email_from,
            "to": [email.to],
            "subject": email.subject,
            "html": email.html,
        });
        if let Some(reply_to) = &email.reply_to {
            body["reply_to"] = serde_json::json!(reply_to);
        }

        let url = format!("{}/emails", self.config.api_base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.resend_api_key),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| EmailError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let parsed = response.json::<ResendResponse>().await.ok();
            return Ok(SendReceipt {
                provider_message_id: parsed.and_then(|r| r.id),
            });
        }

        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 429 {
            Err(EmailError::Transient(format!("{}: {}", status, text)))
        } else {
            Err(EmailError::Rejected {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}

#[async_trait]
impl EmailSender for ResendEmailSender {
    fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, EmailError> {
        use tokio_retry::strategy::{jitter, ExponentialBackoff};
        use tokio_retry::Retry;

        if !self.is_enabled() {
            return Err(EmailError::NotConfigured);
        }

        let retry_strategy = ExponentialBackoff::from_millis(2)
            .factor(self.retry_factor)
            .max_delay(Duration::from_secs(5))
            .take(Self::ATTEMPTS - 1)
            .map(jitter);

        Retry::spawn(retry_strategy, || async {
            let result = self.send_once(email).await;
            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::debug!(to = %email.to, error = %e, "Transient email error - will retry");
                    Err(result)
                }
                // Stop retrying, hand the error back
                Err(_) => Ok(result),
            }
        })
        .await
        .unwrap_or_else(|e| e)
    }
}

// =============================================================================
// Email log
// =============================================================================

#[async_trait]
pub trait EmailLogStore: Send + Sync {
    async fn record(&self, entry: &EmailLogEntry) -> BillingResult<()>;
}

pub struct PgEmailLogStore {
    pool: PgPool,
}

impl PgEmailLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailLogStore for PgEmailLogStore {
    async fn record(&self, entry: &EmailLogEntry) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO email_logs (customer_id, template, recipient, provider_message_id, status, error)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.customer_id)
        .bind(&entry.template)
        .bind(&entry.recipient)
        .bind(&entry.provider_message_id)
        .bind(entry.status.as_str())
        .bind(&entry.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Used when no database is configured
pub struct NoopEmailLogStore;

#[async_trait]
impl EmailLogStore for NoopEmailLogStore {
    async fn record(&self, _entry: &EmailLogEntry) -> BillingResult<()> {
        Ok(())
    }
}

// =============================================================================
// Notifier
// =============================================================================

/// Renders templates, sends them and logs the outcome
#[derive(Clone)]
pub struct Notifier {
    sender: Arc<dyn EmailSender>,
    log: Arc<dyn EmailLogStore>,
    branding: Branding,
    admin_email: Option<String>,
}

impl Notifier {
    pub fn new(
        sender: Arc<dyn EmailSender>,
        log: Arc<dyn EmailLogStore>,
        branding: Branding,
        admin_email: Option<String>,
    ) -> Self {
        Self {
            sender,
            log,
            branding,
            admin_email,
        }
    }

    pub fn admin_email(&self) -> Option<&str> {
        self.admin_email.as_deref()
    }

    /// Render and send one template. Returns whether the provider accepted it.
    pub async fn send_template(
        &self,
        template: TemplateId,
        to: &str,
        data: &serde_json::Value,
        customer_id: Option<Uuid>,
    ) -> bool {
        self.send_with_reply_to(template, to, data, customer_id, None)
            .await
    }

    /// Send a notification to the studio inbox, replying to the submitter
    pub async fn notify_admin(
        &self,
        template: TemplateId,
        data: &serde_json::Value,
        reply_to: Option<&str>,
    ) -> bool {
        let Some(admin) = self.admin_email.clone() else {
            tracing::warn!(template = %template, "ADMIN_EMAIL not set, skipping admin notification");
            return false;
        };
        self.send_with_reply_to(template, &admin, data, None, reply_to.map(str::to_string))
            .await
    }

    async fn send_with_reply_to(
        &self,
        template: TemplateId,
        to: &str,
        data: &serde_json::Value,
        customer_id: Option<Uuid>,
        reply_to: Option<String>,
    ) -> bool {
        let (status, provider_message_id, error) = if !self.sender.is_enabled() {
            tracing::warn!(
                to = %to,
                template = %template,
                "Email not configured, skipping"
            );
            (EmailStatus::Skipped, None, Some("email not configured".to_string()))
        } else {
            match templates::render(template, data, &self.branding) {
                Err(e) => {
                    tracing::error!(template = %template, error = %e, "Failed to render email");
                    (EmailStatus::Failed, None, Some(e.to_string()))
                }
                Ok(rendered) => {
                    let email = OutgoingEmail {
                        to: to.to_string(),
                        subject: rendered.subject,
                        html: rendered.html,
                        reply_to,
                    };
                    match self.sender.send(&email).await {
                        Ok(receipt) => {
                            tracing::info!(to = %to, template = %template, "Email sent");
                            (EmailStatus::Sent, receipt.provider_message_id, None)
                        }
                        Err(e) => {
                            tracing::error!(
                                to = %to,
                                template = %template,
                                error = %e,
                                "Failed to send email - non-fatal"
                            );
                            (EmailStatus::Failed, None, Some(e.to_string()))
                        }
                    }
                }
            }
        };

        let entry = EmailLogEntry {
            customer_id,
            template: template.as_str().to_string(),
            recipient: to.to_string(),
            provider_message_id,
            status,
            error,
        };
        if let Err(e) = self.log.record(&entry).await {
            tracing::warn!(template = %template, error = %e, "Failed to write email log");
        }

        status == EmailStatus::Sent
    }
}
