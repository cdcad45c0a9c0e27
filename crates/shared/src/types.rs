//! Common types used across Dolo

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle of a purchased build
///
/// `pending -> in-progress -> completed`, with `cancelled` reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ProjectStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl Default for ProjectStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Pending => "pending",
            ProjectStatus::InProgress => "in-progress",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }

    /// Whether operational tooling may move a project from `self` to `next`
    pub fn can_transition_to(&self, next: ProjectStatus) -> bool {
        match (self, next) {
            (ProjectStatus::Pending, ProjectStatus::InProgress) => true,
            (ProjectStatus::InProgress, ProjectStatus::Completed) => true,
            (from, ProjectStatus::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one email send attempt, as recorded in `email_logs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    Sent,
    Failed,
    Skipped,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
            EmailStatus::Skipped => "skipped",
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A paying customer, 1:1 with a Stripe customer
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub stripe_customer_id: String,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    /// Sole credential for the priority-support portal
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_token_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Customer {
    pub fn access_token_valid_at(&self, now: OffsetDateTime) -> bool {
        now < self.access_token_expires_at
    }
}

/// One purchased build
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub stripe_session_id: String,
    pub project_type: String,
    /// Total charged, in major currency units
    pub amount: f64,
    pub currency: String,
    pub rush_delivery: bool,
    pub add_ons: serde_json::Value,
    pub details: serde_json::Value,
    /// Unparseable checkout metadata kept verbatim for manual recovery
    pub details_raw: Option<String>,
    pub status: ProjectStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Customer fields written by the fulfillment pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct NewCustomer {
    pub stripe_customer_id: String,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub access_token: String,
    pub access_token_expires_at: OffsetDateTime,
}

/// Project fields written by the fulfillment pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct NewProject {
    pub stripe_session_id: String,
    pub project_type: String,
    pub amount: f64,
    pub currency: String,
    pub rush_delivery: bool,
    pub add_ons: serde_json::Value,
    pub details: serde_json::Value,
    pub details_raw: Option<String>,
}

/// One row of the best-effort email log
#[derive(Debug, Clone, PartialEq)]
pub struct EmailLogEntry {
    pub customer_id: Option<Uuid>,
    pub template: String,
    pub recipient: String,
    pub provider_message_id: Option<String>,
    pub status: EmailStatus,
    pub error: Option<String>,
}

/// Convert a provider minor-unit amount (cents) to major units
pub fn minor_to_major(amount_minor: i64) -> f64 {
    amount_minor as f64 / 100.0
}

/// Format cents as a dollar string, e.g. `114998` -> `$1,149.98`
pub fn format_usd(amount_cents: i64) -> String {
    let negative = amount_cents < 0;
    let abs = amount_cents.unsigned_abs();
    let dollars = (abs / 100).to_string();
    let cents = abs % 100;

    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, ch) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}${}.{:02}", if negative { "-" } else { "" }, grouped, cents)
}
