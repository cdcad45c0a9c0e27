//! Contact form endpoint

use std::time::Instant;

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use dolo_billing::TemplateId;
use dolo_shared::{ContactSubmission, Submission};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult, RequestId},
    state::AppState,
    validation::{clean, parse_json, Validator},
};

pub const NAME_MIN: usize = 2;
pub const NAME_MAX: usize = 100;
pub const COMPANY_MAX: usize = 100;
pub const MESSAGE_MIN: usize = 10;
pub const MESSAGE_MAX: usize = 5000;
pub const SOURCE_MAX: usize = 50;

/// Fields are optional here so missing ones surface as field errors
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub message: String,
    pub source: Option<String>,
}

impl ContactRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        Validator::new()
            .text("name", &self.name, NAME_MIN, NAME_MAX)
            .email("email", &self.email)
            .optional_text("company", self.company.as_deref(), COMPANY_MAX)
            .text("message", &self.message, MESSAGE_MIN, MESSAGE_MAX)
            .optional_text("source", self.source.as_deref(), SOURCE_MAX)
            .finish()
    }

    fn into_submission(self) -> ContactSubmission {
        ContactSubmission {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            company: clean(self.company.as_deref()),
            phone: clean(self.phone.as_deref()),
            message: self.message.trim().to_string(),
            source: clean(self.source.as_deref()).unwrap_or_else(|| "website".to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetails {
    pub submission_id: Option<Uuid>,
    pub email_sent: bool,
    pub saved_via_backup: bool,
    pub processing_time_ms: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactResponse {
    pub success: bool,
    pub request_id: String,
    pub message: String,
    pub details: ContactDetails,
}

/// Store a contact message and notify the studio inbox. Succeeds when either
/// the row or the notification made it.
pub async fn submit_contact(
    State(state): State<AppState>,
    request_id: RequestId,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ContactResponse>> {
    let started = Instant::now();

    let request: ContactRequest =
        parse_json(&headers, &body).map_err(|e| e.at(&request_id))?;
    request.validate().map_err(|e| e.at(&request_id))?;
    let contact = request.into_submission();

    tracing::info!(
        request_id = %request_id,
        source = %contact.source,
        "Contact form submitted"
    );

    let submission = Submission::Contact(contact.clone());
    let outcome = state.submissions.submit(&submission).await;

    let email_data = json!({
        "name": contact.name,
        "email": contact.email,
        "company": contact.company,
        "phone": contact.phone,
        "source": contact.source,
        "message": contact.message,
        "submissionId": outcome.submission_id,
    });
    let email_sent = state
        .notifier
        .notify_admin(
            TemplateId::ContactNotification,
            &email_data,
            Some(&contact.email),
        )
        .await;

    if !outcome.success && !email_sent {
        tracing::error!(
            request_id = %request_id,
            email = %contact.email,
            error = ?outcome.error,
            "Contact submission lost: not stored and not emailed"
        );
        return Err(ApiError::Database(outcome.error.unwrap_or_default()).at(&request_id));
    }

    Ok(Json(ContactResponse {
        success: true,
        message: "Thanks for reaching out! We'll get back to you within one business day."
            .to_string(),
        details: ContactDetails {
            submission_id: outcome.submission_id,
            email_sent,
            saved_via_backup: outcome.used_fallback,
            processing_time_ms: started.elapsed().as_millis() as u64,
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        },
        request_id: request_id.0,
    }))
}
