//! Start-form backup, private-build applications and quiz results

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use dolo_billing::TemplateId;
use dolo_shared::{
    PrivateBuildApplication, QuizResult, StartIntake, Submission, SubmitOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::contact::{COMPANY_MAX, NAME_MAX, NAME_MIN};
use crate::{
    error::{ApiError, ApiResult, RequestId},
    state::AppState,
    validation::{clean, parse_json, Validator},
};

const SHORT_FIELD_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 5000;
const PLAN_MAX: usize = 50;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub success: bool,
    pub request_id: String,
    pub submission_id: Option<Uuid>,
    pub saved_via_backup: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
}

fn respond(
    request_id: RequestId,
    outcome: SubmitOutcome,
    email_sent: Option<bool>,
) -> ApiResult<Json<SubmissionResponse>> {
    if !outcome.success && email_sent != Some(true) {
        return Err(ApiError::Database(outcome.error.unwrap_or_default()).at(&request_id));
    }
    Ok(Json(SubmissionResponse {
        success: true,
        request_id: request_id.0,
        submission_id: outcome.submission_id,
        saved_via_backup: outcome.used_fallback,
        email_sent,
    }))
}

// =============================================================================
// Start form backup
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartRequest {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub plan: Option<String>,
    pub rush_delivery: bool,
    pub add_ons: Vec<String>,
    pub details: serde_json::Value,
}

/// Keep a copy of the start form before the visitor leaves for Stripe
pub async fn submit_start(
    State(state): State<AppState>,
    request_id: RequestId,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<SubmissionResponse>> {
    let request: StartRequest = parse_json(&headers, &body).map_err(|e| e.at(&request_id))?;
    Validator::new()
        .text("name", &request.name, NAME_MIN, NAME_MAX)
        .email("email", &request.email)
        .optional_text("company", request.company.as_deref(), COMPANY_MAX)
        .optional_text("plan", request.plan.as_deref(), PLAN_MAX)
        .finish()
        .map_err(|e| e.at(&request_id))?;

    let intake = StartIntake {
        name: request.name.trim().to_string(),
        email: request.email.trim().to_lowercase(),
        company: clean(request.company.as_deref()),
        phone: clean(request.phone.as_deref()),
        plan: clean(request.plan.as_deref()),
        rush_delivery: request.rush_delivery,
        add_ons: request.add_ons,
        details: request.details,
    };

    tracing::info!(
        request_id = %request_id,
        plan = ?intake.plan,
        "Start form backup submitted"
    );

    let outcome = state
        .submissions
        .submit(&Submission::StartIntake(intake))
        .await;
    respond(request_id, outcome, None)
}

// =============================================================================
// Private build application
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrivateBuildRequest {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub budget: Option<String>,
    pub timeline: Option<String>,
    pub description: Option<String>,
    pub features: Vec<String>,
}

/// Store a private-build application and email it to the studio
pub async fn submit_private_build(
    State(state): State<AppState>,
    request_id: RequestId,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<SubmissionResponse>> {
    let request: PrivateBuildRequest =
        parse_json(&headers, &body).map_err(|e| e.at(&request_id))?;
    Validator::new()
        .text("name", &request.name, NAME_MIN, NAME_MAX)
        .email("email", &request.email)
        .optional_text("company", request.company.as_deref(), COMPANY_MAX)
        .optional_text("budget", request.budget.as_deref(), SHORT_FIELD_MAX)
        .optional_text("timeline", request.timeline.as_deref(), SHORT_FIELD_MAX)
        .optional_text("description", request.description.as_deref(), DESCRIPTION_MAX)
        .finish()
        .map_err(|e| e.at(&request_id))?;

    let application = PrivateBuildApplication {
        name: request.name.trim().to_string(),
        email: request.email.trim().to_lowercase(),
        company: clean(request.company.as_deref()),
        phone: clean(request.phone.as_deref()),
        budget: clean(request.budget.as_deref()),
        timeline: clean(request.timeline.as_deref()),
        description: clean(request.description.as_deref()),
        features: request
            .features
            .iter()
            .filter_map(|f| clean(Some(f.as_str())))
            .collect(),
    };

    tracing::info!(request_id = %request_id, "Private build application submitted");

    let outcome = state
        .submissions
        .submit(&Submission::PrivateBuild(application.clone()))
        .await;

    let email_sent = state
        .notifier
        .notify_admin(
            TemplateId::PrivateBuildApplication,
            &json!({
                "name": application.name,
                "email": application.email,
                "company": application.company,
                "phone": application.phone,
                "budget": application.budget,
                "timeline": application.timeline,
                "description": application.description,
                "features": application.features,
                "submissionId": outcome.submission_id,
            }),
            Some(&application.email),
        )
        .await;

    respond(request_id, outcome, Some(email_sent))
}

// =============================================================================
// Quiz results
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QuizRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub recommended_plan: String,
    pub answers: serde_json::Value,
}

/// Record a quiz outcome; emails the recommendation when an address is given
pub async fn submit_quiz_result(
    State(state): State<AppState>,
    request_id: RequestId,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<SubmissionResponse>> {
    let request: QuizRequest = parse_json(&headers, &body).map_err(|e| e.at(&request_id))?;
    Validator::new()
        .optional_text("name", request.name.as_deref(), NAME_MAX)
        .optional_email("email", request.email.as_deref())
        .text("recommendedPlan", &request.recommended_plan, 1, PLAN_MAX)
        .finish()
        .map_err(|e| e.at(&request_id))?;

    let result = QuizResult {
        name: clean(request.name.as_deref()),
        email: clean(request.email.as_deref()).map(|e| e.to_lowercase()),
        recommended_plan: request.recommended_plan.trim().to_string(),
        answers: request.answers,
    };

    tracing::info!(
        request_id = %request_id,
        recommended_plan = %result.recommended_plan,
        has_email = result.email.is_some(),
        "Quiz result submitted"
    );

    let outcome = state
        .submissions
        .submit(&Submission::QuizResult(result.clone()))
        .await;

    let email_sent = match &result.email {
        Some(email) => Some(
            state
                .notifier
                .send_template(
                    TemplateId::QuizResult,
                    email,
                    &json!({
                        "name": result.name,
                        "recommendedPlan": result.recommended_plan,
                    }),
                    None,
                )
                .await,
        ),
        None => None,
    };

    respond(request_id, outcome, email_sent)
}
