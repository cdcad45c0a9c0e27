//! Checkout, Stripe webhook and post-payment success page

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dolo_billing::{BillingError, CheckoutRequest};
use dolo_shared::minor_to_major;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult, FieldError, RequestId},
    state::AppState,
};

/// Response from creating a checkout session
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub success: bool,
    pub redirect_url: String,
    pub session_id: String,
    pub total_cents: i64,
    pub request_id: String,
}

/// Create a Stripe checkout session for the start form
pub async fn create_checkout(
    State(state): State<AppState>,
    request_id: RequestId,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<CheckoutResponse>> {
    let billing = state.billing.as_ref().ok_or_else(|| {
        tracing::warn!(request_id = %request_id, "Checkout requested but Stripe is not configured");
        ApiError::ServiceUnavailable.at(&request_id)
    })?;

    let Json(request) = payload.map_err(|rejection| {
        ApiError::BadRequest(rejection.body_text()).at(&request_id)
    })?;

    tracing::info!(
        request_id = %request_id,
        plan = %request.plan,
        rush_delivery = request.rush_delivery,
        add_ons = ?request.add_ons,
        "Creating checkout session"
    );

    let result = billing
        .checkout
        .create_session(&request)
        .await
        .map_err(|e| ApiError::from(e).at(&request_id))?;

    Ok(Json(CheckoutResponse {
        success: true,
        redirect_url: result.redirect_url,
        session_id: result.session_id,
        total_cents: result.total_cents,
        request_id: request_id.0,
    }))
}

fn webhook_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Handle Stripe webhook events. Needs the raw body for signature checks.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let Some(billing) = state.billing.as_ref() else {
        tracing::warn!("Stripe webhook received but Stripe is not configured");
        return webhook_error(StatusCode::SERVICE_UNAVAILABLE, "Payments are not configured");
    };

    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        tracing::warn!("Stripe webhook missing signature header");
        return webhook_error(StatusCode::BAD_REQUEST, "Missing stripe-signature header");
    };

    let event = match billing.webhooks.verify_event(&body, signature) {
        Ok(event) => event,
        Err(BillingError::WebhookPayloadInvalid(_)) => {
            return webhook_error(StatusCode::BAD_REQUEST, "Invalid webhook payload");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Stripe webhook signature verification failed");
            return webhook_error(StatusCode::BAD_REQUEST, "Invalid webhook signature");
        }
    };

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Stripe webhook event verified"
    );

    match billing.webhooks.dispatch(&event).await {
        Ok(outcome) => {
            tracing::info!(event_id = %event.id, outcome = ?outcome, "Stripe webhook processed");
            (StatusCode::OK, Json(json!({ "received": true }))).into_response()
        }
        Err(e) => {
            tracing::error!(event_id = %event.id, error = %e, "Webhook handling error");
            webhook_error(StatusCode::INTERNAL_SERVER_ERROR, "Webhook handler failed")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SuccessQuery {
    pub session_id: Option<String>,
}

/// What the success page shows after payment
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSummary {
    pub customer_name: String,
    pub customer_email: String,
    pub amount: f64,
    pub currency: String,
    pub project_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    pub rush_delivery: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Summarize a completed checkout. Prefers the stored purchase, falling back
/// to the Stripe session while the webhook has not landed yet.
pub async fn checkout_success(
    State(state): State<AppState>,
    request_id: RequestId,
    Query(query): Query<SuccessQuery>,
) -> ApiResult<Json<CheckoutSummary>> {
    let session_id = query
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::invalid_fields(vec![FieldError::new(
                "session_id",
                "session_id is required",
            )])
            .at(&request_id)
        })?;

    match state.store.find_purchase_by_session(&session_id).await {
        Ok(Some((customer, project))) => {
            let now = OffsetDateTime::now_utc();
            let access_token = customer
                .access_token_valid_at(now)
                .then(|| customer.access_token.clone());
            return Ok(Json(CheckoutSummary {
                customer_name: customer.name,
                customer_email: customer.email,
                amount: project.amount,
                currency: project.currency,
                project_type: project.project_type,
                project_id: Some(project.id),
                rush_delivery: project.rush_delivery,
                access_token,
            }));
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                session_id = %session_id,
                error = %e,
                "Purchase lookup failed, reading session from Stripe"
            );
        }
    }

    let billing = state
        .billing
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable.at(&request_id))?;

    let session = billing
        .gateway
        .retrieve_session(&session_id)
        .await
        .map_err(|e| ApiError::from(e).at(&request_id))?;

    Ok(Json(CheckoutSummary {
        customer_name: session.customer_name.unwrap_or_default(),
        customer_email: session.customer_email.unwrap_or_default(),
        amount: minor_to_major(session.amount_total.unwrap_or(0)),
        currency: session.currency.unwrap_or_else(|| "usd".to_string()),
        project_type: session
            .metadata
            .get("plan")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string()),
        project_id: None,
        rush_delivery: session
            .metadata
            .get("rush_delivery")
            .is_some_and(|v| v == "true"),
        access_token: None,
    }))
}
