//! API routes

pub mod billing;
pub mod contact;
pub mod health;
pub mod portal;
pub mod submissions;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, OnResponse, TraceLayer},
};
use tracing::Span;

use crate::{config::Config, state::AppState};

/// Form and checkout bodies are small; Stripe events stay well under this
const MAX_BODY_BYTES: usize = 1024 * 1024;

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = if config.cors_allowed_origins.is_empty() {
        vec![config.public_url.clone()]
    } else {
        config.cors_allowed_origins.clone()
    }
    .iter()
    .filter_map(|origin| match HeaderValue::from_str(origin) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
            None
        }
    })
    .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("x-request-id")])
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let api_routes = Router::new()
        // Checkout and payments
        .route("/checkout", post(billing::create_checkout))
        .route("/checkout/success", get(billing::checkout_success))
        .route("/webhooks/stripe", post(billing::stripe_webhook))
        // Public forms
        .route("/contact", post(contact::submit_contact))
        .route("/start", post(submissions::submit_start))
        .route("/private-build", post(submissions::submit_private_build))
        .route("/quiz-results", post(submissions::submit_quiz_result))
        // Customer portal
        .route("/portal/:token", get(portal::get_portal));

    let config = state.config.clone();

    Router::new()
        .merge(health_routes)
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(cors_layer(&config))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record("latency_ms", latency.as_millis() as u64);
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}
