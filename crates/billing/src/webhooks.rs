//! Stripe webhook verification and dispatch
//!
//! Signatures are verified by hand against the raw body: the
//! `Stripe-Signature` header carries `t=<unix>` and one or more `v1=<hex>`
//! HMAC-SHA256 digests of `"<t>.<body>"`, keyed with the full webhook secret.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::fulfillment::{CompletedSession, FulfillmentOutcome, FulfillmentService};

type HmacSha256 = Hmac<Sha256>;

/// Maximum clock skew between Stripe's timestamp and ours
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const CUSTOMER_CREATED: &str = "customer.created";

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Minimal Stripe event envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

impl WebhookEvent {
    pub fn created_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}

/// Check a `Stripe-Signature` header against the raw payload at time `now`
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if signatures.is_empty() {
        tracing::warn!("Missing v1 signature in signature header");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let diff = now.abs_diff(timestamp);
    if diff > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            diff = diff,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("invalid webhook secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    let matched = signatures
        .iter()
        .any(|sig| bool::from(expected.as_bytes().ct_eq(sig.as_bytes())));

    if !matched {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }
    Ok(())
}

/// Compute a valid header for `payload`, as Stripe would send it
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Fulfilled(FulfillmentOutcome),
    /// Known event type that only needs a log line
    Logged,
    Ignored,
}

pub struct WebhookHandler {
    webhook_secret: String,
    fulfillment: Arc<FulfillmentService>,
}

impl WebhookHandler {
    pub fn new(webhook_secret: String, fulfillment: Arc<FulfillmentService>) -> Self {
        Self {
            webhook_secret,
            fulfillment,
        }
    }

    /// Verify the signature and decode the envelope. Nothing is processed
    /// unless this succeeds.
    pub fn verify_event(&self, payload: &[u8], signature: &str) -> BillingResult<WebhookEvent> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(payload, signature, &self.webhook_secret, now)?;

        serde_json::from_slice::<WebhookEvent>(payload).map_err(|e| {
            tracing::warn!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookPayloadInvalid(e.to_string())
        })
    }

    /// Route a verified event. Errors only when the event cannot be decoded;
    /// degraded fulfillment still counts as dispatched.
    pub async fn dispatch(&self, event: &WebhookEvent) -> BillingResult<DispatchOutcome> {
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Processing Stripe webhook event"
        );

        match event.event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED => {
                let session: CompletedSession =
                    serde_json::from_value(event.data.object.clone()).map_err(|e| {
                        BillingError::Internal(format!("invalid checkout session object: {}", e))
                    })?;

                let outcome = self
                    .fulfillment
                    .fulfill(&event.id, &event.event_type, event.created_at(), &session)
                    .await;

                tracing::info!(
                    event_id = %event.id,
                    session_id = %session.id,
                    outcome = ?outcome,
                    "Checkout fulfillment finished"
                );
                Ok(DispatchOutcome::Fulfilled(outcome))
            }
            PAYMENT_INTENT_SUCCEEDED => {
                tracing::info!(
                    event_id = %event.id,
                    payment_intent = %event.data.object.get("id").and_then(|v| v.as_str()).unwrap_or_default(),
                    amount = ?event.data.object.get("amount").and_then(|v| v.as_i64()),
                    "Payment intent succeeded"
                );
                Ok(DispatchOutcome::Logged)
            }
            CUSTOMER_CREATED => {
                tracing::info!(
                    event_id = %event.id,
                    customer_id = %event.data.object.get("id").and_then(|v| v.as_str()).unwrap_or_default(),
                    "Stripe customer created"
                );
                Ok(DispatchOutcome::Logged)
            }
            other => {
                tracing::debug!(event_type = %other, "Unhandled webhook event type");
                Ok(DispatchOutcome::Ignored)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::email::{NoopEmailLogStore, Notifier};
    use crate::templates::Branding;
    use crate::testing::{FakeGateway, MemoryFulfillmentStore, RecordingSender};

    const SECRET: &str = "whsec_test_secret";

    fn handler(store: Arc<MemoryFulfillmentStore>) -> WebhookHandler {
        let notifier = Notifier::new(
            Arc::new(RecordingSender::default()),
            Arc::new(NoopEmailLogStore),
            Branding::default(),
            None,
        );
        let fulfillment = FulfillmentService::new(Arc::new(FakeGateway::default()), store, notifier);
        WebhookHandler::new(SECRET.to_string(), Arc::new(fulfillment))
    }

    fn now() -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }

    #[test]
    fn test_valid_signature_passes() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_payload(body, SECRET, 1_700_000_000);
        assert!(verify_signature(body, &header, SECRET, 1_700_000_100).is_ok());
    }

    #[test]
    fn test_any_matching_v1_signature_passes() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_payload(body, SECRET, 1_700_000_000);
        let rotated = header.replacen("v1=", "v1=deadbeef,v1=", 1);
        assert!(verify_signature(body, &rotated, SECRET, 1_700_000_000).is_ok());
    }

    #[test]
    fn test_tampered_body_fails() {
        let header = sign_payload(br#"{"amount":100}"#, SECRET, 1_700_000_000);
        let err = verify_signature(br#"{"amount":1}"#, &header, SECRET, 1_700_000_000).unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let body = br#"{}"#;
        let header = sign_payload(body, "whsec_other", 1_700_000_000);
        assert!(verify_signature(body, &header, SECRET, 1_700_000_000).is_err());
    }

    #[test]
    fn test_stale_timestamp_fails() {
        let body = br#"{}"#;
        let header = sign_payload(body, SECRET, 1_700_000_000);
        assert!(verify_signature(body, &header, SECRET, 1_700_000_301).is_err());
        assert!(verify_signature(body, &header, SECRET, 1_699_999_699).is_err());
        assert!(verify_signature(body, &header, SECRET, 1_700_000_300).is_ok());
    }

    #[test]
    fn test_malformed_headers_fail() {
        for header in [
            "",
            "garbage",
            "t=1700000000",
            "v1=abc",
            "t=notanumber,v1=abc",
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            assert!(
                verify_signature(b"{}", header, SECRET, 1_700_000_000).is_err(),
                "{header:?} should fail"
            );
        }
    }

    #[test]
    fn test_signed_extreme_timestamps_are_outside_tolerance() {
        for timestamp in [i64::MIN, i64::MAX] {
            let header = sign_payload(b"{}", SECRET, timestamp);
            assert!(
                verify_signature(b"{}", &header, SECRET, 1_700_000_000).is_err(),
                "t={timestamp} should fail"
            );
        }
    }

    #[tokio::test]
    async fn test_verified_non_event_body_is_payload_error() {
        let store = Arc::new(MemoryFulfillmentStore::default());
        let body = br#"{"hello":"world"}"#;
        let header = sign_payload(body, SECRET, now());
        let err = handler(store).verify_event(body, &header).unwrap_err();
        assert!(matches!(err, BillingError::WebhookPayloadInvalid(_)));
    }

    #[tokio::test]
    async fn test_customer_created_is_logged_without_writes() {
        let store = Arc::new(MemoryFulfillmentStore::default());
        let body = br#"{"id":"evt_c","type":"customer.created","created":1700000000,"data":{"object":{"id":"cus_1"}}}"#;
        let handler = handler(store.clone());

        let event = handler
            .verify_event(body, &sign_payload(body, SECRET, now()))
            .unwrap();
        let outcome = handler.dispatch(&event).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Logged);
        assert!(store.projects().is_empty());
        assert!(store.event_status("evt_c").is_none());
    }

    #[tokio::test]
    async fn test_unknown_event_is_ignored() {
        let store = Arc::new(MemoryFulfillmentStore::default());
        let body = br#"{"id":"evt_x","type":"invoice.paid","data":{"object":{}}}"#;
        let handler = handler(store);
        let event = handler
            .verify_event(body, &sign_payload(body, SECRET, now()))
            .unwrap();
        assert_eq!(handler.dispatch(&event).await.unwrap(), DispatchOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_undecodable_session_is_dispatch_error() {
        let store = Arc::new(MemoryFulfillmentStore::default());
        let body = br#"{"id":"evt_s","type":"checkout.session.completed","data":{"object":{"amount_total":"lots"}}}"#;
        let handler = handler(store);
        let event = handler
            .verify_event(body, &sign_payload(body, SECRET, now()))
            .unwrap();
        assert!(handler.dispatch(&event).await.is_err());
    }
}
