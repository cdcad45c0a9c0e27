//! Postgres-backed fulfillment store tests
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://..."   # schema with customers, projects, stripe_webhook_events
//! cargo test -p dolo-billing --test pg_fulfillment -- --ignored --test-threads=1
//! ```
//!
//! The store relies on these unique constraints:
//! - `stripe_webhook_events.stripe_event_id`
//! - `customers.stripe_customer_id`
//! - `projects.stripe_session_id`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use dolo_billing::fulfillment::{generate_access_token, ClaimOutcome};
use dolo_billing::{FulfillmentStore, PgFulfillmentStore};
use dolo_shared::{create_pool, NewCustomer, NewProject, ProjectStatus};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

async fn setup_store() -> PgFulfillmentStore {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = create_pool(&database_url, 2)
        .await
        .expect("Failed to connect to test database");
    PgFulfillmentStore::new(pool)
}

fn purchase(suffix: &str) -> (NewCustomer, NewProject) {
    let now = OffsetDateTime::now_utc();
    (
        NewCustomer {
            stripe_customer_id: format!("cus_it_{}", suffix),
            name: "Integration Test".to_string(),
            email: format!("it+{}@dolo.test", suffix),
            company: None,
            phone: None,
            access_token: generate_access_token(now),
            access_token_expires_at: now + time::Duration::days(180),
        },
        NewProject {
            stripe_session_id: format!("cs_it_{}", suffix),
            project_type: "starter".to_string(),
            amount: 499.99,
            currency: "usd".to_string(),
            rush_delivery: false,
            add_ons: json!([]),
            details: json!({"sessionId": format!("cs_it_{}", suffix)}),
            details_raw: None,
        },
    )
}

#[tokio::test]
#[ignore] // Requires database
async fn test_event_claim_is_exclusive() {
    let store = setup_store().await;
    let event_id = format!("evt_it_{}", Uuid::new_v4().simple());
    let now = OffsetDateTime::now_utc();

    let first = store
        .claim_event(&event_id, "checkout.session.completed", now)
        .await
        .unwrap();
    assert_eq!(first, ClaimOutcome::Claimed);

    let second = store
        .claim_event(&event_id, "checkout.session.completed", now)
        .await
        .unwrap();
    assert!(matches!(second, ClaimOutcome::Duplicate(_)));

    store.finish_event(&event_id, Some("boom")).await.unwrap();
    let retry = store
        .claim_event(&event_id, "checkout.session.completed", now)
        .await
        .unwrap();
    assert_eq!(retry, ClaimOutcome::Claimed, "errored events can be retried");
}

#[tokio::test]
#[ignore] // Requires database
async fn test_purchase_is_recorded_once_per_session() {
    let store = setup_store().await;
    let suffix = Uuid::new_v4().simple().to_string();
    let (customer, project) = purchase(&suffix);

    let first = store.record_purchase(&customer, &project).await.unwrap();
    assert!(first.created);
    assert_eq!(first.project.status, ProjectStatus::Pending);

    let second = store.record_purchase(&customer, &project).await.unwrap();
    assert!(!second.created);
    assert_eq!(second.project.id, first.project.id);

    let (found_customer, found_project) = store
        .find_purchase_by_session(&project.stripe_session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found_customer.id, first.customer.id);
    assert_eq!(found_project.id, first.project.id);

    let (by_token, projects) = store
        .find_customer_by_token(&customer.access_token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_token.id, first.customer.id);
    assert_eq!(projects.len(), 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_concurrent_deliveries_record_one_project() {
    let store = setup_store().await;
    let suffix = Uuid::new_v4().simple().to_string();
    let (customer, project) = purchase(&suffix);
    let mut rival = customer.clone();
    rival.access_token = generate_access_token(OffsetDateTime::now_utc());

    let (a, b) = tokio::join!(
        store.record_purchase(&customer, &project),
        store.record_purchase(&rival, &project),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.created as u8 + b.created as u8, 1, "exactly one insert wins");
    assert_eq!(a.project.id, b.project.id);

    let winner = if a.created { &a } else { &b };
    let loser = if a.created { &b } else { &a };
    assert_eq!(loser.customer.access_token, winner.customer.access_token);
}
