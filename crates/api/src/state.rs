//! Shared application state

use std::sync::Arc;

use dolo_billing::{
    BillingService, EmailLogStore, EmailSender, FulfillmentStore, NoopEmailLogStore, Notifier,
    PgEmailLogStore, PgFulfillmentStore, ResendEmailSender, UnavailableFulfillmentStore,
};
use dolo_shared::FallbackSink;
use sqlx::PgPool;

use crate::config::Config;

/// Everything a handler needs, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Absent when `DATABASE_URL` is not configured
    pub pool: Option<PgPool>,
    /// Absent when Stripe is not configured; payment routes answer 503
    pub billing: Option<BillingService>,
    pub notifier: Notifier,
    pub submissions: Arc<FallbackSink>,
    pub store: Arc<dyn FulfillmentStore>,
}

impl AppState {
    /// Wire the production clients from configuration
    pub fn new(config: Config, pool: Option<PgPool>) -> Self {
        let sender: Arc<dyn EmailSender> = Arc::new(ResendEmailSender::new(config.email.clone()));
        let email_log: Arc<dyn EmailLogStore> = match &pool {
            Some(pool) => Arc::new(PgEmailLogStore::new(pool.clone())),
            None => Arc::new(NoopEmailLogStore),
        };
        let notifier = Notifier::new(
            sender,
            email_log,
            config.email.branding(),
            config.email.admin_email.clone(),
        );

        let (store, submissions): (Arc<dyn FulfillmentStore>, FallbackSink) = match &pool {
            Some(pool) => (
                Arc::new(PgFulfillmentStore::new(pool.clone())),
                FallbackSink::postgres(pool.clone()),
            ),
            None => (
                Arc::new(UnavailableFulfillmentStore),
                FallbackSink::unavailable(),
            ),
        };

        let billing = config
            .stripe
            .clone()
            .map(|stripe| BillingService::stripe(stripe, store.clone(), notifier.clone()));

        Self {
            config: Arc::new(config),
            pool,
            billing,
            notifier,
            submissions: Arc::new(submissions),
            store,
        }
    }

    /// Assemble state from already-built parts
    pub fn from_parts(
        config: Config,
        billing: Option<BillingService>,
        notifier: Notifier,
        submissions: FallbackSink,
        store: Arc<dyn FulfillmentStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pool: None,
            billing,
            notifier,
            submissions: Arc::new(submissions),
            store,
        }
    }
}
