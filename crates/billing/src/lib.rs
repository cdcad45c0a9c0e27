//! Dolo Billing
//!
//! Plan catalog, Stripe checkout, webhook verification, checkout fulfillment
//! and transactional email for the Dolo website-building service.

pub mod catalog;
pub mod checkout;
pub mod client;
pub mod email;
pub mod error;
pub mod fulfillment;
pub mod metadata;
pub mod templates;
pub mod webhooks;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::sync::Arc;

pub use checkout::{CheckoutRequest, CheckoutResult, CheckoutService};
pub use client::{
    CustomerContact, PaymentGateway, PriceIds, SessionSummary, StripeClient, StripeConfig,
    StripeGateway,
};
pub use email::{
    EmailConfig, EmailLogStore, EmailSender, NoopEmailLogStore, Notifier, PgEmailLogStore,
    ResendEmailSender,
};
pub use error::{BillingError, BillingResult};
pub use fulfillment::{
    FulfillmentOutcome, FulfillmentService, FulfillmentStore, PgFulfillmentStore,
    UnavailableFulfillmentStore,
};
pub use templates::TemplateId;
pub use webhooks::{DispatchOutcome, WebhookEvent, WebhookHandler};

/// Payment-side services, present only when Stripe is configured
#[derive(Clone)]
pub struct BillingService {
    pub gateway: Arc<dyn PaymentGateway>,
    pub checkout: Arc<CheckoutService>,
    pub webhooks: Arc<WebhookHandler>,
    pub fulfillment: Arc<FulfillmentService>,
}

impl BillingService {
    /// Wire the services around an existing gateway and store
    pub fn new(
        config: &StripeConfig,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn FulfillmentStore>,
        notifier: Notifier,
    ) -> Self {
        let fulfillment = Arc::new(FulfillmentService::new(gateway.clone(), store, notifier));
        Self {
            checkout: Arc::new(CheckoutService::new(gateway.clone(), config)),
            webhooks: Arc::new(WebhookHandler::new(
                config.webhook_secret.clone(),
                fulfillment.clone(),
            )),
            fulfillment,
            gateway,
        }
    }

    /// Build against the live Stripe API
    pub fn stripe(
        config: StripeConfig,
        store: Arc<dyn FulfillmentStore>,
        notifier: Notifier,
    ) -> Self {
        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(StripeGateway::new(StripeClient::new(config.clone())));
        Self::new(&config, gateway, store, notifier)
    }
}
