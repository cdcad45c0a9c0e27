//! Stripe client configuration and the payment gateway seam

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use stripe::{
    CheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionLineItemsPriceDataRecurring,
    CreateCheckoutSessionLineItemsPriceDataRecurringInterval, CreateCustomer, Currency, Customer,
    CustomerId,
};

use crate::catalog::PlanId;
use crate::error::{BillingError, BillingResult};

/// Default timeout applied to every outbound Stripe call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret (full `whsec_...` value)
    pub webhook_secret: String,
    /// Optional pre-created Stripe prices; inline price data is used otherwise
    pub price_ids: PriceIds,
    /// Public site URL for success/cancel redirects
    pub public_url: String,
    /// Timeout for each Stripe API call
    pub timeout: Duration,
}

/// Stripe price ID overrides
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    pub starter: Option<String>,
    pub starter_rush: Option<String>,
    pub pro: Option<String>,
    pub pro_rush: Option<String>,
    pub premium: Option<String>,
    pub premium_rush: Option<String>,
    pub maintenance_monthly: Option<String>,
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let timeout = non_empty_env("EXTERNAL_CALL_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(Self {
            secret_key: non_empty_env("STRIPE_SECRET_KEY")
                .ok_or_else(|| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: non_empty_env("STRIPE_WEBHOOK_SECRET")
                .ok_or_else(|| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            price_ids: PriceIds {
                starter: non_empty_env("STRIPE_PRICE_STARTER"),
                starter_rush: non_empty_env("STRIPE_PRICE_STARTER_RUSH"),
                pro: non_empty_env("STRIPE_PRICE_PRO"),
                pro_rush: non_empty_env("STRIPE_PRICE_PRO_RUSH"),
                premium: non_empty_env("STRIPE_PRICE_PREMIUM"),
                premium_rush: non_empty_env("STRIPE_PRICE_PREMIUM_RUSH"),
                maintenance_monthly: non_empty_env("STRIPE_PRICE_MAINTENANCE_MONTHLY"),
            },
            public_url: non_empty_env("PUBLIC_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            timeout,
        })
    }

    /// Stripe price for a plan, if one is configured
    pub fn price_id_for_plan(&self, plan: PlanId, rush_delivery: bool) -> Option<&str> {
        self.price_ids.for_plan(plan, rush_delivery)
    }
}

impl PriceIds {
    pub fn for_plan(&self, plan: PlanId, rush_delivery: bool) -> Option<&str> {
        let ids = self;
        let price = match (plan, rush_delivery) {
            (PlanId::Starter, false) => &ids.starter,
            (PlanId::Starter, true) => &ids.starter_rush,
            (PlanId::Pro, false) => &ids.pro,
            (PlanId::Pro, true) => &ids.pro_rush,
            (PlanId::Premium, false) => &ids.premium,
            (PlanId::Premium, true) => &ids.premium_rush,
            (PlanId::CustomQuote, _) => return None,
        };
        price.as_deref()
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

// =============================================================================
// Gateway seam
// =============================================================================

/// Contact details collected on the start form
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerContact {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
}

/// The subset of a Stripe customer the pipeline reads
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GatewayCustomer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    Payment,
    Subscription,
}

/// Where a line item's price comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceRef {
    /// Pre-created Stripe price
    Stripe(String),
    /// Inline price data in cents
    Inline { amount_cents: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub name: String,
    pub description: Option<String>,
    pub amount_cents: i64,
    pub price: PriceRef,
    /// Billed monthly when true
    pub recurring: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub customer_id: String,
    pub mode: CheckoutMode,
    pub line_items: Vec<LineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub id: String,
    pub url: Option<String>,
}

/// The subset of a Stripe checkout session the success page reads
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSummary {
    pub id: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Payment provider operations used by checkout and fulfillment
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_customer(
        &self,
        contact: &CustomerContact,
        metadata: HashMap<String, String>,
    ) -> BillingResult<GatewayCustomer>;

    async fn create_checkout_session(&self, request: SessionRequest)
        -> BillingResult<CreatedSession>;

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<GatewayCustomer>;

    async fn retrieve_session(&self, session_id: &str) -> BillingResult<SessionSummary>;
}

/// [`PaymentGateway`] backed by the Stripe API
#[derive(Clone)]
pub struct StripeGateway {
    stripe: StripeClient,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> BillingResult<T>
    where
        F: std::future::Future<Output = Result<T, stripe::StripeError>>,
    {
        match tokio::time::timeout(self.stripe.config().timeout, fut).await {
            Ok(result) => result.map_err(BillingError::from),
            Err(_) => {
                tracing::warn!(operation = operation, "Stripe call timed out");
                Err(BillingError::StripeApi(format!("{} timed out", operation)))
            }
        }
    }
}

fn to_stripe_line_item(item: &LineItem) -> CreateCheckoutSessionLineItems {
    match &item.price {
        PriceRef::Stripe(price_id) => CreateCheckoutSessionLineItems {
            price: Some(price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        },
        PriceRef::Inline { amount_cents } => CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: Currency::USD,
                unit_amount: Some(*amount_cents),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: item.name.clone(),
                    description: item.description.clone(),
                    ..Default::default()
                }),
                recurring: item.recurring.then(|| CreateCheckoutSessionLineItemsPriceDataRecurring {
                    interval: CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month,
                    interval_count: Some(1),
                }),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        },
    }
}

fn from_stripe_customer(customer: Customer) -> GatewayCustomer {
    GatewayCustomer {
        id: customer.id.to_string(),
        email: customer.email,
        name: customer.name,
        phone: customer.phone,
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_customer(
        &self,
        contact: &CustomerContact,
        metadata: HashMap<String, String>,
    ) -> BillingResult<GatewayCustomer> {
        let params = CreateCustomer {
            email: Some(&contact.email),
            name: Some(&contact.name),
            phone: contact.phone.as_deref(),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = self
            .timed(
                "create customer",
                Customer::create(self.stripe.inner(), params),
            )
            .await?;

        tracing::info!(customer_id = %customer.id, "Created Stripe customer");
        Ok(from_stripe_customer(customer))
    }

    async fn create_checkout_session(
        &self,
        request: SessionRequest,
    ) -> BillingResult<CreatedSession> {
        let customer_id = request
            .customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

        let line_items = request.line_items.iter().map(to_stripe_line_item).collect();

        let params = CreateCheckoutSession {
            customer: Some(customer_id),
            mode: Some(match request.mode {
                CheckoutMode::Payment => CheckoutSessionMode::Payment,
                CheckoutMode::Subscription => CheckoutSessionMode::Subscription,
            }),
            line_items: Some(line_items),
            success_url: Some(&request.success_url),
            cancel_url: Some(&request.cancel_url),
            metadata: Some(request.metadata.clone()),
            billing_address_collection: Some(stripe::CheckoutSessionBillingAddressCollection::Auto),
            ..Default::default()
        };

        let session = self
            .timed(
                "create checkout session",
                CheckoutSession::create(self.stripe.inner(), params),
            )
            .await?;

        Ok(CreatedSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<GatewayCustomer> {
        let customer_id = customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

        let customer = self
            .timed(
                "retrieve customer",
                Customer::retrieve(self.stripe.inner(), &customer_id, &[]),
            )
            .await?;

        Ok(from_stripe_customer(customer))
    }

    async fn retrieve_session(&self, session_id: &str) -> BillingResult<SessionSummary> {
        let session_id = session_id
            .parse::<stripe::CheckoutSessionId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid session ID: {}", e)))?;

        let session = self
            .timed(
                "retrieve checkout session",
                CheckoutSession::retrieve(self.stripe.inner(), &session_id, &[]),
            )
            .await?;

        let (customer_name, customer_email) = session
            .customer_details
            .as_ref()
            .map(|d| (d.name.clone(), d.email.clone()))
            .unwrap_or((None, None));

        Ok(SessionSummary {
            id: session.id.to_string(),
            customer_id: session.customer.as_ref().map(|c| c.id().to_string()),
            customer_name,
            customer_email,
            amount_total: session.amount_total,
            currency: session.currency.map(|c| c.to_string()),
            metadata: session.metadata.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "STRIPE_SECRET_KEY",
        "STRIPE_WEBHOOK_SECRET",
        "STRIPE_PRICE_PRO",
        "STRIPE_PRICE_PRO_RUSH",
        "EXTERNAL_CALL_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_requires_secret_key() {
        clear_env();
        std::env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_test");
        let err = StripeConfig::from_env().unwrap_err();
        assert!(matches!(err, BillingError::Config(msg) if msg.contains("STRIPE_SECRET_KEY")));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_reads_price_overrides_and_timeout() {
        clear_env();
        std::env::set_var("STRIPE_SECRET_KEY", "sk_test_123");
        std::env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_test");
        std::env::set_var("STRIPE_PRICE_PRO_RUSH", "price_pro_rush");
        std::env::set_var("EXTERNAL_CALL_TIMEOUT_SECS", "5");

        let config = StripeConfig::from_env().unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(
            config.price_id_for_plan(PlanId::Pro, true),
            Some("price_pro_rush")
        );
        assert_eq!(config.price_id_for_plan(PlanId::Pro, false), None);
        assert_eq!(config.price_id_for_plan(PlanId::CustomQuote, true), None);
        clear_env();
    }

    #[test]
    fn test_inline_recurring_line_item_is_monthly() {
        let item = LineItem {
            name: "Website care plan".to_string(),
            description: None,
            amount_cents: 4_999,
            price: PriceRef::Inline { amount_cents: 4_999 },
            recurring: true,
        };
        let stripe_item = to_stripe_line_item(&item);
        let price_data = stripe_item.price_data.unwrap();
        assert_eq!(price_data.unit_amount, Some(4_999));
        assert!(price_data.recurring.is_some());
        assert!(stripe_item.price.is_none());
    }

    #[test]
    fn test_stripe_price_line_item_uses_price_id() {
        let item = LineItem {
            name: "Pro".to_string(),
            description: None,
            amount_cents: 84_999,
            price: PriceRef::Stripe("price_pro".to_string()),
            recurring: false,
        };
        let stripe_item = to_stripe_line_item(&item);
        assert_eq!(stripe_item.price.as_deref(), Some("price_pro"));
        assert!(stripe_item.price_data.is_none());
    }
}
