//! Stripe Checkout sessions for website builds

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{self, AddOn, MaintenanceBilling, Plan, MAINTENANCE};
use crate::client::{
    CheckoutMode, CustomerContact, LineItem, PaymentGateway, PriceIds, PriceRef, SessionRequest,
    StripeConfig,
};
use crate::error::{BillingError, BillingResult};
use crate::metadata::{ProjectDetailsEnvelope, ENVELOPE_VERSION};

/// What the start form submits at checkout
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub plan: String,
    pub contact: CustomerContact,
    #[serde(default)]
    pub rush_delivery: bool,
    #[serde(default)]
    pub add_ons: Vec<String>,
    #[serde(default)]
    pub maintenance_billing: MaintenanceBilling,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    #[serde(default)]
    pub project_details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResult {
    pub session_id: String,
    pub redirect_url: String,
    pub customer_id: String,
    pub total_cents: i64,
}

/// Line items and mode for a checkout, before anything is sent to Stripe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutPlan {
    pub mode: CheckoutMode,
    pub line_items: Vec<LineItem>,
    pub total_cents: i64,
}

/// Build the line items for a plan and its add-ons.
///
/// Subscription mode is used exactly when maintenance is billed monthly; in
/// every other case maintenance (if chosen) is a one-time annual item.
pub fn build_line_items(
    prices: &PriceIds,
    plan: &Plan,
    rush_delivery: bool,
    add_ons: &[&AddOn],
    billing: MaintenanceBilling,
) -> CheckoutPlan {
    let mut line_items = Vec::with_capacity(add_ons.len() + 1);

    let plan_cents = plan.price_cents(rush_delivery);
    let plan_price = match prices.for_plan(plan.id, rush_delivery) {
        Some(id) => PriceRef::Stripe(id.to_string()),
        None => PriceRef::Inline {
            amount_cents: plan_cents,
        },
    };
    line_items.push(LineItem {
        name: if rush_delivery {
            format!("{} Website (Rush Delivery)", plan.name)
        } else {
            format!("{} Website", plan.name)
        },
        description: Some(plan.description.to_string()),
        amount_cents: plan_cents,
        price: plan_price,
        recurring: false,
    });

    let mut maintenance = None;
    for add_on in add_ons {
        if add_on.id == MAINTENANCE {
            maintenance = Some(*add_on);
            continue;
        }
        line_items.push(LineItem {
            name: add_on.name.to_string(),
            description: None,
            amount_cents: add_on.price_cents,
            price: PriceRef::Inline {
                amount_cents: add_on.price_cents,
            },
            recurring: false,
        });
    }

    let mut mode = CheckoutMode::Payment;
    if let Some(care) = maintenance {
        match billing {
            MaintenanceBilling::Monthly => {
                mode = CheckoutMode::Subscription;
                line_items.push(LineItem {
                    name: format!("{} (monthly)", care.name),
                    description: None,
                    amount_cents: care.price_cents,
                    price: match &prices.maintenance_monthly {
                        Some(id) => PriceRef::Stripe(id.clone()),
                        None => PriceRef::Inline {
                            amount_cents: care.price_cents,
                        },
                    },
                    recurring: true,
                });
            }
            MaintenanceBilling::Annual => {
                let annual = catalog::annual_maintenance_price(care.price_cents);
                line_items.push(LineItem {
                    name: format!("{} (12 months, 10% off)", care.name),
                    description: None,
                    amount_cents: annual,
                    price: PriceRef::Inline {
                        amount_cents: annual,
                    },
                    recurring: false,
                });
            }
        }
    }

    CheckoutPlan {
        mode,
        total_cents: catalog::calculate_total(plan, rush_delivery, add_ons, billing),
        line_items,
    }
}

fn validate_contact(contact: &CustomerContact) -> BillingResult<()> {
    if contact.name.trim().is_empty() {
        return Err(BillingError::InvalidInput("Name is required".to_string()));
    }
    if contact.email.trim().is_empty() {
        return Err(BillingError::InvalidInput("Email is required".to_string()));
    }
    if !dolo_shared::is_valid_email(&contact.email) {
        return Err(BillingError::InvalidInput(
            "Please enter a valid email address".to_string(),
        ));
    }
    Ok(())
}

/// Checkout service for creating Stripe checkout sessions
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    prices: PriceIds,
    public_url: String,
}

impl CheckoutService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, config: &StripeConfig) -> Self {
        Self {
            gateway,
            prices: config.price_ids.clone(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
        }
    }

    fn redirect_urls(&self, request: &CheckoutRequest) -> BillingResult<(String, String)> {
        let default_for = |path: &str| {
            (!self.public_url.is_empty()).then(|| format!("{}{}", self.public_url, path))
        };

        let success_url = request
            .success_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| default_for("/success?session_id={CHECKOUT_SESSION_ID}"))
            .ok_or_else(|| BillingError::CheckoutCreation("missing success URL".to_string()))?;
        let cancel_url = request
            .cancel_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| default_for("/start?canceled=true"))
            .ok_or_else(|| BillingError::CheckoutCreation("missing cancel URL".to_string()))?;

        Ok((success_url, cancel_url))
    }

    /// Create a Stripe customer and a checkout session for the request.
    ///
    /// A new customer is created for every checkout; the project-details
    /// snapshot is stored on both the customer and the session.
    pub async fn create_session(&self, request: &CheckoutRequest) -> BillingResult<CheckoutResult> {
        let plan = catalog::plan(&request.plan)
            .ok_or_else(|| BillingError::Config(format!("Unknown plan: {}", request.plan)))?;

        validate_contact(&request.contact)?;
        let add_ons = catalog::resolve_add_ons(&request.add_ons)?;
        let (success_url, cancel_url) = self.redirect_urls(request)?;

        let checkout = build_line_items(
            &self.prices,
            plan,
            request.rush_delivery,
            &add_ons,
            request.maintenance_billing,
        );

        let has_maintenance = add_ons.iter().any(|a| a.id == MAINTENANCE);
        let envelope = ProjectDetailsEnvelope {
            version: ENVELOPE_VERSION,
            plan: plan.id.as_str().to_string(),
            rush_delivery: request.rush_delivery,
            add_ons: add_ons.iter().map(|a| a.id.to_string()).collect(),
            maintenance: has_maintenance.then_some(request.maintenance_billing),
            contact: request.contact.clone(),
            details: request.project_details.clone(),
        };
        let metadata = envelope.to_metadata()?;

        let mut customer_metadata: HashMap<String, String> = metadata.clone();
        if let Some(company) = &request.contact.company {
            customer_metadata.insert("company".to_string(), company.clone());
        }
        customer_metadata.insert("source".to_string(), "dolo-checkout".to_string());

        let customer = self
            .gateway
            .create_customer(&request.contact, customer_metadata)
            .await?;

        let session = self
            .gateway
            .create_checkout_session(SessionRequest {
                customer_id: customer.id.clone(),
                mode: checkout.mode,
                line_items: checkout.line_items,
                success_url,
                cancel_url,
                metadata,
            })
            .await?;

        let redirect_url = session.url.ok_or_else(|| {
            BillingError::CheckoutCreation("Stripe returned no checkout URL".to_string())
        })?;

        tracing::info!(
            session_id = %session.id,
            customer_id = %customer.id,
            plan = %plan.id,
            rush_delivery = request.rush_delivery,
            mode = ?checkout.mode,
            total_cents = checkout.total_cents,
            "Created checkout session"
        );

        Ok(CheckoutResult {
            session_id: session.id,
            redirect_url,
            customer_id: customer.id,
            total_cents: checkout.total_cents,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::FakeGateway;

    fn config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: "whsec_test".to_string(),
            price_ids: PriceIds::default(),
            public_url: "https://dolo.example/".to_string(),
            timeout: crate::client::DEFAULT_TIMEOUT,
        }
    }

    fn request(plan: &str, add_ons: &[&str], billing: MaintenanceBilling) -> CheckoutRequest {
        CheckoutRequest {
            plan: plan.to_string(),
            contact: CustomerContact {
                name: "Ada Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                company: Some("Analytical Bakes".to_string()),
                phone: None,
            },
            rush_delivery: false,
            add_ons: add_ons.iter().map(|s| s.to_string()).collect(),
            maintenance_billing: billing,
            success_url: None,
            cancel_url: None,
            project_details: serde_json::json!({ "industry": "bakery" }),
        }
    }

    fn plan_items(add_ons: &[&str], billing: MaintenanceBilling) -> CheckoutPlan {
        let add_ons = catalog::resolve_add_ons(add_ons).unwrap();
        build_line_items(
            &PriceIds::default(),
            catalog::plan("starter").unwrap(),
            false,
            &add_ons,
            billing,
        )
    }

    #[test]
    fn test_monthly_maintenance_uses_subscription_mode() {
        let checkout = plan_items(&["seoSetup", MAINTENANCE], MaintenanceBilling::Monthly);
        assert_eq!(checkout.mode, CheckoutMode::Subscription);

        let recurring: Vec<_> = checkout.line_items.iter().filter(|i| i.recurring).collect();
        assert_eq!(recurring.len(), 1);
        assert_eq!(recurring[0].amount_cents, 4_999);
        assert!(!checkout
            .line_items
            .iter()
            .any(|i| i.amount_cents == catalog::annual_maintenance_price(4_999)));
    }

    #[test]
    fn test_annual_maintenance_is_one_time_payment() {
        let checkout = plan_items(&[MAINTENANCE], MaintenanceBilling::Annual);
        assert_eq!(checkout.mode, CheckoutMode::Payment);
        assert!(checkout.line_items.iter().all(|i| !i.recurring));
        assert_eq!(checkout.line_items.last().unwrap().amount_cents, 53_989);
        assert_eq!(checkout.total_cents, 49_999 + 53_989);
    }

    #[test]
    fn test_no_maintenance_is_payment_mode_regardless_of_billing() {
        let checkout = plan_items(&["logoDesign"], MaintenanceBilling::Monthly);
        assert_eq!(checkout.mode, CheckoutMode::Payment);
        assert_eq!(checkout.line_items.len(), 2);
    }

    #[test]
    fn test_line_items_sum_to_total() {
        let add_ons = catalog::resolve_add_ons(&["googleBusiness"]).unwrap();
        let checkout = build_line_items(
            &PriceIds::default(),
            catalog::plan("pro").unwrap(),
            true,
            &add_ons,
            MaintenanceBilling::Monthly,
        );
        let sum: i64 = checkout.line_items.iter().map(|i| i.amount_cents).sum();
        assert_eq!(sum, 114_998);
        assert_eq!(checkout.total_cents, 114_998);
        assert!(checkout.line_items[0].name.contains("Rush"));
    }

    #[test]
    fn test_configured_plan_price_is_used() {
        let prices = PriceIds {
            pro_rush: Some("price_pro_rush".to_string()),
            ..Default::default()
        };
        let checkout = build_line_items(
            &prices,
            catalog::plan("pro").unwrap(),
            true,
            &[],
            MaintenanceBilling::Monthly,
        );
        assert_eq!(
            checkout.line_items[0].price,
            PriceRef::Stripe("price_pro_rush".to_string())
        );
    }

    #[tokio::test]
    async fn test_create_session_creates_customer_and_session() {
        let gateway = Arc::new(FakeGateway::default());
        let service = CheckoutService::new(gateway.clone(), &config());

        let result = service
            .create_session(&request("pro", &["googleBusiness"], MaintenanceBilling::Monthly))
            .await
            .unwrap();

        assert_eq!(result.total_cents, 84_999 + 12_999);
        assert!(result.redirect_url.starts_with("https://checkout.stripe.test/"));

        let sessions = gateway.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(
            sessions[0].success_url,
            "https://dolo.example/success?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(sessions[0].cancel_url, "https://dolo.example/start?canceled=true");
        assert_eq!(sessions[0].metadata["plan"], "pro");
        assert_eq!(gateway.customers().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_plan_is_configuration_error() {
        let service = CheckoutService::new(Arc::new(FakeGateway::default()), &config());
        let err = service
            .create_session(&request("enterprise", &[], MaintenanceBilling::Monthly))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[tokio::test]
    async fn test_unknown_add_on_rejected_before_any_provider_call() {
        let gateway = Arc::new(FakeGateway::default());
        let service = CheckoutService::new(gateway.clone(), &config());
        let err = service
            .create_session(&request("starter", &["jetpack"], MaintenanceBilling::Monthly))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));
        assert!(gateway.customers().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_project_details_rejected_before_any_provider_call() {
        let gateway = Arc::new(FakeGateway::default());
        let service = CheckoutService::new(gateway.clone(), &config());
        let mut req = request("pro", &[], MaintenanceBilling::Monthly);
        req.project_details = serde_json::json!({ "description": "x".repeat(30_000) });

        let err = service.create_session(&req).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(msg) if msg.contains("too long")));
        assert!(gateway.customers().is_empty());
        assert!(gateway.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let service = CheckoutService::new(Arc::new(FakeGateway::default()), &config());
        let mut req = request("starter", &[], MaintenanceBilling::Monthly);
        req.contact.email = "not-an-email".to_string();
        let err = service.create_session(&req).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_redirect_url_is_checkout_creation_error() {
        let mut cfg = config();
        cfg.public_url = String::new();
        let service = CheckoutService::new(Arc::new(FakeGateway::default()), &cfg);
        let err = service
            .create_session(&request("starter", &[], MaintenanceBilling::Monthly))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::CheckoutCreation(_)));
    }

    #[tokio::test]
    async fn test_provider_failure_surfaces_as_stripe_error() {
        let gateway = Arc::new(FakeGateway::failing("card_declined"));
        let service = CheckoutService::new(gateway, &config());
        let err = service
            .create_session(&request("starter", &[], MaintenanceBilling::Monthly))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::StripeApi(_)));
    }

    #[tokio::test]
    async fn test_custom_quote_uses_zero_placeholder() {
        let gateway = Arc::new(FakeGateway::default());
        let service = CheckoutService::new(gateway.clone(), &config());
        let result = service
            .create_session(&request("custom", &[], MaintenanceBilling::Monthly))
            .await
            .unwrap();
        assert_eq!(result.total_cents, 0);
        assert_eq!(gateway.sessions()[0].line_items[0].amount_cents, 0);
    }
}
