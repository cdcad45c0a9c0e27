//! Plan and add-on catalog
//!
//! All amounts are integer cents (USD). Rush delivery and annual maintenance
//! prices are derived from the base amounts and rounded half-up to the cent.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

/// Website build plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanId {
    Starter,
    Pro,
    Premium,
    /// Private build, negotiated out of band
    CustomQuote,
}

impl PlanId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Starter => "starter",
            PlanId::Pro => "pro",
            PlanId::Premium => "premium",
            PlanId::CustomQuote => "custom-quote",
        }
    }

    /// Parse a plan id, accepting aliases case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "starter" => Some(PlanId::Starter),
            "pro" => Some(PlanId::Pro),
            "premium" => Some(PlanId::Premium),
            "custom-quote" | "custom" | "private-build" => Some(PlanId::CustomQuote),
            _ => None,
        }
    }

    pub fn is_custom_quote(&self) -> bool {
        matches!(self, PlanId::CustomQuote)
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub id: PlanId,
    pub name: &'static str,
    pub description: &'static str,
    pub base_cents: i64,
}

impl Plan {
    /// Base price, rush-adjusted when requested
    pub fn price_cents(&self, rush_delivery: bool) -> i64 {
        if rush_delivery {
            rush_price(self.base_cents)
        } else {
            self.base_cents
        }
    }
}

pub static PLANS: [Plan; 4] = [
    Plan {
        id: PlanId::Starter,
        name: "Starter",
        description: "A polished one-to-five page site for a new business",
        base_cents: 49_999,
    },
    Plan {
        id: PlanId::Pro,
        name: "Pro",
        description: "A full business site with booking, blog and analytics",
        base_cents: 84_999,
    },
    Plan {
        id: PlanId::Premium,
        name: "Premium",
        description: "A custom-designed site with advanced integrations",
        base_cents: 149_999,
    },
    Plan {
        id: PlanId::CustomQuote,
        name: "Private Build",
        description: "Custom scope, quoted separately",
        base_cents: 0,
    },
];

/// Add-on id of the recurring care plan
pub const MAINTENANCE: &str = "maintenance";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOn {
    pub id: &'static str,
    pub name: &'static str,
    /// One-time price, or the monthly price for recurring add-ons
    pub price_cents: i64,
    pub recurring: bool,
}

/// Catalog order is the order line items are emitted in
pub static ADD_ONS: [AddOn; 7] = [
    AddOn {
        id: "googleBusiness",
        name: "Google Business Profile setup",
        price_cents: 12_999,
        recurring: false,
    },
    AddOn {
        id: "seoSetup",
        name: "SEO setup",
        price_cents: 19_999,
        recurring: false,
    },
    AddOn {
        id: "logoDesign",
        name: "Logo design",
        price_cents: 24_999,
        recurring: false,
    },
    AddOn {
        id: "copywriting",
        name: "Professional copywriting",
        price_cents: 29_999,
        recurring: false,
    },
    AddOn {
        id: "extraPages",
        name: "Additional pages pack",
        price_cents: 14_999,
        recurring: false,
    },
    AddOn {
        id: "ecommerce",
        name: "Online store",
        price_cents: 39_999,
        recurring: false,
    },
    AddOn {
        id: MAINTENANCE,
        name: "Website care plan",
        price_cents: 4_999,
        recurring: true,
    },
];

/// How the maintenance add-on is billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceBilling {
    #[default]
    Monthly,
    Annual,
}

impl MaintenanceBilling {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceBilling::Monthly => "monthly",
            MaintenanceBilling::Annual => "annual",
        }
    }
}

/// Look up a plan by id or alias
pub fn plan(id: &str) -> Option<&'static Plan> {
    let id = PlanId::parse(id)?;
    PLANS.iter().find(|p| p.id == id)
}

/// Look up an add-on by its exact id
pub fn add_on(id: &str) -> Option<&'static AddOn> {
    ADD_ONS.iter().find(|a| a.id == id)
}

/// Resolve add-on ids in catalog order, counting duplicates once.
/// Unknown ids are rejected rather than dropped.
pub fn resolve_add_ons<S: AsRef<str>>(ids: &[S]) -> BillingResult<Vec<&'static AddOn>> {
    let mut positions = BTreeSet::new();
    for id in ids {
        let id = id.as_ref();
        let pos = ADD_ONS
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| BillingError::InvalidInput(format!("Unknown add-on: {}", id)))?;
        positions.insert(pos);
    }
    Ok(positions.into_iter().map(|pos| &ADD_ONS[pos]).collect())
}

/// Base price plus 20%, half-up to the cent
pub fn rush_price(base_cents: i64) -> i64 {
    (base_cents * 120 + 50) / 100
}

/// Twelve months at a 10% discount, half-up to the cent
pub fn annual_maintenance_price(monthly_cents: i64) -> i64 {
    (monthly_cents * 108 + 5) / 10
}

/// Price of one add-on under the chosen maintenance billing
pub fn add_on_price(add_on: &AddOn, billing: MaintenanceBilling) -> i64 {
    if add_on.recurring && billing == MaintenanceBilling::Annual {
        annual_maintenance_price(add_on.price_cents)
    } else {
        add_on.price_cents
    }
}

/// Total due at checkout in cents
pub fn calculate_total(
    plan: &Plan,
    rush_delivery: bool,
    add_ons: &[&AddOn],
    billing: MaintenanceBilling,
) -> i64 {
    let mut seen = BTreeSet::new();
    let add_ons_total: i64 = add_ons
        .iter()
        .filter(|a| seen.insert(a.id))
        .map(|a| add_on_price(a, billing))
        .sum();

    plan.price_cents(rush_delivery) + add_ons_total
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_lookup_resolves_aliases() {
        assert_eq!(plan("PRO").unwrap().base_cents, 84_999);
        assert_eq!(plan("custom").unwrap().id, PlanId::CustomQuote);
        assert_eq!(plan("private-build").unwrap().id, PlanId::CustomQuote);
        assert!(plan("enterprise").is_none());
    }

    #[test]
    fn test_rush_price_rounds_half_up() {
        assert_eq!(rush_price(84_999), 101_999);
        assert_eq!(rush_price(49_999), 59_999);
        assert_eq!(rush_price(149_999), 179_999);
        assert_eq!(rush_price(0), 0);
    }

    #[test]
    fn test_annual_maintenance_is_twelve_months_less_ten_percent() {
        assert_eq!(annual_maintenance_price(4_999), 53_989);
        assert_eq!(annual_maintenance_price(1_000), 10_800);
    }

    #[test]
    fn test_pro_rush_google_business_total() {
        let pro = plan("pro").unwrap();
        let add_ons = resolve_add_ons(&["googleBusiness"]).unwrap();
        assert_eq!(
            calculate_total(pro, true, &add_ons, MaintenanceBilling::Monthly),
            114_998
        );
    }

    #[test]
    fn test_duplicate_add_ons_counted_once() {
        let starter = plan("starter").unwrap();
        let add_ons = resolve_add_ons(&["seoSetup", "seoSetup", "logoDesign"]).unwrap();
        assert_eq!(add_ons.len(), 2);

        let doubled = [add_ons[0], add_ons[0], add_ons[1]];
        assert_eq!(
            calculate_total(starter, false, &doubled, MaintenanceBilling::Monthly),
            49_999 + 19_999 + 24_999
        );
    }

    #[test]
    fn test_resolve_add_ons_uses_catalog_order() {
        let add_ons = resolve_add_ons(&[MAINTENANCE, "ecommerce", "googleBusiness"]).unwrap();
        let ids: Vec<_> = add_ons.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["googleBusiness", "ecommerce", MAINTENANCE]);
    }

    #[test]
    fn test_unknown_add_on_rejected() {
        let err = resolve_add_ons(&["googleBusiness", "jetpack"]).unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(msg) if msg.contains("jetpack")));
    }

    #[test]
    fn test_maintenance_priced_by_billing_branch() {
        let premium = plan("premium").unwrap();
        let add_ons = resolve_add_ons(&[MAINTENANCE]).unwrap();
        assert_eq!(
            calculate_total(premium, false, &add_ons, MaintenanceBilling::Monthly),
            149_999 + 4_999
        );
        assert_eq!(
            calculate_total(premium, false, &add_ons, MaintenanceBilling::Annual),
            149_999 + 53_989
        );
    }
}
