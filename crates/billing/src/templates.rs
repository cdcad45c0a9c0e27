//! Transactional email templates
//!
//! Pure rendering: `(template, data) -> subject + html`. Bodies are Askama
//! templates under `templates/email/`, so every value taken from `data` is
//! HTML-escaped on output. Absent optional fields render a readable
//! placeholder instead of an empty or missing value.

use std::str::FromStr;

use askama::Template;
use serde_json::Value;

use crate::catalog;
use crate::error::BillingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    Welcome,
    PaymentConfirmation,
    ProjectStarted,
    ProjectCompleted,
    ContactNotification,
    PrivateBuildApplication,
    QuizResult,
}

impl TemplateId {
    pub const ALL: [TemplateId; 7] = [
        TemplateId::Welcome,
        TemplateId::PaymentConfirmation,
        TemplateId::ProjectStarted,
        TemplateId::ProjectCompleted,
        TemplateId::ContactNotification,
        TemplateId::PrivateBuildApplication,
        TemplateId::QuizResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::Welcome => "welcome",
            TemplateId::PaymentConfirmation => "payment-confirmation",
            TemplateId::ProjectStarted => "project-started",
            TemplateId::ProjectCompleted => "project-completed",
            TemplateId::ContactNotification => "contact-notification",
            TemplateId::PrivateBuildApplication => "private-build-application",
            TemplateId::QuizResult => "quiz-result",
        }
    }
}

impl FromStr for TemplateId {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TemplateId::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| BillingError::UnknownTemplate(s.to_string()))
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Branding shared by every template
#[derive(Debug, Clone)]
pub struct Branding {
    pub app_name: String,
    pub support_email: String,
    pub public_url: String,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            app_name: "Dolo".to_string(),
            support_email: "support@dolo.studio".to_string(),
            public_url: "https://dolo.studio".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

#[derive(Template)]
#[template(path = "email/layout.html")]
struct Layout<'a> {
    brand: &'a Branding,
    title: &'a str,
    /// Already-rendered (and escaped) body
    body: &'a str,
}

struct Row {
    label: &'static str,
    value: String,
}

impl Row {
    fn new(label: &'static str, value: impl Into<String>) -> Self {
        Self {
            label,
            value: value.into(),
        }
    }
}

#[derive(Template)]
#[template(path = "email/welcome.html")]
struct WelcomeBody<'a> {
    app_name: &'a str,
    name: String,
    plan: String,
    portal_url: Option<String>,
}

#[derive(Template)]
#[template(path = "email/payment_confirmation.html")]
struct PaymentConfirmationBody {
    name: String,
    rows: Vec<Row>,
}

#[derive(Template)]
#[template(path = "email/project_started.html")]
struct ProjectStartedBody {
    name: String,
    plan: String,
    delivery: String,
}

#[derive(Template)]
#[template(path = "email/project_completed.html")]
struct ProjectCompletedBody<'a> {
    app_name: &'a str,
    name: String,
    plan: String,
    site_url: Option<String>,
}

/// Studio-facing notification: a details table plus the free-text field
#[derive(Template)]
#[template(path = "email/submission.html")]
struct SubmissionBody {
    intro: &'static str,
    rows: Vec<Row>,
    message: String,
}

#[derive(Template)]
#[template(path = "email/quiz_result.html")]
struct QuizResultBody {
    name: String,
    plan: String,
    description: String,
    start_url: String,
}

/// Trimmed string form of a field; null and blank count as absent
fn raw(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "Yes" } else { "No" }.to_string()),
        _ => None,
    }
}

fn text(data: &Value, key: &str, placeholder: &str) -> String {
    raw(data, key).unwrap_or_else(|| placeholder.to_string())
}

fn flag(data: &Value, key: &str) -> bool {
    match data.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

fn list(data: &Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn first_name(data: &Value, key: &str) -> String {
    raw(data, key)
        .and_then(|n| n.split_whitespace().next().map(str::to_string))
        .unwrap_or_else(|| "there".to_string())
}

fn plan_name(data: &Value, key: &str, fallback: &str) -> String {
    match raw(data, key) {
        Some(id) => catalog::plan(&id).map(|p| p.name.to_string()).unwrap_or(id),
        None => fallback.to_string(),
    }
}

fn add_on_names(data: &Value) -> Vec<String> {
    list(data, "addOns")
        .iter()
        .map(|id| catalog::add_on(id).map(|a| a.name).unwrap_or(id.as_str()).to_string())
        .collect()
}

fn amount(data: &Value) -> String {
    data.get("amountCents")
        .and_then(Value::as_i64)
        .map(dolo_shared::format_usd)
        .unwrap_or_else(|| "Amount shown on your receipt".to_string())
}

fn joined_or(items: Vec<String>, empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join(", ")
    }
}

fn site_link(brand: &Branding, path: &str) -> String {
    format!("{}{}", brand.public_url.trim_end_matches('/'), path)
}

fn page(
    brand: &Branding,
    title: &str,
    subject: String,
    body: impl Template,
) -> Result<RenderedEmail, BillingError> {
    let body = body.render()?;
    let html = Layout {
        brand,
        title,
        body: &body,
    }
    .render()?;
    Ok(RenderedEmail { subject, html })
}

/// Render a template by its string id; unknown ids are an error
pub fn render_named(
    template: &str,
    data: &Value,
    brand: &Branding,
) -> Result<RenderedEmail, BillingError> {
    render(template.parse()?, data, brand)
}

pub fn render(
    template: TemplateId,
    data: &Value,
    brand: &Branding,
) -> Result<RenderedEmail, BillingError> {
    match template {
        TemplateId::Welcome => {
            let name = first_name(data, "customerName");
            let portal_url = raw(data, "accessToken").map(|token| {
                let token: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
                site_link(brand, &format!("/portal/{}", token))
            });
            page(
                brand,
                "Welcome aboard",
                format!("Welcome to {}, {}!", brand.app_name, name),
                WelcomeBody {
                    app_name: &brand.app_name,
                    name,
                    plan: plan_name(data, "projectType", "website"),
                    portal_url,
                },
            )
        }
        TemplateId::PaymentConfirmation => {
            let rows = vec![
                Row::new("Plan", plan_name(data, "projectType", "website")),
                Row::new("Amount paid", amount(data)),
                Row::new(
                    "Rush delivery",
                    if flag(data, "rushDelivery") { "Yes" } else { "No" },
                ),
                Row::new("Add-ons", joined_or(add_on_names(data), "None")),
                Row::new("Order reference", text(data, "sessionId", "Pending")),
            ];
            page(
                brand,
                "Payment confirmed",
                format!(
                    "Payment received - {} Website",
                    plan_name(data, "projectType", "Website")
                ),
                PaymentConfirmationBody {
                    name: first_name(data, "customerName"),
                    rows,
                },
            )
        }
        TemplateId::ProjectStarted => {
            let plan = plan_name(data, "projectType", "website");
            page(
                brand,
                "Your project has started",
                format!(
                    "Your {} build has started",
                    plan_name(data, "projectType", "Website")
                ),
                ProjectStartedBody {
                    name: first_name(data, "customerName"),
                    plan,
                    delivery: text(
                        data,
                        "estimatedDelivery",
                        "We'll confirm your timeline shortly",
                    ),
                },
            )
        }
        TemplateId::ProjectCompleted => page(
            brand,
            "Your website is live",
            "Your website is live!".to_string(),
            ProjectCompletedBody {
                app_name: &brand.app_name,
                name: first_name(data, "customerName"),
                plan: plan_name(data, "projectType", "website"),
                site_url: raw(data, "siteUrl"),
            },
        ),
        TemplateId::ContactNotification => page(
            brand,
            "New contact submission",
            format!(
                "New contact form submission from {}",
                text(data, "name", "a visitor")
            ),
            SubmissionBody {
                intro: "A new message arrived through the contact form.",
                rows: vec![
                    Row::new("Name", text(data, "name", "Not provided")),
                    Row::new("Email", text(data, "email", "Not provided")),
                    Row::new("Company", text(data, "company", "Not provided")),
                    Row::new("Phone", text(data, "phone", "Not provided")),
                    Row::new("Source", text(data, "source", "Website")),
                    Row::new("Submission", text(data, "submissionId", "Not saved")),
                ],
                message: text(data, "message", "(no message)"),
            },
        ),
        TemplateId::PrivateBuildApplication => page(
            brand,
            "Private build application",
            format!(
                "New private build application: {}",
                text(data, "name", "unnamed applicant")
            ),
            SubmissionBody {
                intro: "A new private build application was submitted.",
                rows: vec![
                    Row::new("Name", text(data, "name", "Not provided")),
                    Row::new("Email", text(data, "email", "Not provided")),
                    Row::new("Company", text(data, "company", "Not provided")),
                    Row::new("Phone", text(data, "phone", "Not provided")),
                    Row::new("Budget", text(data, "budget", "Not specified")),
                    Row::new("Timeline", text(data, "timeline", "Not specified")),
                    Row::new("Features", joined_or(list(data, "features"), "None listed")),
                ],
                message: text(data, "description", "No project description provided"),
            },
        ),
        TemplateId::QuizResult => {
            let plan_id = text(data, "recommendedPlan", "starter");
            let query = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("plan", &plan_id)
                .finish();
            page(
                brand,
                "Your plan recommendation",
                format!("Your {} plan recommendation", brand.app_name),
                QuizResultBody {
                    name: first_name(data, "name"),
                    plan: plan_name(data, "recommendedPlan", "website"),
                    description: raw(data, "recommendedPlan")
                        .and_then(|id| catalog::plan(&id))
                        .map(|p| p.description.to_string())
                        .unwrap_or_else(|| {
                            "Our team can help you choose the right fit.".to_string()
                        }),
                    start_url: site_link(brand, &format!("/start?{}", query)),
                },
            )
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const HOSTILE: &str = "<b>Tom & Jerry's</b>";

    #[test]
    fn test_every_template_renders_with_empty_data() {
        let brand = Branding::default();
        for id in TemplateId::ALL {
            for data in [json!({}), Value::Null, json!({ "name": null, "customerName": null })] {
                let email = render(id, &data, &brand).unwrap();
                assert!(!email.subject.trim().is_empty(), "{} subject", id);
                assert!(!email.html.trim().is_empty(), "{} html", id);
                assert!(!email.html.contains("undefined"), "{} html", id);
                assert!(!email.html.contains("null"), "{} html", id);
                assert!(!email.subject.contains("undefined"), "{} subject", id);
                assert!(email.html.contains("support@dolo.studio"));
            }
        }
    }

    #[test]
    fn test_template_ids_round_trip_and_unknown_fails() {
        for id in TemplateId::ALL {
            assert_eq!(id.as_str().parse::<TemplateId>().unwrap(), id);
        }
        let err = render_named("invoice", &json!({}), &Branding::default()).unwrap_err();
        assert!(matches!(err, BillingError::UnknownTemplate(t) if t == "invoice"));
    }

    #[test]
    fn test_values_are_escaped() {
        let data = json!({
            "name": "<script>alert('x')</script>",
            "email": "a@b.co",
            "message": "Tom & Jerry's \"bakery\"",
        });
        let email = render(TemplateId::ContactNotification, &data, &Branding::default()).unwrap();
        assert!(!email.html.contains("<script>"));
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(email.html.contains("Tom &amp; Jerry"));
        assert!(!email.html.contains("Jerry's"));
        assert!(!email.html.contains("\"bakery\""));
    }

    #[test]
    fn test_every_interpolated_field_is_escaped() {
        let data = json!({
            "customerName": HOSTILE,
            "name": HOSTILE,
            "email": HOSTILE,
            "company": HOSTILE,
            "phone": HOSTILE,
            "source": HOSTILE,
            "submissionId": HOSTILE,
            "message": HOSTILE,
            "budget": HOSTILE,
            "timeline": HOSTILE,
            "description": HOSTILE,
            "features": [HOSTILE],
            "projectType": HOSTILE,
            "addOns": [HOSTILE],
            "sessionId": HOSTILE,
            "estimatedDelivery": HOSTILE,
            "siteUrl": HOSTILE,
            "accessToken": HOSTILE,
            "recommendedPlan": HOSTILE,
        });
        let brand = Branding {
            app_name: HOSTILE.to_string(),
            support_email: HOSTILE.to_string(),
            public_url: HOSTILE.to_string(),
        };
        for id in TemplateId::ALL {
            let email = render(id, &data, &brand).unwrap();
            assert!(!email.html.contains("<b>"), "{} leaked markup", id);
            assert!(!email.html.contains("Tom & Jerry"), "{} leaked ampersand", id);
            assert!(email.html.contains("&lt;b&gt;Tom &amp; Jerry"), "{} dropped a value", id);
        }
    }

    #[test]
    fn test_quiz_link_encodes_plan() {
        let data = json!({ "name": "Ada", "recommendedPlan": "pro&admin=1 plan" });
        let email = render(TemplateId::QuizResult, &data, &Branding::default()).unwrap();
        assert!(email
            .html
            .contains("https://dolo.studio/start?plan=pro%26admin%3D1+plan"));

        let data = json!({ "recommendedPlan": "premium" });
        let email = render(TemplateId::QuizResult, &data, &Branding::default()).unwrap();
        assert!(email.html.contains("https://dolo.studio/start?plan=premium"));
    }

    #[test]
    fn test_payment_confirmation_shows_amount_and_add_ons() {
        let data = json!({
            "customerName": "Ada Lovelace",
            "projectType": "pro",
            "amountCents": 114998,
            "rushDelivery": true,
            "addOns": ["googleBusiness"],
            "sessionId": "cs_test_123",
        });
        let email =
            render(TemplateId::PaymentConfirmation, &data, &Branding::default()).unwrap();
        assert_eq!(email.subject, "Payment received - Pro Website");
        assert!(email.html.contains("$1,149.98"));
        assert!(email.html.contains("Google Business Profile setup"));
        assert!(email.html.contains("Hi Ada,"));
        assert!(email.html.contains("cs_test_123"));
    }

    #[test]
    fn test_welcome_links_portal_when_token_present() {
        let data = json!({ "customerName": "Grace", "accessToken": "abc_123" });
        let email = render(TemplateId::Welcome, &data, &Branding::default()).unwrap();
        assert!(email.html.contains("https://dolo.studio/portal/abc_123"));
        assert_eq!(email.subject, "Welcome to Dolo, Grace!");
    }
}
