//! Fulfillment of completed checkouts
//!
//! A `checkout.session.completed` event is turned into a Customer and a
//! Project (one transaction), followed by the welcome and payment
//! confirmation emails. The pipeline never leaves a paying customer without
//! a message: if the database is unavailable the payment confirmation is
//! still sent from session data alone, and the failure is logged at error
//! severity for manual reconciliation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dolo_shared::{Customer, NewCustomer, NewProject, Project, ProjectStatus};
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use time::{Date, Month, OffsetDateTime};
use uuid::Uuid;

use crate::client::PaymentGateway;
use crate::email::Notifier;
use crate::error::{BillingError, BillingResult};
use crate::metadata::{self, DetailsParse};
use crate::templates::TemplateId;

/// Events stuck in `processing` longer than this may be claimed again
pub const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Months an access token stays valid
pub const ACCESS_TOKEN_VALID_MONTHS: u8 = 6;

// =============================================================================
// Session payload
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionCustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// The fields of a completed checkout session that fulfillment reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CompletedSession {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_details: Option<SessionCustomerDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub payment_status: Option<String>,
}

impl CompletedSession {
    fn details_email(&self) -> Option<String> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.clone())
            .filter(|e| !e.trim().is_empty())
    }

    fn details_name(&self) -> Option<String> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.name.clone())
            .filter(|n| !n.trim().is_empty())
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This worker owns the event
    Claimed,
    /// Already handled or in flight elsewhere
    Duplicate(String),
}

/// Result of writing a purchase
#[derive(Debug, Clone)]
pub struct PurchaseRecord {
    pub customer: Customer,
    pub project: Project,
    /// False when a project for the session already existed
    pub created: bool,
}

#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    /// Atomically claim exclusive processing rights for a webhook event
    async fn claim_event(
        &self,
        event_id: &str,
        event_type: &str,
        event_created: OffsetDateTime,
    ) -> BillingResult<ClaimOutcome>;

    /// Record the processing result of a claimed event
    async fn finish_event(&self, event_id: &str, error: Option<&str>) -> BillingResult<()>;

    /// Upsert the customer and create the project in one transaction
    async fn record_purchase(
        &self,
        customer: &NewCustomer,
        project: &NewProject,
    ) -> BillingResult<PurchaseRecord>;

    async fn find_purchase_by_session(
        &self,
        session_id: &str,
    ) -> BillingResult<Option<(Customer, Project)>>;

    async fn find_customer_by_token(
        &self,
        access_token: &str,
    ) -> BillingResult<Option<(Customer, Vec<Project>)>>;
}

const CUSTOMER_COLUMNS: &str = "id, stripe_customer_id, name, email, company, phone, \
     access_token, access_token_expires_at, created_at";

const PROJECT_COLUMNS: &str = "id, customer_id, stripe_session_id, project_type, amount, currency, \
     rush_delivery, add_ons, details, details_raw, status, created_at";

pub struct PgFulfillmentStore {
    pool: PgPool,
}

impl PgFulfillmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn update_event(&self, event_id: &str, result: &str, error: Option<&str>) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(result)
        .bind(error)
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl FulfillmentStore for PgFulfillmentStore {
    async fn claim_event(
        &self,
        event_id: &str,
        event_type: &str,
        event_created: OffsetDateTime,
    ) -> BillingResult<ClaimOutcome> {
        // Only one concurrent request gets a row back. Events that errored, or
        // have sat in `processing` past the timeout, can be claimed again.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = NULL
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.processing_started_at < NOW() - ($4 || ' minutes')::INTERVAL)
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(event_created)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(ClaimOutcome::Claimed);
        }

        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT processing_result FROM stripe_webhook_events WHERE stripe_event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten();

        let reason = match existing {
            Some((status,)) if status == "success" => "already processed successfully",
            Some((status,)) if status == "processing" => "currently being processed",
            Some(_) => "exists with another status",
            None => "unknown",
        };
        Ok(ClaimOutcome::Duplicate(reason.to_string()))
    }

    async fn finish_event(&self, event_id: &str, error: Option<&str>) -> BillingResult<()> {
        let result = if error.is_some() { "error" } else { "success" };

        // Retry once: a lost update leaves the event looking stuck
        if let Err(e) = self.update_event(event_id, result, error).await {
            tracing::warn!(
                event_id = %event_id,
                error = %e,
                "First attempt to update webhook event failed, retrying"
            );
            self.update_event(event_id, result, error).await?;
        }
        Ok(())
    }

    async fn record_purchase(
        &self,
        customer: &NewCustomer,
        project: &NewProject,
    ) -> BillingResult<PurchaseRecord> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Project> = sqlx::query_as(&format!(
            "SELECT {} FROM projects WHERE stripe_session_id = $1",
            PROJECT_COLUMNS
        ))
        .bind(&project.stripe_session_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = existing {
            let owner: Customer = sqlx::query_as(&format!(
                "SELECT {} FROM customers WHERE id = $1",
                CUSTOMER_COLUMNS
            ))
            .bind(existing.customer_id)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Ok(PurchaseRecord {
                customer: owner,
                project: existing,
                created: false,
            });
        }

        let saved_customer: Customer = sqlx::query_as(&format!(
            r#"
            INSERT INTO customers
                (stripe_customer_id, name, email, company, phone, access_token, access_token_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (stripe_customer_id) DO UPDATE SET
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                company = COALESCE(EXCLUDED.company, customers.company),
                phone = COALESCE(EXCLUDED.phone, customers.phone),
                access_token = EXCLUDED.access_token,
                access_token_expires_at = EXCLUDED.access_token_expires_at
            RETURNING {}
            "#,
            CUSTOMER_COLUMNS
        ))
        .bind(&customer.stripe_customer_id)
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.company)
        .bind(&customer.phone)
        .bind(&customer.access_token)
        .bind(customer.access_token_expires_at)
        .fetch_one(&mut *tx)
        .await?;

        // projects.stripe_session_id is UNIQUE; a concurrent delivery that got
        // past the SELECT above lands here and loses the insert.
        let saved_project: Option<Project> = sqlx::query_as(&format!(
            r#"
            INSERT INTO projects
                (customer_id, stripe_session_id, project_type, amount, currency,
                 rush_delivery, add_ons, details, details_raw, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (stripe_session_id) DO NOTHING
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        ))
        .bind(saved_customer.id)
        .bind(&project.stripe_session_id)
        .bind(&project.project_type)
        .bind(project.amount)
        .bind(&project.currency)
        .bind(project.rush_delivery)
        .bind(&project.add_ons)
        .bind(&project.details)
        .bind(&project.details_raw)
        .bind(ProjectStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(saved_project) = saved_project else {
            // Keep the winner's access token; the customer upsert is undone too
            tx.rollback().await?;
            tracing::info!(
                session_id = %project.stripe_session_id,
                "Purchase recorded concurrently, returning existing project"
            );
            let (owner, existing) = self
                .find_purchase_by_session(&project.stripe_session_id)
                .await?
                .ok_or_else(|| {
                    BillingError::Database(format!(
                        "project for session {} conflicted but was not found",
                        project.stripe_session_id
                    ))
                })?;
            return Ok(PurchaseRecord {
                customer: owner,
                project: existing,
                created: false,
            });
        };

        tx.commit().await?;

        Ok(PurchaseRecord {
            customer: saved_customer,
            project: saved_project,
            created: true,
        })
    }

    async fn find_purchase_by_session(
        &self,
        session_id: &str,
    ) -> BillingResult<Option<(Customer, Project)>> {
        let project: Option<Project> = sqlx::query_as(&format!(
            "SELECT {} FROM projects WHERE stripe_session_id = $1",
            PROJECT_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(project) = project else {
            return Ok(None);
        };

        let customer: Option<Customer> = sqlx::query_as(&format!(
            "SELECT {} FROM customers WHERE id = $1",
            CUSTOMER_COLUMNS
        ))
        .bind(project.customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer.map(|c| (c, project)))
    }

    async fn find_customer_by_token(
        &self,
        access_token: &str,
    ) -> BillingResult<Option<(Customer, Vec<Project>)>> {
        let customer: Option<Customer> = sqlx::query_as(&format!(
            "SELECT {} FROM customers WHERE access_token = $1",
            CUSTOMER_COLUMNS
        ))
        .bind(access_token)
        .fetch_optional(&self.pool)
        .await?;

        let Some(customer) = customer else {
            return Ok(None);
        };

        let projects: Vec<Project> = sqlx::query_as(&format!(
            "SELECT {} FROM projects WHERE customer_id = $1 ORDER BY created_at DESC",
            PROJECT_COLUMNS
        ))
        .bind(customer.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some((customer, projects)))
    }
}

/// Stands in for Postgres when no database is configured; every call fails
pub struct UnavailableFulfillmentStore;

fn unavailable<T>() -> BillingResult<T> {
    Err(BillingError::Database("database is not configured".to_string()))
}

#[async_trait]
impl FulfillmentStore for UnavailableFulfillmentStore {
    async fn claim_event(&self, _: &str, _: &str, _: OffsetDateTime) -> BillingResult<ClaimOutcome> {
        unavailable()
    }

    async fn finish_event(&self, _: &str, _: Option<&str>) -> BillingResult<()> {
        unavailable()
    }

    async fn record_purchase(&self, _: &NewCustomer, _: &NewProject) -> BillingResult<PurchaseRecord> {
        unavailable()
    }

    async fn find_purchase_by_session(&self, _: &str) -> BillingResult<Option<(Customer, Project)>> {
        unavailable()
    }

    async fn find_customer_by_token(
        &self,
        _: &str,
    ) -> BillingResult<Option<(Customer, Vec<Project>)>> {
        unavailable()
    }
}

// =============================================================================
// Access tokens
// =============================================================================

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// `<base36 unix millis>_<32 hex chars>` from OS randomness
pub fn generate_access_token(now: OffsetDateTime) -> String {
    let millis = (now.unix_timestamp_nanos() / 1_000_000).max(0) as u64;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{}_{}", to_base36(millis), hex::encode(bytes))
}

/// Same time of day `months` calendar months later, clamping the day to the
/// end of a shorter month
pub fn add_calendar_months(at: OffsetDateTime, months: u8) -> OffsetDateTime {
    let zero_based = at.month() as i32 - 1 + months as i32;
    let year = at.year() + zero_based / 12;
    let month = Month::try_from((zero_based % 12 + 1) as u8).unwrap_or(at.month());
    let day = at.day().min(time::util::days_in_year_month(year, month));
    match Date::from_calendar_date(year, month, day) {
        Ok(date) => at.replace_date(date),
        Err(_) => at,
    }
}

// =============================================================================
// Fan-out
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// Customer and project saved, emails attempted
    Completed {
        customer_id: Uuid,
        project_id: Uuid,
        welcome_sent: bool,
        confirmation_sent: bool,
    },
    /// Redelivered event; nothing done
    Duplicate,
    /// Database unavailable; fallback confirmation attempted
    Degraded { fallback_email_sent: bool },
    /// No email address anywhere; nothing can be sent
    Aborted { reason: String },
}

pub struct FulfillmentService {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn FulfillmentStore>,
    notifier: Notifier,
}

struct ResolvedContact {
    email: String,
    name: String,
    phone: Option<String>,
}

impl FulfillmentService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn FulfillmentStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            gateway,
            store,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn FulfillmentStore> {
        &self.store
    }

    /// Customer email from Stripe, falling back to the session's details
    async fn resolve_contact(&self, session: &CompletedSession) -> Option<ResolvedContact> {
        let customer = match &session.customer {
            Some(customer_id) => match self.gateway.retrieve_customer(customer_id).await {
                Ok(customer) => Some(customer),
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.id,
                        customer_id = %customer_id,
                        error = %e,
                        "Could not retrieve Stripe customer, using session details"
                    );
                    None
                }
            },
            None => None,
        };

        let email = customer
            .as_ref()
            .and_then(|c| c.email.clone())
            .filter(|e| !e.trim().is_empty())
            .or_else(|| session.details_email())?;

        let name = customer
            .as_ref()
            .and_then(|c| c.name.clone())
            .filter(|n| !n.trim().is_empty())
            .or_else(|| session.details_name())
            .unwrap_or_else(|| "Customer".to_string());

        let phone = customer
            .and_then(|c| c.phone)
            .or_else(|| session.customer_details.as_ref().and_then(|d| d.phone.clone()));

        Some(ResolvedContact { email, name, phone })
    }

    /// Fulfill a completed checkout session delivered as `event_id`
    pub async fn fulfill(
        &self,
        event_id: &str,
        event_type: &str,
        event_created: OffsetDateTime,
        session: &CompletedSession,
    ) -> FulfillmentOutcome {
        let database_ok = match self
            .store
            .claim_event(event_id, event_type, event_created)
            .await
        {
            Ok(ClaimOutcome::Claimed) => true,
            Ok(ClaimOutcome::Duplicate(reason)) => {
                tracing::info!(
                    event_id = %event_id,
                    session_id = %session.id,
                    reason = %reason,
                    "Duplicate webhook event, skipping"
                );
                return FulfillmentOutcome::Duplicate;
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event_id,
                    session_id = %session.id,
                    error = %e,
                    "Failed to claim webhook event"
                );
                false
            }
        };

        let Some(contact) = self.resolve_contact(session).await else {
            let reason = "no customer email on Stripe customer or session".to_string();
            tracing::error!(
                event_id = %event_id,
                session_id = %session.id,
                amount_total = ?session.amount_total,
                "Paid checkout has no email address; customer cannot be contacted"
            );
            if database_ok {
                self.finish(event_id, Some(&reason)).await;
            }
            return FulfillmentOutcome::Aborted { reason };
        };

        let parsed = metadata::parse_metadata(&session.metadata);
        if let DetailsParse::Invalid { reason, .. } = &parsed {
            tracing::warn!(
                event_id = %event_id,
                session_id = %session.id,
                reason = %reason,
                "Project details metadata unreadable, keeping raw copy"
            );
        }

        if !database_ok {
            return self.degrade(session, &contact, &parsed).await;
        }

        let now = OffsetDateTime::now_utc();
        let (new_customer, new_project) = build_records(session, &contact, &parsed, now);

        let record = match self.store.record_purchase(&new_customer, &new_project).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    event_id = %event_id,
                    session_id = %session.id,
                    stripe_customer_id = %new_customer.stripe_customer_id,
                    email = %contact.email,
                    amount_total = ?session.amount_total,
                    error = %e,
                    "Payment received but purchase could not be saved; manual reconciliation required"
                );
                self.finish(event_id, Some(&e.to_string())).await;
                return self.degrade(session, &contact, &parsed).await;
            }
        };

        if !record.created {
            tracing::info!(
                event_id = %event_id,
                session_id = %session.id,
                project_id = %record.project.id,
                "Project already exists for session, skipping emails"
            );
            self.finish(event_id, None).await;
            return FulfillmentOutcome::Duplicate;
        }

        tracing::info!(
            event_id = %event_id,
            session_id = %session.id,
            customer_id = %record.customer.id,
            project_id = %record.project.id,
            "Recorded purchase"
        );

        let welcome_sent = self
            .notifier
            .send_template(
                TemplateId::Welcome,
                &contact.email,
                &json!({
                    "customerName": record.customer.name,
                    "projectType": record.project.project_type,
                    "accessToken": record.customer.access_token,
                }),
                Some(record.customer.id),
            )
            .await;

        let confirmation_sent = self
            .notifier
            .send_template(
                TemplateId::PaymentConfirmation,
                &contact.email,
                &confirmation_data(session, &contact, &parsed, Some(record.project.id)),
                Some(record.customer.id),
            )
            .await;

        self.finish(event_id, None).await;

        FulfillmentOutcome::Completed {
            customer_id: record.customer.id,
            project_id: record.project.id,
            welcome_sent,
            confirmation_sent,
        }
    }

    async fn degrade(
        &self,
        session: &CompletedSession,
        contact: &ResolvedContact,
        parsed: &DetailsParse,
    ) -> FulfillmentOutcome {
        let fallback_email_sent = self
            .notifier
            .send_template(
                TemplateId::PaymentConfirmation,
                &contact.email,
                &confirmation_data(session, contact, parsed, None),
                None,
            )
            .await;

        if !fallback_email_sent {
            tracing::error!(
                session_id = %session.id,
                email = %contact.email,
                "Fallback payment confirmation could not be sent"
            );
        }

        FulfillmentOutcome::Degraded {
            fallback_email_sent,
        }
    }

    async fn finish(&self, event_id: &str, error: Option<&str>) {
        if let Err(e) = self.store.finish_event(event_id, error).await {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to update webhook audit record; event may appear stuck in processing"
            );
        }
    }
}

fn plan_of(session: &CompletedSession, parsed: &DetailsParse) -> String {
    parsed
        .envelope()
        .map(|e| e.plan.clone())
        .or_else(|| session.metadata.get("plan").cloned())
        .unwrap_or_else(|| "unknown".to_string())
}

fn rush_of(session: &CompletedSession, parsed: &DetailsParse) -> bool {
    parsed
        .envelope()
        .map(|e| e.rush_delivery)
        .unwrap_or_else(|| session.metadata.get("rush_delivery").map(String::as_str) == Some("true"))
}

fn add_ons_of(parsed: &DetailsParse) -> Vec<String> {
    parsed
        .envelope()
        .map(|e| e.add_ons.clone())
        .unwrap_or_default()
}

fn confirmation_data(
    session: &CompletedSession,
    contact: &ResolvedContact,
    parsed: &DetailsParse,
    project_id: Option<Uuid>,
) -> serde_json::Value {
    json!({
        "customerName": contact.name,
        "projectType": plan_of(session, parsed),
        "amountCents": session.amount_total,
        "currency": session.currency.clone().unwrap_or_else(|| "usd".to_string()),
        "rushDelivery": rush_of(session, parsed),
        "addOns": add_ons_of(parsed),
        "sessionId": session.id,
        "projectId": project_id.map(|id| id.to_string()),
    })
}

fn build_records(
    session: &CompletedSession,
    contact: &ResolvedContact,
    parsed: &DetailsParse,
    now: OffsetDateTime,
) -> (NewCustomer, NewProject) {
    let envelope = parsed.envelope();

    let customer = NewCustomer {
        stripe_customer_id: session
            .customer
            .clone()
            .unwrap_or_else(|| format!("guest_{}", session.id)),
        name: contact.name.clone(),
        email: contact.email.clone(),
        company: envelope.and_then(|e| e.contact.company.clone()),
        phone: contact
            .phone
            .clone()
            .or_else(|| envelope.and_then(|e| e.contact.phone.clone())),
        access_token: generate_access_token(now),
        access_token_expires_at: add_calendar_months(now, ACCESS_TOKEN_VALID_MONTHS),
    };

    let parse_status = match parsed {
        DetailsParse::Parsed(_) => "parsed",
        DetailsParse::Missing => "missing",
        DetailsParse::Invalid { .. } => "invalid",
    };

    let project = NewProject {
        stripe_session_id: session.id.clone(),
        project_type: plan_of(session, parsed),
        amount: dolo_shared::minor_to_major(session.amount_total.unwrap_or(0)),
        currency: session.currency.clone().unwrap_or_else(|| "usd".to_string()),
        rush_delivery: rush_of(session, parsed),
        add_ons: json!(add_ons_of(parsed)),
        details: json!({
            "sessionId": session.id,
            "metadata": session.metadata,
            "metadataStatus": parse_status,
            "form": envelope,
        }),
        details_raw: parsed.raw().map(str::to_string),
    };

    (customer, project)
}
