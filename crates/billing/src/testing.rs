//! In-memory fakes for the billing seams
//!
//! Used by this crate's tests and, through the `testing` feature, by the API
//! router tests. Nothing here talks to Stripe, Resend or Postgres.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use dolo_shared::{Customer, EmailLogEntry, NewCustomer, NewProject, Project, ProjectStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::{
    CreatedSession, CustomerContact, GatewayCustomer, PaymentGateway, SessionRequest,
    SessionSummary,
};
use crate::email::{EmailError, EmailLogStore, EmailSender, OutgoingEmail, SendReceipt};
use crate::error::{BillingError, BillingResult};
use crate::fulfillment::{ClaimOutcome, FulfillmentStore, PurchaseRecord};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Payment gateway
// =============================================================================

#[derive(Default)]
pub struct FakeGateway {
    failure: Option<String>,
    customers: Mutex<HashMap<String, GatewayCustomer>>,
    created_customers: Mutex<Vec<(CustomerContact, HashMap<String, String>)>>,
    sessions: Mutex<Vec<SessionRequest>>,
    summaries: Mutex<HashMap<String, SessionSummary>>,
}

impl FakeGateway {
    /// Every call fails with a Stripe error carrying `message`
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn insert_customer(&self, customer: GatewayCustomer) {
        lock(&self.customers).insert(customer.id.clone(), customer);
    }

    pub fn insert_session(&self, summary: SessionSummary) {
        lock(&self.summaries).insert(summary.id.clone(), summary);
    }

    /// Customers created through the gateway, with their metadata
    pub fn customers(&self) -> Vec<(CustomerContact, HashMap<String, String>)> {
        lock(&self.created_customers).clone()
    }

    pub fn sessions(&self) -> Vec<SessionRequest> {
        lock(&self.sessions).clone()
    }

    fn check(&self) -> BillingResult<()> {
        match &self.failure {
            Some(message) => Err(BillingError::StripeApi(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_customer(
        &self,
        contact: &CustomerContact,
        metadata: HashMap<String, String>,
    ) -> BillingResult<GatewayCustomer> {
        self.check()?;
        let mut created = lock(&self.created_customers);
        let customer = GatewayCustomer {
            id: format!("cus_test_{}", created.len() + 1),
            email: Some(contact.email.clone()),
            name: Some(contact.name.clone()),
            phone: contact.phone.clone(),
        };
        created.push((contact.clone(), metadata));
        lock(&self.customers).insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn create_checkout_session(
        &self,
        request: SessionRequest,
    ) -> BillingResult<CreatedSession> {
        self.check()?;
        let mut sessions = lock(&self.sessions);
        let id = format!("cs_test_{}", sessions.len() + 1);
        sessions.push(request);
        Ok(CreatedSession {
            url: Some(format!("https://checkout.stripe.test/{}", id)),
            id,
        })
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<GatewayCustomer> {
        self.check()?;
        lock(&self.customers)
            .get(customer_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("customer {}", customer_id)))
    }

    async fn retrieve_session(&self, session_id: &str) -> BillingResult<SessionSummary> {
        self.check()?;
        lock(&self.summaries)
            .get(session_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("checkout session {}", session_id)))
    }
}

// =============================================================================
// Fulfillment store
// =============================================================================

#[derive(Default)]
struct StoreState {
    events: HashMap<String, String>,
    customers: Vec<Customer>,
    projects: Vec<Project>,
}

#[derive(Default)]
pub struct MemoryFulfillmentStore {
    fail_writes: bool,
    unavailable: bool,
    state: Mutex<StoreState>,
}

impl MemoryFulfillmentStore {
    /// Claims succeed, purchase writes fail
    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    /// Every call fails, as with no database configured
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn customers(&self) -> Vec<Customer> {
        lock(&self.state).customers.clone()
    }

    pub fn projects(&self) -> Vec<Project> {
        lock(&self.state).projects.clone()
    }

    pub fn event_status(&self, event_id: &str) -> Option<String> {
        lock(&self.state).events.get(event_id).cloned()
    }

    /// Insert a customer with projects directly
    pub fn seed(&self, customer: Customer, projects: Vec<Project>) {
        let mut state = lock(&self.state);
        state.customers.push(customer);
        state.projects.extend(projects);
    }

    fn available(&self) -> BillingResult<()> {
        if self.unavailable {
            return Err(BillingError::Database("database is not configured".to_string()));
        }
        Ok(())
    }
}

/// A customer row as Postgres would return it
pub fn customer_row(new: &NewCustomer) -> Customer {
    Customer {
        id: Uuid::new_v4(),
        stripe_customer_id: new.stripe_customer_id.clone(),
        name: new.name.clone(),
        email: new.email.clone(),
        company: new.company.clone(),
        phone: new.phone.clone(),
        access_token: new.access_token.clone(),
        access_token_expires_at: new.access_token_expires_at,
        created_at: OffsetDateTime::now_utc(),
    }
}

/// A project row as Postgres would return it
pub fn project_row(customer_id: Uuid, new: &NewProject) -> Project {
    Project {
        id: Uuid::new_v4(),
        customer_id,
        stripe_session_id: new.stripe_session_id.clone(),
        project_type: new.project_type.clone(),
        amount: new.amount,
        currency: new.currency.clone(),
        rush_delivery: new.rush_delivery,
        add_ons: new.add_ons.clone(),
        details: new.details.clone(),
        details_raw: new.details_raw.clone(),
        status: ProjectStatus::Pending,
        created_at: OffsetDateTime::now_utc(),
    }
}

#[async_trait]
impl FulfillmentStore for MemoryFulfillmentStore {
    async fn claim_event(
        &self,
        event_id: &str,
        _event_type: &str,
        _event_created: OffsetDateTime,
    ) -> BillingResult<ClaimOutcome> {
        self.available()?;
        let mut state = lock(&self.state);
        match state.events.get(event_id).map(String::as_str) {
            None | Some("error") => {
                state
                    .events
                    .insert(event_id.to_string(), "processing".to_string());
                Ok(ClaimOutcome::Claimed)
            }
            Some(status) => Ok(ClaimOutcome::Duplicate(status.to_string())),
        }
    }

    async fn finish_event(&self, event_id: &str, error: Option<&str>) -> BillingResult<()> {
        self.available()?;
        let result = if error.is_some() { "error" } else { "success" };
        lock(&self.state)
            .events
            .insert(event_id.to_string(), result.to_string());
        Ok(())
    }

    async fn record_purchase(
        &self,
        customer: &NewCustomer,
        project: &NewProject,
    ) -> BillingResult<PurchaseRecord> {
        self.available()?;
        if self.fail_writes {
            return Err(BillingError::Database("connection reset by peer".to_string()));
        }

        let mut state = lock(&self.state);
        if let Some(existing) = state
            .projects
            .iter()
            .find(|p| p.stripe_session_id == project.stripe_session_id)
            .cloned()
        {
            let owner = state
                .customers
                .iter()
                .find(|c| c.id == existing.customer_id)
                .cloned()
                .ok_or_else(|| BillingError::Internal("orphaned project".to_string()))?;
            return Ok(PurchaseRecord {
                customer: owner,
                project: existing,
                created: false,
            });
        }

        let position = state
            .customers
            .iter()
            .position(|c| c.stripe_customer_id == customer.stripe_customer_id);
        let saved_customer = match position {
            Some(i) => {
                let existing = &mut state.customers[i];
                existing.name = customer.name.clone();
                existing.email = customer.email.clone();
                existing.access_token = customer.access_token.clone();
                existing.access_token_expires_at = customer.access_token_expires_at;
                existing.clone()
            }
            None => {
                let row = customer_row(customer);
                state.customers.push(row.clone());
                row
            }
        };

        let saved_project = project_row(saved_customer.id, project);
        state.projects.push(saved_project.clone());

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
        self.available()?;
        let state = lock(&self.state);
        let Some(project) = state
            .projects
            .iter()
            .find(|p| p.stripe_session_id == session_id)
        else {
            return Ok(None);
        };
        Ok(state
            .customers
            .iter()
            .find(|c| c.id == project.customer_id)
            .map(|c| (c.clone(), project.clone())))
    }

    async fn find_customer_by_token(
        &self,
        access_token: &str,
    ) -> BillingResult<Option<(Customer, Vec<Project>)>> {
        self.available()?;
        let state = lock(&self.state);
        let Some(customer) = state
            .customers
            .iter()
            .find(|c| c.access_token == access_token)
        else {
            return Ok(None);
        };
        let projects = state
            .projects
            .iter()
            .filter(|p| p.customer_id == customer.id)
            .cloned()
            .collect();
        Ok(Some((customer.clone(), projects)))
    }
}

// =============================================================================
// Email
// =============================================================================

pub struct RecordingSender {
    enabled: bool,
    fail: bool,
    /// Only sends whose subject contains this fragment fail
    fail_subject: Option<String>,
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl Default for RecordingSender {
    fn default() -> Self {
        Self {
            enabled: true,
            fail: false,
            fail_subject: None,
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingSender {
    /// Enabled, but the provider is down
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Rejects only the emails whose subject contains `fragment`
    pub fn failing_subject(fragment: &str) -> Self {
        Self {
            fail_subject: Some(fragment.to_string()),
            ..Default::default()
        }
    }

    /// No API key configured
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Emails the provider accepted
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, EmailError> {
        if !self.enabled {
            return Err(EmailError::NotConfigured);
        }
        let rejected = self
            .fail_subject
            .as_deref()
            .is_some_and(|fragment| email.subject.contains(fragment));
        if self.fail || rejected {
            return Err(EmailError::Transient("503 Service Unavailable".to_string()));
        }
        let mut sent = lock(&self.sent);
        sent.push(email.clone());
        Ok(SendReceipt {
            provider_message_id: Some(format!("msg_{}", sent.len())),
        })
    }
}

#[derive(Default)]
pub struct MemoryEmailLog {
    entries: Mutex<Vec<EmailLogEntry>>,
}

impl MemoryEmailLog {
    pub fn entries(&self) -> Vec<EmailLogEntry> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl EmailLogStore for MemoryEmailLog {
    async fn record(&self, entry: &EmailLogEntry) -> BillingResult<()> {
        lock(&self.entries).push(entry.clone());
        Ok(())
    }
}

/// Email log whose table is missing
pub struct FailingEmailLog;

#[async_trait]
impl EmailLogStore for FailingEmailLog {
    async fn record(&self, _entry: &EmailLogEntry) -> BillingResult<()> {
        Err(BillingError::Database(
            "relation \"email_logs\" does not exist".to_string(),
        ))
    }
}
