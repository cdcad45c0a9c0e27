//! Form submission persistence with a generic fallback table
//!
//! Every public form (contact, private build, "start my project" backup,
//! quiz) is written through a [`SubmissionSink`]. The [`FallbackSink`]
//! decorator tries the specialized sink for the form first and, on any error
//! (including a missing table), reshapes the submission into a
//! [`GenericSubmission`] and writes it to `contact_submissions`, so no
//! submission is silently lost.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SharedError;

/// The generic catch-all table
pub const GENERIC_TABLE: &str = "contact_submissions";

/// Which public form produced a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionKind {
    Contact,
    PrivateBuild,
    StartIntake,
    QuizResult,
}

impl SubmissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionKind::Contact => "contact",
            SubmissionKind::PrivateBuild => "private-build",
            SubmissionKind::StartIntake => "start",
            SubmissionKind::QuizResult => "quiz",
        }
    }

    /// Table the specialized write targets
    pub fn primary_table(&self) -> &'static str {
        match self {
            SubmissionKind::Contact | SubmissionKind::PrivateBuild => GENERIC_TABLE,
            SubmissionKind::StartIntake => "project_inquiries",
            SubmissionKind::QuizResult => "quiz_results",
        }
    }
}

impl std::fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Form payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub message: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateBuildApplication {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub budget: Option<String>,
    pub timeline: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartIntake {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub plan: Option<String>,
    #[serde(default)]
    pub rush_delivery: bool,
    #[serde(default)]
    pub add_ons: Vec<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub name: Option<String>,
    pub email: Option<String>,
    pub recommended_plan: String,
    #[serde(default)]
    pub answers: serde_json::Value,
}

/// A submission from any public form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "formType", content = "data", rename_all = "kebab-case")]
pub enum Submission {
    Contact(ContactSubmission),
    PrivateBuild(PrivateBuildApplication),
    StartIntake(StartIntake),
    QuizResult(QuizResult),
}

/// Row shape of the generic `contact_submissions` table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenericSubmission {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    /// Never empty
    pub message: String,
    pub source: String,
    pub form_type: String,
    pub payload: serde_json::Value,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl Submission {
    pub fn kind(&self) -> SubmissionKind {
        match self {
            Submission::Contact(_) => SubmissionKind::Contact,
            Submission::PrivateBuild(_) => SubmissionKind::PrivateBuild,
            Submission::StartIntake(_) => SubmissionKind::StartIntake,
            Submission::QuizResult(_) => SubmissionKind::QuizResult,
        }
    }

    /// Reshape into the generic record, synthesizing `message` when the form
    /// has no free-text field
    pub fn to_generic(&self) -> GenericSubmission {
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let form_type = self.kind().as_str().to_string();

        match self {
            Submission::Contact(c) => GenericSubmission {
                name: c.name.clone(),
                email: c.email.clone(),
                company: c.company.clone(),
                phone: c.phone.clone(),
                message: non_blank(Some(&c.message))
                    .map(str::to_string)
                    .unwrap_or_else(|| "Contact form submission (no message provided)".to_string()),
                source: c.source.clone(),
                form_type,
                payload,
            },
            Submission::PrivateBuild(p) => {
                let message = match non_blank(p.description.as_deref()) {
                    Some(description) => description.to_string(),
                    None => format!(
                        "Private build application (budget: {}, timeline: {})",
                        non_blank(p.budget.as_deref()).unwrap_or("not specified"),
                        non_blank(p.timeline.as_deref()).unwrap_or("not specified"),
                    ),
                };
                GenericSubmission {
                    name: p.name.clone(),
                    email: p.email.clone(),
                    company: p.company.clone(),
                    phone: p.phone.clone(),
                    message,
                    source: "private-build".to_string(),
                    form_type,
                    payload,
                }
            }
            Submission::StartIntake(s) => GenericSubmission {
                name: s.name.clone(),
                email: s.email.clone(),
                company: s.company.clone(),
                phone: s.phone.clone(),
                message: format!(
                    "Start form backup: plan {}, rush delivery {}, add-ons [{}]",
                    non_blank(s.plan.as_deref()).unwrap_or("not selected"),
                    if s.rush_delivery { "yes" } else { "no" },
                    s.add_ons.join(", "),
                ),
                source: "start-form".to_string(),
                form_type,
                payload,
            },
            Submission::QuizResult(q) => GenericSubmission {
                name: non_blank(q.name.as_deref())
                    .unwrap_or("Anonymous visitor")
                    .to_string(),
                email: non_blank(q.email.as_deref())
                    .unwrap_or("not-provided")
                    .to_string(),
                company: None,
                phone: None,
                message: format!("Quiz result: recommended plan {}", q.recommended_plan),
                source: "plan-quiz".to_string(),
                form_type,
                payload,
            },
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Destination for form submissions
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    /// Table this sink writes `kind` submissions to
    fn table(&self, kind: SubmissionKind) -> &'static str;

    /// Persist one submission, returning the new row id
    async fn record(&self, submission: &Submission) -> Result<Uuid, SharedError>;
}

/// Writes each form to its own table with its full column set
pub struct PgSpecializedSink {
    pool: PgPool,
}

impl PgSpecializedSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionSink for PgSpecializedSink {
    fn table(&self, kind: SubmissionKind) -> &'static str {
        kind.primary_table()
    }

    async fn record(&self, submission: &Submission) -> Result<Uuid, SharedError> {
        let id: (Uuid,) = match submission {
            Submission::Contact(c) => {
                sqlx::query_as(
                    r#"
                    INSERT INTO contact_submissions (name, email, company, phone, message, source, form_type, status)
                    VALUES ($1, $2, $3, $4, $5, $6, 'contact', 'new')
                    RETURNING id
                    "#,
                )
                .bind(&c.name)
                .bind(&c.email)
                .bind(&c.company)
                .bind(&c.phone)
                .bind(&c.message)
                .bind(&c.source)
                .fetch_one(&self.pool)
                .await?
            }
            Submission::PrivateBuild(p) => {
                let generic = submission.to_generic();
                sqlx::query_as(
                    r#"
                    INSERT INTO contact_submissions
                        (name, email, company, phone, message, source, form_type, budget, timeline, features, status)
                    VALUES ($1, $2, $3, $4, $5, 'private-build', 'private-build', $6, $7, $8, 'new')
                    RETURNING id
                    "#,
                )
                .bind(&p.name)
                .bind(&p.email)
                .bind(&p.company)
                .bind(&p.phone)
                .bind(&generic.message)
                .bind(&p.budget)
                .bind(&p.timeline)
                .bind(serde_json::json!(p.features))
                .fetch_one(&self.pool)
                .await?
            }
            Submission::StartIntake(s) => {
                sqlx::query_as(
                    r#"
                    INSERT INTO project_inquiries (name, email, company, phone, plan, rush_delivery, add_ons, details)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    RETURNING id
                    "#,
                )
                .bind(&s.name)
                .bind(&s.email)
                .bind(&s.company)
                .bind(&s.phone)
                .bind(&s.plan)
                .bind(s.rush_delivery)
                .bind(serde_json::json!(s.add_ons))
                .bind(&s.details)
                .fetch_one(&self.pool)
                .await?
            }
            Submission::QuizResult(q) => {
                sqlx::query_as(
                    r#"
                    INSERT INTO quiz_results (name, email, recommended_plan, answers)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id
                    "#,
                )
                .bind(&q.name)
                .bind(&q.email)
                .bind(&q.recommended_plan)
                .bind(&q.answers)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(id.0)
    }
}

/// Writes any submission to the generic table using only its guaranteed columns
pub struct PgGenericSink {
    pool: PgPool,
}

impl PgGenericSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionSink for PgGenericSink {
    fn table(&self, _kind: SubmissionKind) -> &'static str {
        GENERIC_TABLE
    }

    async fn record(&self, submission: &Submission) -> Result<Uuid, SharedError> {
        let row = submission.to_generic();

        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO contact_submissions (name, email, company, phone, message, source, form_type, payload, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'new')
            RETURNING id
            "#,
        )
        .bind(&row.name)
        .bind(&row.email)
        .bind(&row.company)
        .bind(&row.phone)
        .bind(&row.message)
        .bind(&row.source)
        .bind(&row.form_type)
        .bind(&row.payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(id.0)
    }
}

/// Stands in for the database when no credentials are configured
pub struct UnavailableSink;

#[async_trait]
impl SubmissionSink for UnavailableSink {
    fn table(&self, kind: SubmissionKind) -> &'static str {
        kind.primary_table()
    }

    async fn record(&self, _submission: &Submission) -> Result<Uuid, SharedError> {
        Err(SharedError::Unavailable(
            "database is not configured".to_string(),
        ))
    }
}

// =============================================================================
// Fallback composition
// =============================================================================

/// Result of a submission attempt. Callers surface `used_fallback` as a
/// non-blocking "saved via backup" notice.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub success: bool,
    /// Table that received the row, if any
    pub table: Option<&'static str>,
    pub used_fallback: bool,
    pub submission_id: Option<Uuid>,
    pub error: Option<String>,
}

/// Specialized sink first, generic sink on any failure
pub struct FallbackSink {
    primary: Arc<dyn SubmissionSink>,
    fallback: Arc<dyn SubmissionSink>,
}

impl FallbackSink {
    pub fn new(primary: Arc<dyn SubmissionSink>, fallback: Arc<dyn SubmissionSink>) -> Self {
        Self { primary, fallback }
    }

    /// Build the Postgres pair (specialized tables, generic fallback)
    pub fn postgres(pool: PgPool) -> Self {
        Self::new(
            Arc::new(PgSpecializedSink::new(pool.clone())),
            Arc::new(PgGenericSink::new(pool)),
        )
    }

    /// Sink used when the database is not configured
    pub fn unavailable() -> Self {
        Self::new(Arc::new(UnavailableSink), Arc::new(UnavailableSink))
    }

    /// Persist a submission, degrading to the generic table. Never fails:
    /// exhausting both sinks yields `success: false` with the last error.
    pub async fn submit(&self, submission: &Submission) -> SubmitOutcome {
        let kind = submission.kind();
        let primary_table = self.primary.table(kind);

        let primary_err = match self.primary.record(submission).await {
            Ok(id) => {
                tracing::info!(
                    form = %kind,
                    table = primary_table,
                    submission_id = %id,
                    "Submission stored"
                );
                return SubmitOutcome {
                    success: true,
                    table: Some(primary_table),
                    used_fallback: false,
                    submission_id: Some(id),
                    error: None,
                };
            }
            Err(e) => e,
        };

        let fallback_table = self.fallback.table(kind);
        tracing::warn!(
            form = %kind,
            table = primary_table,
            fallback_table = fallback_table,
            error = %primary_err,
            "Primary submission write failed, using fallback table"
        );

        match self.fallback.record(submission).await {
            Ok(id) => {
                tracing::info!(
                    form = %kind,
                    table = fallback_table,
                    submission_id = %id,
                    "Submission stored via fallback"
                );
                SubmitOutcome {
                    success: true,
                    table: Some(fallback_table),
                    used_fallback: true,
                    submission_id: Some(id),
                    error: None,
                }
            }
            Err(fallback_err) => {
                tracing::error!(
                    form = %kind,
                    primary_error = %primary_err,
                    fallback_error = %fallback_err,
                    payload = %serde_json::to_string(submission).unwrap_or_default(),
                    "Submission could not be stored in either table"
                );
                SubmitOutcome {
                    success: false,
                    table: None,
                    used_fallback: true,
                    submission_id: None,
                    error: Some(fallback_err.to_string()),
                }
            }
        }
    }
}

#[async_trait]
impl SubmissionSink for FallbackSink {
    fn table(&self, kind: SubmissionKind) -> &'static str {
        self.primary.table(kind)
    }

    async fn record(&self, submission: &Submission) -> Result<Uuid, SharedError> {
        let outcome = self.submit(submission).await;
        outcome.submission_id.ok_or_else(|| {
            SharedError::Database(outcome.error.unwrap_or_else(|| "unknown error".to_string()))
        })
    }
}

// =============================================================================
// In-memory sinks
// =============================================================================

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! In-memory sinks for exercising the fallback path without Postgres

    use super::*;
    use std::sync::Mutex;

    /// Records submissions in memory; can be told to fail every write
    pub struct MemorySink {
        table: &'static str,
        generic: bool,
        fail: Option<SharedError>,
        rows: Mutex<Vec<(Uuid, Submission)>>,
    }

    impl MemorySink {
        /// Behaves like the specialized sink (per-kind tables)
        pub fn specialized() -> Self {
            Self {
                table: "",
                generic: false,
                fail: None,
                rows: Mutex::new(Vec::new()),
            }
        }

        /// Behaves like the generic fallback table
        pub fn generic() -> Self {
            Self {
                table: GENERIC_TABLE,
                generic: true,
                fail: None,
                rows: Mutex::new(Vec::new()),
            }
        }

        /// Fails every write as if the table did not exist
        pub fn missing_table() -> Self {
            Self {
                fail: Some(SharedError::MissingTable(
                    "relation does not exist".to_string(),
                )),
                ..Self::specialized()
            }
        }

        /// Fails every write with a generic database error
        pub fn broken() -> Self {
            Self {
                fail: Some(SharedError::Database("connection refused".to_string())),
                ..Self::generic()
            }
        }

        pub fn submissions(&self) -> Vec<Submission> {
            self.rows
                .lock()
                .map(|rows| rows.iter().map(|(_, s)| s.clone()).collect())
                .unwrap_or_default()
        }

        /// Rows as the generic table would store them
        pub fn generic_rows(&self) -> Vec<GenericSubmission> {
            self.submissions().iter().map(Submission::to_generic).collect()
        }
    }

    #[async_trait]
    impl SubmissionSink for MemorySink {
        fn table(&self, kind: SubmissionKind) -> &'static str {
            if self.generic {
                self.table
            } else {
                kind.primary_table()
            }
        }

        async fn record(&self, submission: &Submission) -> Result<Uuid, SharedError> {
            if let Some(err) = &self.fail {
                return Err(match err {
                    SharedError::MissingTable(m) => SharedError::MissingTable(m.clone()),
                    other => SharedError::Database(other.to_string()),
                });
            }
            let id = Uuid::new_v4();
            if let Ok(mut rows) = self.rows.lock() {
                rows.push((id, submission.clone()));
            }
            Ok(id)
        }
    }
}
