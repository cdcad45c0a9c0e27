//! Customer portal: projects behind the emailed access token

use axum::{
    extract::{Path, State},
    Json,
};
use dolo_shared::Project;
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult, RequestId},
    state::AppState,
};

const MAX_TOKEN_LEN: usize = 128;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalCustomer {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub access_expires_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalProject {
    pub id: Uuid,
    pub project_type: String,
    pub amount: f64,
    pub currency: String,
    pub rush_delivery: bool,
    pub add_ons: serde_json::Value,
    pub status: String,
    pub created_at: String,
}

impl From<Project> for PortalProject {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            project_type: project.project_type,
            amount: project.amount,
            currency: project.currency,
            rush_delivery: project.rush_delivery,
            add_ons: project.add_ons,
            status: project.status.as_str().to_string(),
            created_at: project.created_at.format(&Rfc3339).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalResponse {
    pub success: bool,
    pub customer: PortalCustomer,
    pub projects: Vec<PortalProject>,
}

fn plausible_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Look up a customer by access token. Unknown and expired tokens are
/// indistinguishable to the caller.
pub async fn get_portal(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(token): Path<String>,
) -> ApiResult<Json<PortalResponse>> {
    if !plausible_token(&token) {
        return Err(ApiError::InvalidToken.at(&request_id));
    }

    let found = state
        .store
        .find_customer_by_token(&token)
        .await
        .map_err(|e| ApiError::from(e).at(&request_id))?;

    let Some((customer, mut projects)) = found else {
        tracing::info!(request_id = %request_id, "Portal access with unknown token");
        return Err(ApiError::InvalidToken.at(&request_id));
    };

    if !customer.access_token_valid_at(OffsetDateTime::now_utc()) {
        tracing::info!(
            request_id = %request_id,
            customer_id = %customer.id,
            "Portal access with expired token"
        );
        return Err(ApiError::InvalidToken.at(&request_id));
    }

    projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(PortalResponse {
        success: true,
        customer: PortalCustomer {
            name: customer.name,
            email: customer.email,
            company: customer.company,
            access_expires_at: customer
                .access_token_expires_at
                .format(&Rfc3339)
                .unwrap_or_default(),
        },
        projects: projects.into_iter().map(PortalProject::from).collect(),
    }))
}
