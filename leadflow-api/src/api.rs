use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

use leadflow_common::error::{ClaimError, StoreError, ValidationError};
use leadflow_common::types::{LeadFlowRule, Person};

/// Error body returned on every non-2xx response: a stable machine-readable
/// kind the front end can branch on, plus a human-readable message.
/// Validation failures additionally carry per-field messages.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

impl ErrorBody {
    fn from_error(error: &ApiError) -> Self {
        let fields = match error {
            ApiError::Validation(validation) => Some(validation.fields.clone()),
            _ => None,
        };
        Self {
            kind: error.kind(),
            message: error.to_string(),
            fields,
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("the X-Tenant-Id header is required")]
    MissingTenant,
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("something went wrong, try again later")]
    Internal,
}

impl ApiError {
    /// Kind label and status in one place so the two cannot drift apart.
    fn metadata(&self) -> (&'static str, StatusCode) {
        match self {
            ApiError::MissingTenant => ("missing_tenant", StatusCode::UNAUTHORIZED),
            ApiError::Claim(error) => (error.kind(), claim_status(error)),
            ApiError::NotFound(_) => ("not_found", StatusCode::NOT_FOUND),
            ApiError::BadRequest(_) => ("bad_request", StatusCode::BAD_REQUEST),
            ApiError::Validation(_) => ("validation_failed", StatusCode::UNPROCESSABLE_ENTITY),
            ApiError::Internal => ("internal", StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.metadata().0
    }

    pub fn status(&self) -> StatusCode {
        self.metadata().1
    }
}

fn claim_status(error: &ClaimError) -> StatusCode {
    match error {
        ClaimError::NotFound => StatusCode::NOT_FOUND,
        ClaimError::NotAvailable => StatusCode::BAD_REQUEST,
        ClaimError::Expired => StatusCode::GONE,
        ClaimError::Forbidden => StatusCode::FORBIDDEN,
        ClaimError::AlreadyAssigned => StatusCode::CONFLICT,
        ClaimError::TransientConflict => StatusCode::SERVICE_UNAVAILABLE,
        ClaimError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::UnknownRule { rule_id } => ApiError::Validation(ValidationError::single(
                "rules",
                &format!("rule {rule_id} does not exist"),
            )),
            StoreError::UnknownPerson { .. } => ApiError::NotFound("person"),
            other => {
                tracing::error!("store operation failed: {other}");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody::from_error(&self);
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub status: &'static str,
    /// Where the front end should send the winning agent.
    pub redirect: String,
    pub person: Person,
}

/// Intake result: the created person, after routing, and the rule that
/// routed them if any matched.
#[derive(Debug, Serialize)]
pub struct RoutedPersonResponse {
    pub person: Person,
    pub rule_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TestRuleResponse {
    pub matches: bool,
    pub rule: LeadFlowRule,
    pub person: Person,
}

#[derive(Debug, Serialize)]
pub struct CopyResponse {
    pub copied: u64,
}

#[derive(Debug, Serialize)]
pub struct DistributeResponse {
    pub distributed: u64,
}
