use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Error, Debug)]
#[error("{0} is not a valid role")]
pub struct ParseRoleError(pub String);

#[derive(Error, Debug)]
#[error("{0} is not a valid match type")]
pub struct ParseMatchTypeError(pub String);

#[derive(Error, Debug)]
#[error("{0} is not a supported condition operator")]
pub struct ParseOperatorError(pub String);

/// Enumeration of errors for operations against the lead store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("pool creation failed with: {error}")]
    PoolCreation { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    Query { command: String, error: sqlx::Error },
    #[error("transaction {command} failed with: {error}")]
    Transaction { command: String, error: sqlx::Error },
    #[error("migration failed with: {error}")]
    Migration { error: sqlx::migrate::MigrateError },
    #[error("rule {rule_id} does not exist for this tenant")]
    UnknownRule { rule_id: i64 },
    #[error("person {person_id} does not exist for this tenant")]
    UnknownPerson { person_id: i64 },
}

/// Why a claim attempt did not hand the lead to the acting user. Messages
/// are written for the agent pressing the claim button, not for operators;
/// the store logs the detail behind `Internal` before returning it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimError {
    #[error("this lead no longer exists")]
    NotFound,
    #[error("this lead is not open for claims")]
    NotAvailable,
    #[error("the claim window for this lead has closed")]
    Expired,
    #[error("this lead was offered to a group you are not a member of")]
    Forbidden,
    #[error("another agent already claimed this lead")]
    AlreadyAssigned,
    #[error("the lead is being claimed by someone else right now, try again")]
    TransientConflict,
    #[error("something went wrong while claiming this lead")]
    Internal,
}

impl ClaimError {
    /// Stable label for metrics and API error kinds.
    pub fn kind(&self) -> &'static str {
        match self {
            ClaimError::NotFound => "not_found",
            ClaimError::NotAvailable => "not_available",
            ClaimError::Expired => "expired",
            ClaimError::Forbidden => "forbidden",
            ClaimError::AlreadyAssigned => "already_assigned",
            ClaimError::TransientConflict => "transient_conflict",
            ClaimError::Internal => "internal",
        }
    }
}

/// Field-level input problems, keyed by field name. Collected rather than
/// first-wins so a bad request can be fixed in one round trip.
#[derive(Error, Debug, Default, Clone, PartialEq, Eq)]
#[error("validation failed")]
pub struct ValidationError {
    pub fields: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: &str) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: &str, message: &str) {
        self.fields.insert(field.to_owned(), message.to_owned());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Enumeration of errors for assignment event delivery.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("invalid assignment webhook endpoint: {error}")]
    InvalidEndpoint { error: url::ParseError },
    #[error("assignment event delivery failed with: {error}")]
    Delivery { error: reqwest::Error },
    #[error("assignment webhook rejected the event with status {status}")]
    Rejected { status: u16 },
}
