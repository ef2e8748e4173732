//! Domain events emitted after lead state changes commit.
//!
//! Delivery is best-effort by contract: a claim that committed stays
//! committed even if every subscriber is down, so sink errors are reported
//! to the caller for logging and metrics but never unwound into storage.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;
use uuid::Uuid;

use crate::error::SinkError;
use crate::types::{Person, TenantId};

/// Published when a claim hands a lead to a user. Notification fan-out and
/// the activity log are fed from this.
#[derive(Debug, Clone, Serialize)]
pub struct LeadAssigned {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub person_id: i64,
    pub user_id: i64,
    /// The pool group the lead was claimed out of, if any.
    pub group_id: Option<i64>,
    pub assigned_at: DateTime<Utc>,
}

impl LeadAssigned {
    /// Builds the event for a person that just went through `claim_lead`,
    /// so the pool group has already moved into `last_group_id`.
    pub fn from_claim(person: &Person, user_id: i64) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id: person.tenant_id,
            person_id: person.id,
            user_id,
            group_id: person.last_group_id,
            assigned_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn lead_assigned(&self, event: &LeadAssigned) -> Result<(), SinkError>;
}

/// Writes events to the log and nothing else. The default sink when no
/// webhook endpoint is configured.
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn lead_assigned(&self, event: &LeadAssigned) -> Result<(), SinkError> {
        tracing::info!(
            event_id = %event.id,
            tenant_id = %event.tenant_id,
            person_id = event.person_id,
            user_id = event.user_id,
            group_id = event.group_id,
            "lead assigned"
        );
        Ok(())
    }
}

/// Posts each event as JSON to a configured endpoint.
pub struct WebhookSink {
    client: reqwest::Client,
    endpoint: Url,
}

impl WebhookSink {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, SinkError> {
        let endpoint =
            Url::parse(endpoint).map_err(|error| SinkError::InvalidEndpoint { error })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SinkError::Delivery { error })?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn lead_assigned(&self, event: &LeadAssigned) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(event)
            .send()
            .await
            .map_err(|error| SinkError::Delivery { error })?;

        if !response.status().is_success() {
            return Err(SinkError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}
