//! Builders for the domain types, shared by unit tests here and the API
//! integration tests. Defaults are deliberately boring; tests override the
//! fields they care about.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use tokio::sync::Mutex;

use crate::error::SinkError;
use crate::events::{EventSink, LeadAssigned};
use crate::types::{
    Group, LeadFlowRule, MatchType, NewRule, Person, Role, RuleCondition, RuleDestination,
    TenantId, User,
};

pub fn person(tenant_id: i64, id: i64) -> Person {
    let now = Utc::now();
    Person {
        id,
        tenant_id: TenantId(tenant_id),
        name: format!("Test Person {id}"),
        email: None,
        stage_id: None,
        source_type: None,
        source_name: None,
        fields: Json(Map::new()),
        assigned_user_id: None,
        initial_assigned_user_id: None,
        available_for_group_id: None,
        claim_expires_at: None,
        last_group_id: None,
        pond_id: None,
        created_at: now,
        updated_at: now,
    }
}

/// A person sitting in `group_id`'s claim pool with five minutes left.
pub fn pooled_person(tenant_id: i64, id: i64, group_id: i64) -> Person {
    let mut subject = person(tenant_id, id);
    subject.available_for_group_id = Some(group_id);
    subject.claim_expires_at = Some(Utc::now() + Duration::minutes(5));
    subject
}

pub fn user(tenant_id: i64, id: i64, role: Role) -> User {
    User {
        id,
        tenant_id: TenantId(tenant_id),
        name: format!("Test User {id}"),
        role,
    }
}

pub fn group(tenant_id: i64, id: i64) -> Group {
    Group {
        id,
        tenant_id: TenantId(tenant_id),
        name: format!("Test Group {id}"),
    }
}

/// An active, non-default rule for tenant 1 that routes to group 1 and has
/// no source filter and no conditions.
pub fn rule(id: i64) -> LeadFlowRule {
    let now = Utc::now();
    LeadFlowRule {
        id,
        tenant_id: TenantId(1),
        name: format!("Test Rule {id}"),
        source_type: None,
        source_name: None,
        priority: 100,
        is_active: true,
        is_default: false,
        match_type: MatchType::All,
        assigned_agent_id: None,
        assigned_lender_id: None,
        group_id: Some(1),
        pond_id: None,
        leads_count: 0,
        conditions: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

pub fn new_rule(name: &str) -> NewRule {
    NewRule {
        name: name.to_owned(),
        source_type: None,
        source_name: None,
        priority: 100,
        is_active: true,
        is_default: false,
        match_type: MatchType::All,
        destination: RuleDestination::Group(1),
        conditions: Vec::new(),
    }
}

pub fn condition(field: &str, operator: &str, value: Value) -> RuleCondition {
    condition_for_rule(0, 0, field, operator, value)
}

pub fn condition_for_rule(
    id: i64,
    rule_id: i64,
    field: &str,
    operator: &str,
    value: Value,
) -> RuleCondition {
    RuleCondition {
        id,
        rule_id,
        field: field.to_owned(),
        operator: operator.to_owned(),
        value,
        condition_order: 0,
    }
}

/// Captures assignment events so tests can assert on what was published.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LeadAssigned>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<LeadAssigned> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn lead_assigned(&self, event: &LeadAssigned) -> Result<(), SinkError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// A sink that always fails delivery, for exercising the claim path's
/// commit-before-publish contract.
pub struct FailingSink;

#[async_trait]
impl EventSink for FailingSink {
    async fn lead_assigned(&self, _event: &LeadAssigned) -> Result<(), SinkError> {
        Err(SinkError::Rejected { status: 503 })
    }
}
