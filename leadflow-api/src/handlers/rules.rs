use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use tracing::instrument;

use leadflow_common::error::ValidationError;
use leadflow_common::metrics::RULE_COPIES_COUNTER;
use leadflow_common::rules::{rule_matches, validate_new_rule};
use leadflow_common::types::{
    LeadFlowRule, MatchType, NewCondition, NewRule, RuleDestination, RulePriority, SourceRef,
};

use crate::api::{ApiError, CopyResponse, DistributeResponse, TestRuleResponse};
use crate::router::AppState;
use crate::tenant::Tenant;

/// Create/replace payload for a rule. The destination arrives as the four
/// raw columns and is validated into exactly one target before anything is
/// written.
#[derive(Debug, Deserialize)]
pub struct RulePayload {
    pub name: String,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_match_type")]
    pub match_type: MatchType,
    #[serde(default)]
    pub assigned_agent_id: Option<i64>,
    #[serde(default)]
    pub assigned_lender_id: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub pond_id: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<NewCondition>,
}

fn default_priority() -> i32 {
    100
}

fn default_active() -> bool {
    true
}

fn default_match_type() -> MatchType {
    MatchType::All
}

impl RulePayload {
    fn into_new_rule(self) -> Result<NewRule, ValidationError> {
        let destination = RuleDestination::from_parts(
            self.assigned_agent_id,
            self.assigned_lender_id,
            self.group_id,
            self.pond_id,
        )?;
        let rule = NewRule {
            name: self.name,
            source_type: self.source_type,
            source_name: self.source_name,
            priority: self.priority,
            is_active: self.is_active,
            is_default: self.is_default,
            match_type: self.match_type,
            destination,
            conditions: self.conditions,
        };
        validate_new_rule(&rule)?;
        Ok(rule)
    }
}

#[instrument(skip_all, fields(tenant_id = %tenant.0))]
pub async fn list_rules(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
) -> Result<Json<Vec<LeadFlowRule>>, ApiError> {
    Ok(Json(state.store.list_rules(tenant).await?))
}

#[instrument(skip_all, fields(tenant_id = %tenant.0))]
pub async fn create_rule(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Json(payload): Json<RulePayload>,
) -> Result<(StatusCode, Json<LeadFlowRule>), ApiError> {
    let rule = payload.into_new_rule()?;
    let created = state.store.create_rule(tenant, rule).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip_all, fields(tenant_id = %tenant.0, rule_id))]
pub async fn get_rule(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
) -> Result<Json<LeadFlowRule>, ApiError> {
    tracing::Span::current().record("rule_id", rule_id);
    let rule = state
        .store
        .get_rule(tenant, rule_id)
        .await?
        .ok_or(ApiError::NotFound("rule"))?;
    Ok(Json(rule))
}

#[instrument(skip_all, fields(tenant_id = %tenant.0, rule_id))]
pub async fn update_rule(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
    Json(payload): Json<RulePayload>,
) -> Result<Json<LeadFlowRule>, ApiError> {
    tracing::Span::current().record("rule_id", rule_id);
    let rule = payload.into_new_rule()?;
    let updated = state
        .store
        .update_rule(tenant, rule_id, rule)
        .await?
        .ok_or(ApiError::NotFound("rule"))?;
    Ok(Json(updated))
}

#[instrument(skip_all, fields(tenant_id = %tenant.0, rule_id))]
pub async fn delete_rule(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    tracing::Span::current().record("rule_id", rule_id);
    if state.store.delete_rule(tenant, rule_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("rule"))
    }
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub priorities: Vec<RulePriority>,
}

/// Applies a batch of priority changes, all or nothing.
#[instrument(skip_all, fields(tenant_id = %tenant.0))]
pub async fn reorder_rules(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Json(payload): Json<ReorderRequest>,
) -> Result<StatusCode, ApiError> {
    if payload.priorities.is_empty() {
        return Err(
            ValidationError::single("priorities", "at least one rule priority is required").into(),
        );
    }
    state
        .store
        .reorder_rules(tenant, &payload.priorities)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct CopyRequest {
    pub from: SourceRef,
    pub to: SourceRef,
}

/// Clones one source's rule set under another source key. Source refs are
/// compared verbatim here, wildcards are not expanded.
#[instrument(skip_all, fields(tenant_id = %tenant.0))]
pub async fn copy_rules(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Json(payload): Json<CopyRequest>,
) -> Result<Json<CopyResponse>, ApiError> {
    if payload.from == payload.to {
        return Err(
            ValidationError::single("to", "target source must differ from the origin").into(),
        );
    }
    let copied = state
        .store
        .copy_rules(tenant, &payload.from, &payload.to)
        .await?;
    counter!(RULE_COPIES_COUNTER).increment(copied);
    tracing::info!(copied, "copied rule set to new source");
    Ok(Json(CopyResponse { copied }))
}

#[derive(Debug, Deserialize)]
pub struct TestRuleRequest {
    pub person_id: i64,
}

/// Dry-run: would this rule's conditions match that person? Reads only.
#[instrument(skip_all, fields(tenant_id = %tenant.0, rule_id, person_id = payload.person_id))]
pub async fn test_rule(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
    Json(payload): Json<TestRuleRequest>,
) -> Result<Json<TestRuleResponse>, ApiError> {
    tracing::Span::current().record("rule_id", rule_id);
    let rule = state
        .store
        .get_rule(tenant, rule_id)
        .await?
        .ok_or(ApiError::NotFound("rule"))?;
    let person = state
        .store
        .get_person(tenant, payload.person_id)
        .await?
        .ok_or(ApiError::NotFound("person"))?;

    let matches = rule_matches(&rule, &person);
    Ok(Json(TestRuleResponse {
        matches,
        rule,
        person,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DistributeRequest {
    pub person_ids: Vec<i64>,
}

/// Force-pools the given persons into the rule's group so its members can
/// race to claim them. Only sensible for rules that route to a group.
#[instrument(skip_all, fields(tenant_id = %tenant.0, rule_id))]
pub async fn distribute_rule(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
    Json(payload): Json<DistributeRequest>,
) -> Result<Json<DistributeResponse>, ApiError> {
    tracing::Span::current().record("rule_id", rule_id);
    if payload.person_ids.is_empty() {
        return Err(
            ValidationError::single("person_ids", "at least one person id is required").into(),
        );
    }

    let rule = state
        .store
        .get_rule(tenant, rule_id)
        .await?
        .ok_or(ApiError::NotFound("rule"))?;
    let Some(RuleDestination::Group(group_id)) = rule.destination() else {
        return Err(ValidationError::single(
            "rule",
            "distribution needs a rule that routes to a group",
        )
        .into());
    };

    let expires_at = Utc::now() + state.claim_window;
    let distributed = state
        .store
        .pool_for_group(tenant, rule.id, group_id, &payload.person_ids, expires_at)
        .await?;
    tracing::info!(group_id, distributed, "pooled leads for group claims");
    Ok(Json(DistributeResponse { distributed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_from(json: serde_json::Value) -> RulePayload {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_payload_defaults() {
        let payload = payload_from(serde_json::json!({
            "name": "web leads",
            "group_id": 4,
        }));
        assert_eq!(payload.priority, 100);
        assert!(payload.is_active);
        assert!(!payload.is_default);
        assert_eq!(payload.match_type, MatchType::All);
        assert!(payload.conditions.is_empty());
    }

    #[test]
    fn test_payload_builds_a_group_rule() {
        let payload = payload_from(serde_json::json!({
            "name": "web leads",
            "group_id": 4,
            "conditions": [{"field": "stage_id", "operator": "eq", "value": 2}],
        }));
        let rule = payload.into_new_rule().unwrap();
        assert_eq!(rule.destination, RuleDestination::Group(4));
        assert_eq!(rule.conditions.len(), 1);
    }

    #[test]
    fn test_payload_with_two_destinations_is_invalid() {
        let payload = payload_from(serde_json::json!({
            "name": "web leads",
            "group_id": 4,
            "pond_id": 9,
        }));
        let error = payload.into_new_rule().unwrap_err();
        assert!(error.fields.contains_key("destination"));
    }

    #[test]
    fn test_payload_without_name_is_invalid() {
        let payload = payload_from(serde_json::json!({
            "name": "   ",
            "group_id": 4,
        }));
        let error = payload.into_new_rule().unwrap_err();
        assert!(error.fields.contains_key("name"));
    }
}
