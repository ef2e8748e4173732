use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::types::Json;

use crate::error::{ParseMatchTypeError, ParseRoleError, ValidationError};

/// Sources with this name, and rules with this source name, match any source.
/// A rule with a NULL source component is treated the same way.
pub const SOURCE_WILDCARD: &str = "*";

/// Identifies the tenant that owns a row. Every query is scoped by one of
/// these; no operation may cross tenants.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct TenantId(pub i64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Agent,
    Lender,
}

impl Role {
    /// Privileged users may hold a lead without blocking pool claims: an
    /// assignment to an owner or admin is a placeholder that any eligible
    /// claimer can take over.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "agent" => Ok(Role::Agent),
            "lender" => Ok(Role::Lender),
            invalid => Err(ParseRoleError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Admin => write!(f, "admin"),
            Role::Agent => write!(f, "agent"),
            Role::Lender => write!(f, "lender"),
        }
    }
}

/// How a rule combines its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "match_type")]
#[sqlx(rename_all = "lowercase")]
pub enum MatchType {
    All,
    Any,
}

impl FromStr for MatchType {
    type Err = ParseMatchTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(MatchType::All),
            "any" => Ok(MatchType::Any),
            invalid => Err(ParseMatchTypeError(invalid.to_owned())),
        }
    }
}

/// A person in the CRM. "Lead" in the API refers to a person that has not
/// been claimed by an agent yet.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Person {
    pub id: i64,
    pub tenant_id: TenantId,
    pub name: String,
    pub email: Option<String>,
    pub stage_id: Option<i64>,
    pub source_type: Option<String>,
    pub source_name: Option<String>,
    pub fields: Json<Map<String, Value>>,
    pub assigned_user_id: Option<i64>,
    pub initial_assigned_user_id: Option<i64>,
    pub available_for_group_id: Option<i64>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub last_group_id: Option<i64>,
    pub pond_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Person {
    /// A person is in a claim pool while both pool columns are set. The two
    /// are always written together; see the claim preconditions.
    pub fn is_pooled(&self) -> bool {
        self.available_for_group_id.is_some() && self.claim_expires_at.is_some()
    }

    /// The attribute snapshot rule conditions are evaluated against. Custom
    /// fields first, then the built-in columns, so a custom field can never
    /// shadow a built-in of the same name.
    pub fn match_fields(&self) -> Map<String, Value> {
        let mut fields = self.fields.0.clone();
        fields.insert("name".to_owned(), json!(self.name));
        if let Some(email) = &self.email {
            fields.insert("email".to_owned(), json!(email));
        }
        if let Some(stage_id) = self.stage_id {
            fields.insert("stage_id".to_owned(), json!(stage_id));
        }
        if let Some(source_type) = &self.source_type {
            fields.insert("source_type".to_owned(), json!(source_type));
        }
        if let Some(source_name) = &self.source_name {
            fields.insert("source_name".to_owned(), json!(source_name));
        }
        fields
    }
}

/// Input for creating a person through the intake endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPerson {
    pub name: String,
    pub email: Option<String>,
    pub stage_id: Option<i64>,
    pub source_type: Option<String>,
    pub source_name: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub tenant_id: TenantId,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub id: i64,
    pub tenant_id: TenantId,
    pub name: String,
}

/// One predicate of a lead flow rule. The operator is kept as text so that
/// rows written by a newer version of the service stay loadable; evaluation
/// treats anything unrecognised as a non-match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RuleCondition {
    pub id: i64,
    pub rule_id: i64,
    pub field: String,
    pub operator: String,
    pub value: Value,
    pub condition_order: i32,
}

/// A lead flow rule together with its conditions, ordered by
/// `condition_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadFlowRule {
    pub id: i64,
    pub tenant_id: TenantId,
    pub name: String,
    pub source_type: Option<String>,
    pub source_name: Option<String>,
    pub priority: i32,
    pub is_active: bool,
    pub is_default: bool,
    pub match_type: MatchType,
    pub assigned_agent_id: Option<i64>,
    pub assigned_lender_id: Option<i64>,
    pub group_id: Option<i64>,
    pub pond_id: Option<i64>,
    pub leads_count: i64,
    pub conditions: Vec<RuleCondition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeadFlowRule {
    /// Whether this rule applies to a lead arriving from the given source.
    pub fn matches_source(&self, source_type: Option<&str>, source_name: Option<&str>) -> bool {
        source_component_matches(self.source_type.as_deref(), source_type)
            && source_component_matches(self.source_name.as_deref(), source_name)
    }

    /// The routing target, if the stored columns satisfy the exactly-one
    /// invariant. Rules are validated on write, but the invariant is not
    /// enforced at the storage level, so reads stay defensive.
    pub fn destination(&self) -> Option<RuleDestination> {
        RuleDestination::from_parts(
            self.assigned_agent_id,
            self.assigned_lender_id,
            self.group_id,
            self.pond_id,
        )
        .ok()
    }
}

fn source_component_matches(pattern: Option<&str>, value: Option<&str>) -> bool {
    match pattern {
        None => true,
        Some(SOURCE_WILDCARD) => true,
        Some(expected) => value == Some(expected),
    }
}

/// Where a matched rule sends a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleDestination {
    /// Assign directly to this agent.
    Agent(i64),
    /// Assign directly to this lender.
    Lender(i64),
    /// Offer to this group's claim pool.
    Group(i64),
    /// Park in this pond for later redistribution.
    Pond(i64),
}

impl RuleDestination {
    /// Builds a destination from the four storage columns, requiring exactly
    /// one of them to be set.
    pub fn from_parts(
        agent_id: Option<i64>,
        lender_id: Option<i64>,
        group_id: Option<i64>,
        pond_id: Option<i64>,
    ) -> Result<Self, ValidationError> {
        let targets = [
            agent_id.map(RuleDestination::Agent),
            lender_id.map(RuleDestination::Lender),
            group_id.map(RuleDestination::Group),
            pond_id.map(RuleDestination::Pond),
        ];

        let mut found = targets.into_iter().flatten();
        match (found.next(), found.next()) {
            (Some(destination), None) => Ok(destination),
            (None, _) => Err(ValidationError::single(
                "destination",
                "exactly one of assigned_agent_id, assigned_lender_id, group_id or pond_id is required",
            )),
            (Some(_), Some(_)) => Err(ValidationError::single(
                "destination",
                "a rule can only route to one destination",
            )),
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RuleDestination::Agent(_) => "agent",
            RuleDestination::Lender(_) => "lender",
            RuleDestination::Group(_) => "group",
            RuleDestination::Pond(_) => "pond",
        }
    }

    /// The inverse of [`RuleDestination::from_parts`]: the four storage
    /// columns, with exactly one set.
    pub fn into_columns(self) -> (Option<i64>, Option<i64>, Option<i64>, Option<i64>) {
        match self {
            RuleDestination::Agent(id) => (Some(id), None, None, None),
            RuleDestination::Lender(id) => (None, Some(id), None, None),
            RuleDestination::Group(id) => (None, None, Some(id), None),
            RuleDestination::Pond(id) => (None, None, None, Some(id)),
        }
    }
}

/// Input for creating or replacing a rule. The destination is typed, so a
/// value of this struct always satisfies the exactly-one invariant.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub name: String,
    pub source_type: Option<String>,
    pub source_name: Option<String>,
    pub priority: i32,
    pub is_active: bool,
    pub is_default: bool,
    pub match_type: MatchType,
    pub destination: RuleDestination,
    pub conditions: Vec<NewCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCondition {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

/// A (source_type, source_name) pair used when copying rules between
/// sources. Unlike rule matching, these are compared verbatim: NULL only
/// matches NULL and `"*"` only matches `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceRef {
    pub source_type: Option<String>,
    pub source_name: Option<String>,
}

/// One entry of a reorder request.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RulePriority {
    pub id: i64,
    pub priority: i32,
}
