//! An in-memory `LeadStore` for tests and local development. A single
//! mutex stands in for the row locks the Postgres store takes, so claims
//! stay atomic here too.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use tokio::sync::Mutex;

use crate::claim::{self, ClaimContext};
use crate::error::{ClaimError, StoreError};
use crate::store::LeadStore;
use crate::types::{
    Group, LeadFlowRule, NewCondition, NewPerson, NewRule, Person, Role, RuleCondition,
    RuleDestination, RulePriority, SourceRef, TenantId, User,
};

#[derive(Default)]
struct Tables {
    persons: HashMap<i64, Person>,
    users: HashMap<i64, User>,
    groups: HashMap<i64, Group>,
    /// (group_id, user_id) pairs.
    memberships: HashSet<(i64, i64)>,
    rules: HashMap<i64, LeadFlowRule>,
    last_person_id: i64,
    last_rule_id: i64,
    last_condition_id: i64,
}

impl Tables {
    fn person(&self, tenant: TenantId, person_id: i64) -> Option<&Person> {
        self.persons
            .get(&person_id)
            .filter(|person| person.tenant_id == tenant)
    }

    fn person_mut(&mut self, tenant: TenantId, person_id: i64) -> Option<&mut Person> {
        self.persons
            .get_mut(&person_id)
            .filter(|person| person.tenant_id == tenant)
    }

    fn rule(&self, tenant: TenantId, rule_id: i64) -> Option<&LeadFlowRule> {
        self.rules
            .get(&rule_id)
            .filter(|rule| rule.tenant_id == tenant)
    }

    fn next_person_id(&mut self) -> i64 {
        self.last_person_id += 1;
        self.last_person_id
    }

    fn next_rule_id(&mut self) -> i64 {
        self.last_rule_id += 1;
        self.last_rule_id
    }

    fn next_condition_id(&mut self) -> i64 {
        self.last_condition_id += 1;
        self.last_condition_id
    }

    fn materialize_conditions(
        &mut self,
        rule_id: i64,
        conditions: &[NewCondition],
    ) -> Vec<RuleCondition> {
        conditions
            .iter()
            .enumerate()
            .map(|(index, condition)| RuleCondition {
                id: self.next_condition_id(),
                rule_id,
                field: condition.field.clone(),
                operator: condition.operator.clone(),
                value: condition.value.clone(),
                condition_order: index as i32,
            })
            .collect()
    }

    fn bump_rule_count(&mut self, tenant: TenantId, rule_id: i64, by: i64, now: DateTime<Utc>) {
        if let Some(rule) = self
            .rules
            .get_mut(&rule_id)
            .filter(|rule| rule.tenant_id == tenant)
        {
            rule.leads_count += by;
            rule.updated_at = now;
        }
    }
}

#[derive(Default)]
pub struct MemoryLeadStore {
    tables: Mutex<Tables>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_person(&self, person: Person) {
        let mut tables = self.tables.lock().await;
        tables.last_person_id = tables.last_person_id.max(person.id);
        tables.persons.insert(person.id, person);
    }

    pub async fn seed_user(&self, user: User) {
        self.tables.lock().await.users.insert(user.id, user);
    }

    pub async fn seed_group(&self, group: Group) {
        self.tables.lock().await.groups.insert(group.id, group);
    }

    pub async fn add_group_member(&self, group_id: i64, user_id: i64) {
        self.tables
            .lock()
            .await
            .memberships
            .insert((group_id, user_id));
    }

    pub async fn seed_rule(&self, rule: LeadFlowRule) {
        let mut tables = self.tables.lock().await;
        tables.last_rule_id = tables.last_rule_id.max(rule.id);
        for condition in &rule.conditions {
            tables.last_condition_id = tables.last_condition_id.max(condition.id);
        }
        tables.rules.insert(rule.id, rule);
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_person(
        &self,
        tenant: TenantId,
        person: NewPerson,
    ) -> Result<Person, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let id = tables.next_person_id();
        let row = Person {
            id,
            tenant_id: tenant,
            name: person.name,
            email: person.email,
            stage_id: person.stage_id,
            source_type: person.source_type,
            source_name: person.source_name,
            fields: Json(person.fields),
            assigned_user_id: None,
            initial_assigned_user_id: None,
            available_for_group_id: None,
            claim_expires_at: None,
            last_group_id: None,
            pond_id: None,
            created_at: now,
            updated_at: now,
        };
        tables.persons.insert(id, row.clone());
        Ok(row)
    }

    async fn get_person(
        &self,
        tenant: TenantId,
        person_id: i64,
    ) -> Result<Option<Person>, StoreError> {
        Ok(self.tables.lock().await.person(tenant, person_id).cloned())
    }

    async fn apply_route(
        &self,
        tenant: TenantId,
        person_id: i64,
        rule_id: i64,
        destination: RuleDestination,
        pool_expires_at: DateTime<Utc>,
    ) -> Result<Person, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let Some(person) = tables.person_mut(tenant, person_id) else {
            return Err(StoreError::UnknownPerson { person_id });
        };

        match destination {
            RuleDestination::Agent(user_id) | RuleDestination::Lender(user_id) => {
                person.assigned_user_id = Some(user_id);
                person.initial_assigned_user_id =
                    person.initial_assigned_user_id.or(Some(user_id));
                person.available_for_group_id = None;
                person.claim_expires_at = None;
            }
            RuleDestination::Group(group_id) => {
                person.available_for_group_id = Some(group_id);
                person.claim_expires_at = Some(pool_expires_at);
            }
            RuleDestination::Pond(pond_id) => {
                person.pond_id = Some(pond_id);
                person.available_for_group_id = None;
                person.claim_expires_at = None;
            }
        }
        person.updated_at = now;
        let routed = person.clone();

        tables.bump_rule_count(tenant, rule_id, 1, now);
        Ok(routed)
    }

    async fn pool_for_group(
        &self,
        tenant: TenantId,
        rule_id: i64,
        group_id: i64,
        person_ids: &[i64],
        expires_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let mut pooled = 0u64;
        for person_id in person_ids {
            let Some(person) = tables.person_mut(tenant, *person_id) else {
                continue;
            };
            if matches!(person.available_for_group_id, Some(other) if other != group_id) {
                continue;
            }
            person.available_for_group_id = Some(group_id);
            person.claim_expires_at = Some(expires_at);
            person.updated_at = now;
            pooled += 1;
        }

        if pooled > 0 {
            tables.bump_rule_count(tenant, rule_id, pooled as i64, now);
        }
        Ok(pooled)
    }

    async fn claim_lead(
        &self,
        tenant: TenantId,
        person_id: i64,
        user_id: i64,
    ) -> Result<Person, ClaimError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let Some(person) = tables.person(tenant, person_id) else {
            return Err(ClaimError::NotFound);
        };

        let (group_exists, claimer_is_member) = match person.available_for_group_id {
            Some(group_id) => (
                tables
                    .groups
                    .get(&group_id)
                    .is_some_and(|group| group.tenant_id == tenant),
                tables.memberships.contains(&(group_id, user_id)),
            ),
            None => (false, false),
        };
        let assignee_role: Option<Role> = person.assigned_user_id.and_then(|assignee_id| {
            tables
                .users
                .get(&assignee_id)
                .filter(|user| user.tenant_id == tenant)
                .map(|user| user.role)
        });

        let ctx = ClaimContext {
            group_exists,
            claimer_is_member,
            assignee_role,
            now,
        };
        claim::evaluate(person, &ctx)?;

        let Some(person) = tables.person_mut(tenant, person_id) else {
            return Err(ClaimError::NotFound);
        };
        claim::apply_claim(person, user_id, now);
        Ok(person.clone())
    }

    async fn list_rules(&self, tenant: TenantId) -> Result<Vec<LeadFlowRule>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rules: Vec<LeadFlowRule> = tables
            .rules
            .values()
            .filter(|rule| rule.tenant_id == tenant)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| (rule.priority, rule.id));
        Ok(rules)
    }

    async fn get_rule(
        &self,
        tenant: TenantId,
        rule_id: i64,
    ) -> Result<Option<LeadFlowRule>, StoreError> {
        Ok(self.tables.lock().await.rule(tenant, rule_id).cloned())
    }

    async fn create_rule(
        &self,
        tenant: TenantId,
        rule: NewRule,
    ) -> Result<LeadFlowRule, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let rule_id = tables.next_rule_id();
        let conditions = tables.materialize_conditions(rule_id, &rule.conditions);
        let (agent_id, lender_id, group_id, pond_id) = rule.destination.into_columns();

        let row = LeadFlowRule {
            id: rule_id,
            tenant_id: tenant,
            name: rule.name,
            source_type: rule.source_type,
            source_name: rule.source_name,
            priority: rule.priority,
            is_active: rule.is_active,
            is_default: rule.is_default,
            match_type: rule.match_type,
            assigned_agent_id: agent_id,
            assigned_lender_id: lender_id,
            group_id,
            pond_id,
            leads_count: 0,
            conditions,
            created_at: now,
            updated_at: now,
        };
        tables.rules.insert(rule_id, row.clone());
        Ok(row)
    }

    async fn update_rule(
        &self,
        tenant: TenantId,
        rule_id: i64,
        rule: NewRule,
    ) -> Result<Option<LeadFlowRule>, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.rule(tenant, rule_id).is_none() {
            return Ok(None);
        }

        let now = Utc::now();
        let conditions = tables.materialize_conditions(rule_id, &rule.conditions);
        let (agent_id, lender_id, group_id, pond_id) = rule.destination.into_columns();

        let Some(existing) = tables.rules.get_mut(&rule_id) else {
            return Ok(None);
        };
        existing.name = rule.name;
        existing.source_type = rule.source_type;
        existing.source_name = rule.source_name;
        existing.priority = rule.priority;
        existing.is_active = rule.is_active;
        existing.is_default = rule.is_default;
        existing.match_type = rule.match_type;
        existing.assigned_agent_id = agent_id;
        existing.assigned_lender_id = lender_id;
        existing.group_id = group_id;
        existing.pond_id = pond_id;
        existing.conditions = conditions;
        existing.updated_at = now;
        Ok(Some(existing.clone()))
    }

    async fn delete_rule(&self, tenant: TenantId, rule_id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.rule(tenant, rule_id).is_none() {
            return Ok(false);
        }
        tables.rules.remove(&rule_id);
        Ok(true)
    }

    async fn reorder_rules(
        &self,
        tenant: TenantId,
        priorities: &[RulePriority],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        // Validate the whole batch before touching anything, so a bad id
        // leaves every priority as it was.
        for change in priorities {
            if tables.rule(tenant, change.id).is_none() {
                return Err(StoreError::UnknownRule { rule_id: change.id });
            }
        }

        let now = Utc::now();
        for change in priorities {
            if let Some(rule) = tables.rules.get_mut(&change.id) {
                rule.priority = change.priority;
                rule.updated_at = now;
            }
        }
        Ok(())
    }

    async fn copy_rules(
        &self,
        tenant: TenantId,
        from: &SourceRef,
        to: &SourceRef,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let mut sources: Vec<LeadFlowRule> = tables
            .rules
            .values()
            .filter(|rule| {
                rule.tenant_id == tenant
                    && rule.source_type == from.source_type
                    && rule.source_name == from.source_name
            })
            .cloned()
            .collect();
        sources.sort_by_key(|rule| (rule.priority, rule.id));

        let mut copied = 0u64;
        for source in sources {
            let rule_id = tables.next_rule_id();
            let conditions = source
                .conditions
                .iter()
                .map(|condition| RuleCondition {
                    id: tables.next_condition_id(),
                    rule_id,
                    ..condition.clone()
                })
                .collect();

            let clone = LeadFlowRule {
                id: rule_id,
                tenant_id: tenant,
                name: source.name.clone(),
                source_type: to.source_type.clone(),
                source_name: to.source_name.clone(),
                priority: source.priority,
                is_active: source.is_active,
                is_default: source.is_default,
                match_type: source.match_type,
                assigned_agent_id: source.assigned_agent_id,
                assigned_lender_id: source.assigned_lender_id,
                group_id: source.group_id,
                pond_id: source.pond_id,
                leads_count: 0,
                conditions,
                created_at: now,
                updated_at: now,
            };
            tables.rules.insert(rule_id, clone);
            copied += 1;
        }
        Ok(copied)
    }
}
