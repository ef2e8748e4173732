//! Persistence for people, users, groups and lead flow rules.
//!
//! All operations take the tenant explicitly and must never return or touch
//! rows belonging to another tenant. The Postgres store is the production
//! backend; the in-memory store backs tests and local development.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryLeadStore;
pub use postgres::{ClaimSettings, PgLeadStore};

use crate::error::{ClaimError, StoreError};
use crate::types::{
    LeadFlowRule, NewPerson, NewRule, Person, RuleDestination, RulePriority, SourceRef, TenantId,
};

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Readiness check: can the backend answer a trivial query right now?
    async fn ping(&self) -> Result<(), StoreError>;

    async fn create_person(&self, tenant: TenantId, person: NewPerson)
        -> Result<Person, StoreError>;

    async fn get_person(
        &self,
        tenant: TenantId,
        person_id: i64,
    ) -> Result<Option<Person>, StoreError>;

    /// Applies a resolved rule destination to a person and bumps the rule's
    /// routed-leads counter, atomically. `pool_expires_at` is only used for
    /// group destinations; direct assignments set the initial assignee the
    /// first time and clear any pool columns.
    async fn apply_route(
        &self,
        tenant: TenantId,
        person_id: i64,
        rule_id: i64,
        destination: RuleDestination,
        pool_expires_at: DateTime<Utc>,
    ) -> Result<Person, StoreError>;

    /// Offers the given persons to a group's claim pool on behalf of a
    /// rule. Persons that are missing or already pooled for a different
    /// group are skipped; re-pooling for the same group refreshes the
    /// expiry. Returns how many persons ended up pooled.
    async fn pool_for_group(
        &self,
        tenant: TenantId,
        rule_id: i64,
        group_id: i64,
        person_ids: &[i64],
        expires_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Resolves a claim by the acting user on a pooled lead. At most one
    /// concurrent caller can succeed for a given person; everyone else gets
    /// a `ClaimError` describing what they lost to.
    async fn claim_lead(
        &self,
        tenant: TenantId,
        person_id: i64,
        user_id: i64,
    ) -> Result<Person, ClaimError>;

    /// All rules of the tenant in (priority, id) order, conditions included.
    async fn list_rules(&self, tenant: TenantId) -> Result<Vec<LeadFlowRule>, StoreError>;

    async fn get_rule(
        &self,
        tenant: TenantId,
        rule_id: i64,
    ) -> Result<Option<LeadFlowRule>, StoreError>;

    async fn create_rule(&self, tenant: TenantId, rule: NewRule)
        -> Result<LeadFlowRule, StoreError>;

    /// Replaces a rule and its conditions wholesale in one transaction.
    /// Returns `None` when the rule does not exist for this tenant.
    async fn update_rule(
        &self,
        tenant: TenantId,
        rule_id: i64,
        rule: NewRule,
    ) -> Result<Option<LeadFlowRule>, StoreError>;

    /// Returns whether a rule was actually deleted.
    async fn delete_rule(&self, tenant: TenantId, rule_id: i64) -> Result<bool, StoreError>;

    /// Applies a batch of priority changes atomically. Fails with
    /// `StoreError::UnknownRule` and changes nothing if any id does not
    /// belong to the tenant.
    async fn reorder_rules(
        &self,
        tenant: TenantId,
        priorities: &[RulePriority],
    ) -> Result<(), StoreError>;

    /// Copies every rule registered under `from` to `to`, with fresh
    /// identities and zeroed counters. Source equality is verbatim, no
    /// wildcard expansion. Returns how many rules were copied.
    async fn copy_rules(
        &self,
        tenant: TenantId,
        from: &SourceRef,
        to: &SourceRef,
    ) -> Result<u64, StoreError>;
}
