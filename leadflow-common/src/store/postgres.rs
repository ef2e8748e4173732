use std::cmp::min;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::claim::{self, ClaimContext};
use crate::error::{ClaimError, StoreError};
use crate::metrics::CLAIM_RETRIES_COUNTER;
use crate::store::LeadStore;
use crate::types::{
    LeadFlowRule, MatchType, NewCondition, NewPerson, NewRule, Person, Role, RuleCondition,
    RuleDestination, RulePriority, SourceRef, TenantId,
};

/// Knobs for the claim transaction. Values come from service configuration;
/// see the API crate's `Config`.
#[derive(Debug, Clone, Copy)]
pub struct ClaimSettings {
    /// Attempts per claim before a serialization conflict is surfaced.
    pub max_attempts: u32,
    /// `statement_timeout` applied inside the claim transaction, so a
    /// contended row lock cannot hold an API request hostage.
    pub statement_timeout_ms: u64,
}

pub struct PgLeadStore {
    pool: PgPool,
    claim: ClaimSettings,
}

impl PgLeadStore {
    /// Initialize a lead store backed by a lazy connection pool.
    pub fn new(url: &str, max_connections: u32, claim: ClaimSettings) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|error| StoreError::PoolCreation { error })?
            .application_name("leadflow-api");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy_with(options);
        Ok(Self { pool, claim })
    }

    pub fn from_pool(pool: PgPool, claim: ClaimSettings) -> Self {
        Self { pool, claim }
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|error| StoreError::Migration { error })
    }

    /// One claim transaction. Row lock first, then every precondition is
    /// checked against state read under that lock, then the assignment is
    /// written. Dropping the transaction on any early return rolls back.
    async fn try_claim(
        &self,
        tenant: TenantId,
        person_id: i64,
        user_id: i64,
    ) -> Result<Person, ClaimError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| claim_db_error("BEGIN claim", person_id, user_id, error))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|error| claim_db_error("SET TRANSACTION claim", person_id, user_id, error))?;

        // statement_timeout takes no bind parameters; the value is a
        // trusted config integer.
        let timeout_query = format!(
            "SET LOCAL statement_timeout = {}",
            self.claim.statement_timeout_ms
        );
        sqlx::query(&timeout_query)
            .execute(&mut *tx)
            .await
            .map_err(|error| claim_db_error("SET LOCAL claim", person_id, user_id, error))?;

        let person: Option<Person> =
            sqlx::query_as("SELECT * FROM persons WHERE id = $1 AND tenant_id = $2 FOR UPDATE")
                .bind(person_id)
                .bind(tenant)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|error| {
                    claim_db_error("SELECT persons FOR UPDATE", person_id, user_id, error)
                })?;
        let Some(person) = person else {
            return Err(ClaimError::NotFound);
        };

        let (group_exists, claimer_is_member) = match person.available_for_group_id {
            Some(group_id) => {
                let group_exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM groups WHERE id = $1 AND tenant_id = $2)",
                )
                .bind(group_id)
                .bind(tenant)
                .fetch_one(&mut *tx)
                .await
                .map_err(|error| claim_db_error("SELECT groups", person_id, user_id, error))?;

                let claimer_is_member: bool = sqlx::query_scalar(
                    r#"
SELECT EXISTS (
    SELECT 1
    FROM group_members gm
    JOIN groups g ON g.id = gm.group_id
    WHERE gm.group_id = $1 AND g.tenant_id = $2 AND gm.user_id = $3
)
                    "#,
                )
                .bind(group_id)
                .bind(tenant)
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|error| {
                    claim_db_error("SELECT group_members", person_id, user_id, error)
                })?;

                (group_exists, claimer_is_member)
            }
            None => (false, false),
        };

        let assignee_role: Option<Role> = match person.assigned_user_id {
            Some(assignee_id) => {
                sqlx::query_scalar("SELECT role FROM users WHERE id = $1 AND tenant_id = $2")
                    .bind(assignee_id)
                    .bind(tenant)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|error| claim_db_error("SELECT users", person_id, user_id, error))?
            }
            None => None,
        };

        let ctx = ClaimContext {
            group_exists,
            claimer_is_member,
            assignee_role,
            now: Utc::now(),
        };
        claim::evaluate(&person, &ctx)?;

        // Mirrors claim::apply_claim.
        let claimed: Person = sqlx::query_as(
            r#"
UPDATE persons
SET assigned_user_id = $3,
    last_group_id = available_for_group_id,
    available_for_group_id = NULL,
    claim_expires_at = NULL,
    updated_at = NOW()
WHERE id = $1 AND tenant_id = $2
RETURNING *
            "#,
        )
        .bind(person_id)
        .bind(tenant)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|error| claim_db_error("UPDATE persons claim", person_id, user_id, error))?;

        tx.commit()
            .await
            .map_err(|error| claim_db_error("COMMIT claim", person_id, user_id, error))?;

        Ok(claimed)
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(query_error("SELECT 1"))?;
        Ok(())
    }

    async fn create_person(
        &self,
        tenant: TenantId,
        person: NewPerson,
    ) -> Result<Person, StoreError> {
        sqlx::query_as(
            r#"
INSERT INTO persons (tenant_id, name, email, stage_id, source_type, source_name, fields)
VALUES ($1, $2, $3, $4, $5, $6, $7)
RETURNING *
            "#,
        )
        .bind(tenant)
        .bind(person.name.as_str())
        .bind(person.email.as_deref())
        .bind(person.stage_id)
        .bind(person.source_type.as_deref())
        .bind(person.source_name.as_deref())
        .bind(Json(person.fields))
        .fetch_one(&self.pool)
        .await
        .map_err(query_error("INSERT persons"))
    }

    async fn get_person(
        &self,
        tenant: TenantId,
        person_id: i64,
    ) -> Result<Option<Person>, StoreError> {
        sqlx::query_as("SELECT * FROM persons WHERE id = $1 AND tenant_id = $2")
            .bind(person_id)
            .bind(tenant)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("SELECT persons"))
    }

    async fn apply_route(
        &self,
        tenant: TenantId,
        person_id: i64,
        rule_id: i64,
        destination: RuleDestination,
        pool_expires_at: DateTime<Utc>,
    ) -> Result<Person, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|error| {
            StoreError::Transaction {
                command: "BEGIN route".to_owned(),
                error,
            }
        })?;

        let update = match destination {
            RuleDestination::Agent(user_id) | RuleDestination::Lender(user_id) => sqlx::query_as(
                r#"
UPDATE persons
SET assigned_user_id = $3,
    initial_assigned_user_id = COALESCE(initial_assigned_user_id, $3),
    available_for_group_id = NULL,
    claim_expires_at = NULL,
    updated_at = NOW()
WHERE id = $1 AND tenant_id = $2
RETURNING *
                "#,
            )
            .bind(person_id)
            .bind(tenant)
            .bind(user_id),
            RuleDestination::Group(group_id) => sqlx::query_as(
                r#"
UPDATE persons
SET available_for_group_id = $3,
    claim_expires_at = $4,
    updated_at = NOW()
WHERE id = $1 AND tenant_id = $2
RETURNING *
                "#,
            )
            .bind(person_id)
            .bind(tenant)
            .bind(group_id)
            .bind(pool_expires_at),
            RuleDestination::Pond(pond_id) => sqlx::query_as(
                r#"
UPDATE persons
SET pond_id = $3,
    available_for_group_id = NULL,
    claim_expires_at = NULL,
    updated_at = NOW()
WHERE id = $1 AND tenant_id = $2
RETURNING *
                "#,
            )
            .bind(person_id)
            .bind(tenant)
            .bind(pond_id),
        };

        let person: Option<Person> = update
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error("UPDATE persons route"))?;
        let Some(person) = person else {
            return Err(StoreError::UnknownPerson { person_id });
        };

        sqlx::query(
            r#"
UPDATE lead_flow_rules
SET leads_count = leads_count + 1, updated_at = NOW()
WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(rule_id)
        .bind(tenant)
        .execute(&mut *tx)
        .await
        .map_err(query_error("UPDATE lead_flow_rules count"))?;

        tx.commit().await.map_err(|error| StoreError::Transaction {
            command: "COMMIT route".to_owned(),
            error,
        })?;

        Ok(person)
    }

    async fn pool_for_group(
        &self,
        tenant: TenantId,
        rule_id: i64,
        group_id: i64,
        person_ids: &[i64],
        expires_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if person_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(|error| {
            StoreError::Transaction {
                command: "BEGIN distribute".to_owned(),
                error,
            }
        })?;

        let result = sqlx::query(
            r#"
UPDATE persons
SET available_for_group_id = $1,
    claim_expires_at = $2,
    updated_at = NOW()
WHERE tenant_id = $3
  AND id = ANY($4)
  AND (available_for_group_id IS NULL OR available_for_group_id = $1)
            "#,
        )
        .bind(group_id)
        .bind(expires_at)
        .bind(tenant)
        .bind(person_ids)
        .execute(&mut *tx)
        .await
        .map_err(query_error("UPDATE persons distribute"))?;

        let pooled = result.rows_affected();
        if pooled > 0 {
            sqlx::query(
                r#"
UPDATE lead_flow_rules
SET leads_count = leads_count + $3, updated_at = NOW()
WHERE id = $1 AND tenant_id = $2
                "#,
            )
            .bind(rule_id)
            .bind(tenant)
            .bind(pooled as i64)
            .execute(&mut *tx)
            .await
            .map_err(query_error("UPDATE lead_flow_rules count"))?;
        }

        tx.commit().await.map_err(|error| StoreError::Transaction {
            command: "COMMIT distribute".to_owned(),
            error,
        })?;

        Ok(pooled)
    }

    async fn claim_lead(
        &self,
        tenant: TenantId,
        person_id: i64,
        user_id: i64,
    ) -> Result<Person, ClaimError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_claim(tenant, person_id, user_id).await {
                Err(ClaimError::TransientConflict) if attempt < self.claim.max_attempts => {
                    metrics::counter!(CLAIM_RETRIES_COUNTER).increment(1);
                    let backoff = claim_backoff(attempt);
                    tracing::debug!(
                        person_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying claim after serialization conflict"
                    );
                    tokio::time::sleep(backoff).await;
                }
                result => return result,
            }
        }
    }

    async fn list_rules(&self, tenant: TenantId) -> Result<Vec<LeadFlowRule>, StoreError> {
        let rows: Vec<RuleRow> =
            sqlx::query_as("SELECT * FROM lead_flow_rules WHERE tenant_id = $1 ORDER BY priority, id")
                .bind(tenant)
                .fetch_all(&self.pool)
                .await
                .map_err(query_error("SELECT lead_flow_rules"))?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let conditions: Vec<RuleCondition> = sqlx::query_as(
            r#"
SELECT * FROM rule_conditions
WHERE rule_id = ANY($1)
ORDER BY rule_id, condition_order, id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("SELECT rule_conditions"))?;

        let mut by_rule: HashMap<i64, Vec<RuleCondition>> = HashMap::new();
        for condition in conditions {
            by_rule.entry(condition.rule_id).or_default().push(condition);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let conditions = by_rule.remove(&row.id).unwrap_or_default();
                row.into_rule(conditions)
            })
            .collect())
    }

    async fn get_rule(
        &self,
        tenant: TenantId,
        rule_id: i64,
    ) -> Result<Option<LeadFlowRule>, StoreError> {
        let row: Option<RuleRow> =
            sqlx::query_as("SELECT * FROM lead_flow_rules WHERE id = $1 AND tenant_id = $2")
                .bind(rule_id)
                .bind(tenant)
                .fetch_optional(&self.pool)
                .await
                .map_err(query_error("SELECT lead_flow_rules"))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let conditions: Vec<RuleCondition> = sqlx::query_as(
            "SELECT * FROM rule_conditions WHERE rule_id = $1 ORDER BY condition_order, id",
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("SELECT rule_conditions"))?;

        Ok(Some(row.into_rule(conditions)))
    }

    async fn create_rule(
        &self,
        tenant: TenantId,
        rule: NewRule,
    ) -> Result<LeadFlowRule, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|error| {
            StoreError::Transaction {
                command: "BEGIN create rule".to_owned(),
                error,
            }
        })?;

        let (agent_id, lender_id, group_id, pond_id) = rule.destination.into_columns();
        let row: RuleRow = sqlx::query_as(
            r#"
INSERT INTO lead_flow_rules (
    tenant_id, name, source_type, source_name, priority, is_active, is_default,
    match_type, assigned_agent_id, assigned_lender_id, group_id, pond_id
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
RETURNING *
            "#,
        )
        .bind(tenant)
        .bind(rule.name.as_str())
        .bind(rule.source_type.as_deref())
        .bind(rule.source_name.as_deref())
        .bind(rule.priority)
        .bind(rule.is_active)
        .bind(rule.is_default)
        .bind(rule.match_type)
        .bind(agent_id)
        .bind(lender_id)
        .bind(group_id)
        .bind(pond_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(query_error("INSERT lead_flow_rules"))?;

        let conditions = insert_conditions(&mut tx, row.id, &rule.conditions).await?;

        tx.commit().await.map_err(|error| StoreError::Transaction {
            command: "COMMIT create rule".to_owned(),
            error,
        })?;

        Ok(row.into_rule(conditions))
    }

    async fn update_rule(
        &self,
        tenant: TenantId,
        rule_id: i64,
        rule: NewRule,
    ) -> Result<Option<LeadFlowRule>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|error| {
            StoreError::Transaction {
                command: "BEGIN update rule".to_owned(),
                error,
            }
        })?;

        let (agent_id, lender_id, group_id, pond_id) = rule.destination.into_columns();
        let row: Option<RuleRow> = sqlx::query_as(
            r#"
UPDATE lead_flow_rules
SET name = $3,
    source_type = $4,
    source_name = $5,
    priority = $6,
    is_active = $7,
    is_default = $8,
    match_type = $9,
    assigned_agent_id = $10,
    assigned_lender_id = $11,
    group_id = $12,
    pond_id = $13,
    updated_at = NOW()
WHERE id = $1 AND tenant_id = $2
RETURNING *
            "#,
        )
        .bind(rule_id)
        .bind(tenant)
        .bind(rule.name.as_str())
        .bind(rule.source_type.as_deref())
        .bind(rule.source_name.as_deref())
        .bind(rule.priority)
        .bind(rule.is_active)
        .bind(rule.is_default)
        .bind(rule.match_type)
        .bind(agent_id)
        .bind(lender_id)
        .bind(group_id)
        .bind(pond_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error("UPDATE lead_flow_rules"))?;
        let Some(row) = row else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM rule_conditions WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&mut *tx)
            .await
            .map_err(query_error("DELETE rule_conditions"))?;
        let conditions = insert_conditions(&mut tx, rule_id, &rule.conditions).await?;

        tx.commit().await.map_err(|error| StoreError::Transaction {
            command: "COMMIT update rule".to_owned(),
            error,
        })?;

        Ok(Some(row.into_rule(conditions)))
    }

    async fn delete_rule(&self, tenant: TenantId, rule_id: i64) -> Result<bool, StoreError> {
        // rule_conditions go with the rule via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM lead_flow_rules WHERE id = $1 AND tenant_id = $2")
            .bind(rule_id)
            .bind(tenant)
            .execute(&self.pool)
            .await
            .map_err(query_error("DELETE lead_flow_rules"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn reorder_rules(
        &self,
        tenant: TenantId,
        priorities: &[RulePriority],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|error| {
            StoreError::Transaction {
                command: "BEGIN reorder".to_owned(),
                error,
            }
        })?;

        for change in priorities {
            let result = sqlx::query(
                r#"
UPDATE lead_flow_rules
SET priority = $3, updated_at = NOW()
WHERE id = $1 AND tenant_id = $2
                "#,
            )
            .bind(change.id)
            .bind(tenant)
            .bind(change.priority)
            .execute(&mut *tx)
            .await
            .map_err(query_error("UPDATE lead_flow_rules priority"))?;

            if result.rows_affected() == 0 {
                // Dropping the transaction rolls back the earlier updates.
                return Err(StoreError::UnknownRule {
                    rule_id: change.id,
                });
            }
        }

        tx.commit().await.map_err(|error| StoreError::Transaction {
            command: "COMMIT reorder".to_owned(),
            error,
        })
    }

    async fn copy_rules(
        &self,
        tenant: TenantId,
        from: &SourceRef,
        to: &SourceRef,
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|error| {
            StoreError::Transaction {
                command: "BEGIN copy rules".to_owned(),
                error,
            }
        })?;

        // IS NOT DISTINCT FROM makes NULL source components compare as
        // equal, matching the verbatim copy semantics.
        let sources: Vec<RuleRow> = sqlx::query_as(
            r#"
SELECT * FROM lead_flow_rules
WHERE tenant_id = $1
  AND source_type IS NOT DISTINCT FROM $2
  AND source_name IS NOT DISTINCT FROM $3
ORDER BY priority, id
            "#,
        )
        .bind(tenant)
        .bind(from.source_type.as_deref())
        .bind(from.source_name.as_deref())
        .fetch_all(&mut *tx)
        .await
        .map_err(query_error("SELECT lead_flow_rules"))?;

        let mut copied = 0u64;
        for source in &sources {
            let clone: RuleRow = sqlx::query_as(
                r#"
INSERT INTO lead_flow_rules (
    tenant_id, name, source_type, source_name, priority, is_active, is_default,
    match_type, assigned_agent_id, assigned_lender_id, group_id, pond_id
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
RETURNING *
                "#,
            )
            .bind(tenant)
            .bind(source.name.as_str())
            .bind(to.source_type.as_deref())
            .bind(to.source_name.as_deref())
            .bind(source.priority)
            .bind(source.is_active)
            .bind(source.is_default)
            .bind(source.match_type)
            .bind(source.assigned_agent_id)
            .bind(source.assigned_lender_id)
            .bind(source.group_id)
            .bind(source.pond_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(query_error("INSERT lead_flow_rules"))?;

            sqlx::query(
                r#"
INSERT INTO rule_conditions (rule_id, field, operator, value, condition_order)
SELECT $2, field, operator, value, condition_order
FROM rule_conditions
WHERE rule_id = $1
                "#,
            )
            .bind(source.id)
            .bind(clone.id)
            .execute(&mut *tx)
            .await
            .map_err(query_error("INSERT rule_conditions"))?;

            copied += 1;
        }

        tx.commit().await.map_err(|error| StoreError::Transaction {
            command: "COMMIT copy rules".to_owned(),
            error,
        })?;

        Ok(copied)
    }
}

/// Database row of a rule, without its conditions.
#[derive(sqlx::FromRow)]
struct RuleRow {
    id: i64,
    tenant_id: TenantId,
    name: String,
    source_type: Option<String>,
    source_name: Option<String>,
    priority: i32,
    is_active: bool,
    is_default: bool,
    match_type: MatchType,
    assigned_agent_id: Option<i64>,
    assigned_lender_id: Option<i64>,
    group_id: Option<i64>,
    pond_id: Option<i64>,
    leads_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RuleRow {
    fn into_rule(self, conditions: Vec<RuleCondition>) -> LeadFlowRule {
        LeadFlowRule {
            id: self.id,
            tenant_id: self.tenant_id,
            name: self.name,
            source_type: self.source_type,
            source_name: self.source_name,
            priority: self.priority,
            is_active: self.is_active,
            is_default: self.is_default,
            match_type: self.match_type,
            assigned_agent_id: self.assigned_agent_id,
            assigned_lender_id: self.assigned_lender_id,
            group_id: self.group_id,
            pond_id: self.pond_id,
            leads_count: self.leads_count,
            conditions,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

async fn insert_conditions(
    tx: &mut Transaction<'_, Postgres>,
    rule_id: i64,
    conditions: &[NewCondition],
) -> Result<Vec<RuleCondition>, StoreError> {
    let mut inserted = Vec::with_capacity(conditions.len());
    for (index, condition) in conditions.iter().enumerate() {
        let row: RuleCondition = sqlx::query_as(
            r#"
INSERT INTO rule_conditions (rule_id, field, operator, value, condition_order)
VALUES ($1, $2, $3, $4, $5)
RETURNING *
            "#,
        )
        .bind(rule_id)
        .bind(condition.field.as_str())
        .bind(condition.operator.as_str())
        .bind(condition.value.clone())
        .bind(index as i32)
        .fetch_one(&mut **tx)
        .await
        .map_err(query_error("INSERT rule_conditions"))?;
        inserted.push(row);
    }
    Ok(inserted)
}

fn query_error(command: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |error| StoreError::Query {
        command: command.to_owned(),
        error,
    }
}

/// Maps a database failure inside the claim transaction to a claim outcome.
/// Serialization failures and deadlocks are worth retrying; everything
/// else, including a statement timeout, fails the claim closed.
fn claim_db_error(command: &str, person_id: i64, user_id: i64, error: sqlx::Error) -> ClaimError {
    if let sqlx::Error::Database(db_error) = &error {
        if let Some(code) = db_error.code() {
            if code == "40001" || code == "40P01" {
                return ClaimError::TransientConflict;
            }
        }
    }
    tracing::error!(person_id, user_id, command, error = %error, "claim transaction failed");
    ClaimError::Internal
}

/// Exponential backoff with jitter, capped so the worst case of a full
/// retry budget stays well under a second.
fn claim_backoff(attempt: u32) -> Duration {
    let step = 25u64 << min(attempt.saturating_sub(1), 3);
    let jitter = rand::thread_rng().gen_range(0..25);
    Duration::from_millis(step + jitter)
}
