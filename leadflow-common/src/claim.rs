//! The claim decision: whether an agent may take ownership of a pooled
//! lead. Both store backends run this against a snapshot taken under lock,
//! so at most one concurrent claimer can see a passing result.

use chrono::{DateTime, Utc};

use crate::error::ClaimError;
use crate::types::{Person, Role};

/// Everything outside the person row that the decision needs. Callers load
/// these within the same transaction that locked the person row.
#[derive(Debug, Clone, Copy)]
pub struct ClaimContext {
    /// The pool group still exists in this tenant.
    pub group_exists: bool,
    /// The acting user is a member of the pool group.
    pub claimer_is_member: bool,
    /// Role of the currently assigned user, when the person is assigned and
    /// that user can still be found in the tenant.
    pub assignee_role: Option<Role>,
    pub now: DateTime<Utc>,
}

/// Decides whether a claim may proceed. Checks run in a fixed order so that
/// concurrent claimers observing the same state report the same failure.
pub fn evaluate(person: &Person, ctx: &ClaimContext) -> Result<(), ClaimError> {
    let Some(expires_at) = person.claim_expires_at else {
        return Err(ClaimError::NotAvailable);
    };
    if person.available_for_group_id.is_none() {
        return Err(ClaimError::NotAvailable);
    }
    if ctx.now > expires_at {
        return Err(ClaimError::Expired);
    }
    if !ctx.group_exists {
        return Err(ClaimError::NotAvailable);
    }
    if !ctx.claimer_is_member {
        return Err(ClaimError::Forbidden);
    }
    if person.assigned_user_id.is_some() {
        match ctx.assignee_role {
            // The assigned user is gone from the tenant; the hold is void.
            None => {}
            // Owner and admin assignments are placeholders that any
            // eligible group member may take over.
            Some(role) if role.is_privileged() => {}
            Some(_) => return Err(ClaimError::AlreadyAssigned),
        }
    }
    Ok(())
}

/// Applies a successful claim to the person. The SQL UPDATE in the Postgres
/// store mirrors this exactly; keep the two in sync.
pub fn apply_claim(person: &mut Person, user_id: i64, now: DateTime<Utc>) {
    person.last_group_id = person.available_for_group_id;
    person.assigned_user_id = Some(user_id);
    person.available_for_group_id = None;
    person.claim_expires_at = None;
    person.updated_at = now;
}
