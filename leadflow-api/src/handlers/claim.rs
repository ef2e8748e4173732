use axum::extract::{Path, State};
use axum::Json;
use metrics::counter;
use serde::Deserialize;
use tracing::instrument;

use leadflow_common::events::LeadAssigned;
use leadflow_common::metrics::{ASSIGNMENT_EVENTS_COUNTER, CLAIMS_COUNTER};
use leadflow_common::types::Person;

use crate::api::{ApiError, ClaimResponse};
use crate::router::AppState;
use crate::tenant::Tenant;

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub user_id: i64,
}

/// Resolves a race for a pooled lead. The store guarantees at most one
/// winner; this handler reports the outcome and, on a win, publishes the
/// assignment event after the claim has committed.
#[instrument(skip_all, fields(tenant_id = %tenant.0, person_id, user_id = payload.user_id))]
pub async fn claim_person(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(person_id): Path<i64>,
    Json(payload): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    tracing::Span::current().record("person_id", person_id);

    let result = state
        .store
        .claim_lead(tenant, person_id, payload.user_id)
        .await;

    let outcome = match &result {
        Ok(_) => "claimed",
        Err(error) => error.kind(),
    };
    let labels = [("outcome", outcome.to_string())];
    counter!(CLAIMS_COUNTER, &labels).increment(1);

    let person = result?;
    publish_assignment(&state, &person, payload.user_id).await;

    Ok(Json(ClaimResponse {
        status: "claimed",
        redirect: format!("/app/people/{}", person.id),
        person,
    }))
}

/// The claim is already committed by the time this runs, so delivery
/// problems are logged and counted but never turn the response into an
/// error.
async fn publish_assignment(state: &AppState, person: &Person, user_id: i64) {
    let event = LeadAssigned::from_claim(person, user_id);
    let result = match state.sink.lead_assigned(&event).await {
        Ok(()) => "delivered",
        Err(error) => {
            tracing::warn!(
                person_id = person.id,
                user_id,
                "failed to publish assignment event: {error}"
            );
            "failed"
        }
    };
    let labels = [("result", result.to_string())];
    counter!(ASSIGNMENT_EVENTS_COUNTER, &labels).increment(1);
}
