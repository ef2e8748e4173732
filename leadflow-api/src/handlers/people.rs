use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use metrics::counter;
use tracing::instrument;

use leadflow_common::error::ValidationError;
use leadflow_common::metrics::ROUTED_COUNTER;
use leadflow_common::rules::resolve;
use leadflow_common::types::{NewPerson, Person, TenantId};

use crate::api::{ApiError, RoutedPersonResponse};
use crate::router::AppState;
use crate::tenant::Tenant;

/// Lead intake: create the person, then let the flow rules decide who works
/// the lead. A person no rule matches stays unrouted; that is not an error.
#[instrument(skip_all, fields(tenant_id = %tenant.0))]
pub async fn create_person(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Json(payload): Json<NewPerson>,
) -> Result<(StatusCode, Json<RoutedPersonResponse>), ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ValidationError::single("name", "name is required").into());
    }

    let person = state.store.create_person(tenant, payload).await?;
    let routed = route_person(&state, tenant, person).await?;
    Ok((StatusCode::CREATED, Json(routed)))
}

#[instrument(skip_all, fields(tenant_id = %tenant.0, person_id))]
pub async fn get_person(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(person_id): Path<i64>,
) -> Result<Json<Person>, ApiError> {
    tracing::Span::current().record("person_id", person_id);
    let person = state
        .store
        .get_person(tenant, person_id)
        .await?
        .ok_or(ApiError::NotFound("person"))?;
    Ok(Json(person))
}

async fn route_person(
    state: &AppState,
    tenant: TenantId,
    person: Person,
) -> Result<RoutedPersonResponse, ApiError> {
    let rules = state.store.list_rules(tenant).await?;
    let Some(route) = resolve(
        &rules,
        &person,
        person.source_type.as_deref(),
        person.source_name.as_deref(),
    ) else {
        tracing::debug!(person_id = person.id, "no flow rule matched, leaving unrouted");
        return Ok(RoutedPersonResponse {
            person,
            rule_id: None,
        });
    };

    let expires_at = Utc::now() + state.claim_window;
    let routed = state
        .store
        .apply_route(tenant, person.id, route.rule.id, route.destination, expires_at)
        .await?;

    let labels = [("destination", route.destination.kind().to_string())];
    counter!(ROUTED_COUNTER, &labels).increment(1);
    tracing::info!(
        person_id = routed.id,
        rule_id = route.rule.id,
        destination = route.destination.kind(),
        "routed incoming lead"
    );

    Ok(RoutedPersonResponse {
        person: routed,
        rule_id: Some(route.rule.id),
    })
}
