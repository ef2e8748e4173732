use std::future::ready;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use leadflow_common::events::EventSink;
use leadflow_common::metrics::{setup_metrics_recorder, track_metrics};
use leadflow_common::store::LeadStore;

use crate::handlers::{claim, people, rules};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LeadStore>,
    pub sink: Arc<dyn EventSink>,
    pub claim_window: chrono::Duration,
}

async fn index() -> &'static str {
    "leadflow api"
}

pub fn router(
    store: Arc<dyn LeadStore>,
    sink: Arc<dyn EventSink>,
    claim_window: chrono::Duration,
    metrics: bool,
) -> Router {
    let state = AppState {
        store: store.clone(),
        sink,
        claim_window,
    };

    let status_router = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(index))
        .route("/_readiness", get(move || readiness(store.clone())));

    let api_router = Router::new()
        .route("/api/v1/people", post(people::create_person))
        .route("/api/v1/people/:person_id", get(people::get_person))
        .route("/api/v1/people/:person_id/claim", post(claim::claim_person))
        .route(
            "/api/v1/lead-flow-rules",
            get(rules::list_rules).post(rules::create_rule),
        )
        .route("/api/v1/lead-flow-rules/reorder", post(rules::reorder_rules))
        .route(
            "/api/v1/lead-flow-rules/copy-from-source",
            post(rules::copy_rules),
        )
        .route(
            "/api/v1/lead-flow-rules/:rule_id",
            get(rules::get_rule)
                .put(rules::update_rule)
                .delete(rules::delete_rule),
        )
        .route(
            "/api/v1/lead-flow-rules/:rule_id/test",
            post(rules::test_rule),
        )
        .route(
            "/api/v1/lead-flow-rules/:rule_id/distribute",
            post(rules::distribute_rule),
        )
        .with_state(state);

    let router = Router::new()
        .merge(status_router)
        .merge(api_router)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics));

    // Don't install metrics unless asked to
    // Installing a global recorder when the router is built per test
    // does not work well.
    if metrics {
        let recorder_handle = setup_metrics_recorder();

        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}

async fn readiness(store: Arc<dyn LeadStore>) -> Result<&'static str, (StatusCode, String)> {
    store.ping().await.map_err(|error| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("store unavailable: {error}"),
        )
    })?;

    Ok("ready")
}
