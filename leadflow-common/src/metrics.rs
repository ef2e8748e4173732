use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Claim attempts by final outcome ("claimed" or a `ClaimError` kind).
pub const CLAIMS_COUNTER: &str = "leadflow_claims_total";
/// Claim transactions retried after a serialization conflict.
pub const CLAIM_RETRIES_COUNTER: &str = "leadflow_claim_retries_total";
/// Leads routed by the rule engine, labelled by destination kind.
pub const ROUTED_COUNTER: &str = "leadflow_leads_routed_total";
/// Rules copied between sources.
pub const RULE_COPIES_COUNTER: &str = "leadflow_rule_copies_total";
/// Assignment events handed to the sink, labelled by delivery result.
pub const ASSIGNMENT_EVENTS_COUNTER: &str = "leadflow_assignment_events_total";

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)
        .unwrap()
        .install_recorder()
        .unwrap()
}

/// Middleware to record some common HTTP metrics
/// Someday tower-http might provide a metrics middleware: https://github.com/tower-rs/tower-http/issues/57
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    // Run the rest of the request handling first, so we can measure it and get response
    // codes.
    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
