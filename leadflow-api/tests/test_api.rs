//! End-to-end tests against the full router, backed by the in-memory store
//! so no database or network is involved. Every test gets a fresh app.

use std::sync::{Arc, Mutex};

use assert_json_diff::assert_json_include;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use tracing_subscriber::fmt::format::FmtSpan;

use leadflow_api::config::DEFAULT_TEST_CONFIG;
use leadflow_api::router::router;
use leadflow_api::tenant::TENANT_HEADER;
use leadflow_common::store::{LeadStore, MemoryLeadStore};
use leadflow_common::test_utils::{
    condition_for_rule, group, person, pooled_person, rule, user, FailingSink, RecordingSink,
};
use leadflow_common::types::{Role, TenantId};

const TENANT: i64 = 1;

struct TestApp {
    app: Router,
    store: Arc<MemoryLeadStore>,
    sink: Arc<RecordingSink>,
}

fn test_app() -> TestApp {
    let store = Arc::new(MemoryLeadStore::new());
    let sink = Arc::new(RecordingSink::new());
    let app = router(
        store.clone(),
        sink.clone(),
        DEFAULT_TEST_CONFIG.claim_window(),
        DEFAULT_TEST_CONFIG.export_prometheus,
    );
    TestApp { app, store, sink }
}

/// Group 10 with user 7 as its only member, the usual claim fixture.
async fn seed_pool_group(harness: &TestApp) {
    harness.store.seed_group(group(TENANT, 10)).await;
    harness.store.seed_user(user(TENANT, 7, Role::Agent)).await;
    harness.store.add_group_member(10, 7).await;
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(TENANT_HEADER, TENANT.to_string())
        .body(Body::empty())
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .header(TENANT_HEADER, TENANT.to_string())
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    json_request(Method::POST, uri, body)
}

fn put(uri: &str, body: Value) -> Request<Body> {
    json_request(Method::PUT, uri, body)
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(TENANT_HEADER, TENANT.to_string())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[derive(Clone)]
struct VecWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for VecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn it_serves_the_index_page() {
    let harness = test_app();

    let response = harness.app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"leadflow api");
}

#[tokio::test]
async fn it_reports_readiness_without_a_tenant_header() {
    let harness = test_app();
    let request = Request::builder()
        .method(Method::GET)
        .uri("/_readiness")
        .body(Body::empty())
        .unwrap();

    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn it_rejects_requests_without_a_tenant_header() {
    let harness = test_app();
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/lead-flow-rules")
        .body(Body::empty())
        .unwrap();

    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "missing_tenant");
}

#[tokio::test]
async fn it_scopes_lookups_to_the_tenant_header() {
    let harness = test_app();
    harness.store.seed_person(person(2, 1)).await;

    let response = harness
        .app
        .clone()
        .oneshot(get("/api/v1/people/1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn it_routes_an_incoming_lead_through_the_matching_rule() {
    let harness = test_app();
    let mut web_rule = rule(31);
    web_rule.source_type = Some("web".to_owned());
    web_rule.group_id = Some(10);
    web_rule.conditions = vec![condition_for_rule(1, 31, "stage_id", "eq", json!(2))];
    harness.store.seed_rule(web_rule).await;

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/people",
            json!({
                "name": "Ada Lovelace",
                "stage_id": 2,
                "source_type": "web",
                "source_name": "landing-page"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert_json_include!(
        actual: body,
        expected: json!({
            "rule_id": 31,
            "person": {
                "name": "Ada Lovelace",
                "available_for_group_id": 10,
                "assigned_user_id": null
            }
        })
    );

    let routed = harness
        .store
        .get_person(TenantId(TENANT), 1)
        .await
        .unwrap()
        .unwrap();
    assert!(routed.claim_expires_at.is_some());
    let counted = harness
        .store
        .get_rule(TenantId(TENANT), 31)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counted.leads_count, 1);
}

#[tokio::test]
async fn it_leaves_a_lead_unrouted_when_no_rule_matches() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(post("/api/v1/people", json!({"name": "Grace Hopper"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert_eq!(body["rule_id"], Value::Null);
    assert_eq!(body["person"]["available_for_group_id"], Value::Null);
    assert_eq!(body["person"]["assigned_user_id"], Value::Null);
}

#[tokio::test]
async fn it_rejects_intake_without_a_name() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(post("/api/v1/people", json!({"name": "   "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = json_body(response).await;
    assert_eq!(body["kind"], "validation_failed");
    assert_eq!(body["fields"]["name"], "name is required");
}

#[tokio::test]
async fn it_fetches_a_person_by_id() {
    let harness = test_app();
    harness.store.seed_person(person(TENANT, 8)).await;

    let response = harness
        .app
        .clone()
        .oneshot(get("/api/v1/people/8"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], 8);
    assert_eq!(body["tenant_id"], TENANT);
}

#[tokio::test]
async fn it_returns_not_found_for_missing_people() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(get("/api/v1/people/99"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn it_claims_a_pooled_lead_and_publishes_the_assignment() {
    let harness = test_app();
    seed_pool_group(&harness).await;
    harness
        .store
        .seed_person(pooled_person(TENANT, 1, 10))
        .await;

    let response = harness
        .app
        .clone()
        .oneshot(post("/api/v1/people/1/claim", json!({"user_id": 7})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_json_include!(
        actual: body,
        expected: json!({
            "status": "claimed",
            "redirect": "/app/people/1",
            "person": {
                "id": 1,
                "assigned_user_id": 7,
                "available_for_group_id": null,
                "claim_expires_at": null,
                "last_group_id": 10
            }
        })
    );

    let events = harness.sink.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].person_id, 1);
    assert_eq!(events[0].user_id, 7);
    assert_eq!(events[0].group_id, Some(10));
}

#[tokio::test]
async fn it_rejects_claims_on_unpooled_leads() {
    let harness = test_app();
    seed_pool_group(&harness).await;
    harness.store.seed_person(person(TENANT, 1)).await;

    let response = harness
        .app
        .clone()
        .oneshot(post("/api/v1/people/1/claim", json!({"user_id": 7})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "not_available");
}

#[tokio::test]
async fn it_rejects_claims_after_the_pool_window_closed() {
    let harness = test_app();
    seed_pool_group(&harness).await;
    let mut stale = pooled_person(TENANT, 1, 10);
    stale.claim_expires_at = Some(Utc::now() - Duration::minutes(1));
    harness.store.seed_person(stale).await;

    let response = harness
        .app
        .clone()
        .oneshot(post("/api/v1/people/1/claim", json!({"user_id": 7})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "expired");

    let untouched = harness
        .store
        .get_person(TenantId(TENANT), 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.assigned_user_id, None);
}

#[tokio::test]
async fn it_forbids_claims_from_outside_the_pool_group() {
    let harness = test_app();
    harness.store.seed_group(group(TENANT, 10)).await;
    harness.store.seed_user(user(TENANT, 7, Role::Agent)).await;
    harness
        .store
        .seed_person(pooled_person(TENANT, 1, 10))
        .await;

    let response = harness
        .app
        .clone()
        .oneshot(post("/api/v1/people/1/claim", json!({"user_id": 7})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "forbidden");
}

#[tokio::test]
async fn it_conflicts_when_an_agent_already_holds_the_lead() {
    let harness = test_app();
    seed_pool_group(&harness).await;
    harness.store.seed_user(user(TENANT, 8, Role::Agent)).await;
    let mut held = pooled_person(TENANT, 1, 10);
    held.assigned_user_id = Some(8);
    harness.store.seed_person(held).await;

    let response = harness
        .app
        .clone()
        .oneshot(post("/api/v1/people/1/claim", json!({"user_id": 7})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "already_assigned");
}

#[tokio::test]
async fn it_lets_members_take_over_an_admin_placeholder() {
    let harness = test_app();
    seed_pool_group(&harness).await;
    harness.store.seed_user(user(TENANT, 9, Role::Admin)).await;
    let mut held = pooled_person(TENANT, 1, 10);
    held.assigned_user_id = Some(9);
    harness.store.seed_person(held).await;

    let response = harness
        .app
        .clone()
        .oneshot(post("/api/v1/people/1/claim", json!({"user_id": 7})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["person"]["assigned_user_id"], 7);
}

#[tokio::test]
async fn it_returns_not_found_when_claiming_a_missing_person() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(post("/api/v1/people/42/claim", json!({"user_id": 7})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn it_keeps_the_claim_when_event_delivery_fails() {
    let store = Arc::new(MemoryLeadStore::new());
    let app = router(
        store.clone(),
        Arc::new(FailingSink),
        DEFAULT_TEST_CONFIG.claim_window(),
        DEFAULT_TEST_CONFIG.export_prometheus,
    );
    store.seed_group(group(TENANT, 10)).await;
    store.seed_user(user(TENANT, 7, Role::Agent)).await;
    store.add_group_member(10, 7).await;
    store.seed_person(pooled_person(TENANT, 1, 10)).await;

    let response = app
        .oneshot(post("/api/v1/people/1/claim", json!({"user_id": 7})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let committed = store.get_person(TenantId(TENANT), 1).await.unwrap().unwrap();
    assert_eq!(committed.assigned_user_id, Some(7));
}

#[tokio::test]
async fn it_stamps_request_spans_with_the_path_ids() {
    let harness = test_app();
    seed_pool_group(&harness).await;
    harness.store.seed_person(pooled_person(TENANT, 1, 10)).await;

    let logs = Arc::new(Mutex::new(Vec::new()));
    let writer = VecWriter(logs.clone());
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);

    let claimed = harness
        .app
        .clone()
        .oneshot(post("/api/v1/people/1/claim", json!({"user_id": 7})))
        .await
        .unwrap();
    assert_eq!(claimed.status(), StatusCode::OK);

    let missing = harness
        .app
        .clone()
        .oneshot(get("/api/v1/lead-flow-rules/31"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    drop(guard);

    let output = String::from_utf8(logs.lock().unwrap().clone()).unwrap();
    assert!(
        output.contains("person_id=1"),
        "span output missing the claimed person: {output}"
    );
    assert!(
        output.contains("user_id=7"),
        "span output missing the claimer: {output}"
    );
    assert!(
        output.contains("rule_id=31"),
        "span output missing the rule id: {output}"
    );
}

#[tokio::test]
async fn it_creates_and_lists_rules() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules",
            json!({
                "name": "downtown buyers",
                "source_type": "zillow",
                "source_name": "downtown",
                "priority": 5,
                "match_type": "any",
                "group_id": 4,
                "conditions": [
                    {"field": "city", "operator": "contains", "value": "austin"},
                    {"field": "budget", "operator": "gt", "value": 250000}
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert_json_include!(
        actual: body,
        expected: json!({
            "name": "downtown buyers",
            "priority": 5,
            "match_type": "any",
            "group_id": 4,
            "leads_count": 0,
            "conditions": [
                {"field": "city", "condition_order": 0},
                {"field": "budget", "condition_order": 1}
            ]
        })
    );

    let response = harness
        .app
        .clone()
        .oneshot(get("/api/v1/lead-flow-rules"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn it_lists_rules_in_priority_order() {
    let harness = test_app();
    let mut latecomer = rule(1);
    latecomer.priority = 200;
    let mut frontrunner = rule(2);
    frontrunner.priority = 50;
    harness.store.seed_rule(latecomer).await;
    harness.store.seed_rule(frontrunner).await;

    let response = harness
        .app
        .clone()
        .oneshot(get("/api/v1/lead-flow-rules"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body[0]["id"], 2);
    assert_eq!(body[1]["id"], 1);
}

#[tokio::test]
async fn it_replaces_conditions_wholesale_on_update() {
    let harness = test_app();
    let mut original = rule(31);
    original.conditions = vec![condition_for_rule(1, 31, "city", "eq", json!("Austin"))];
    harness.store.seed_rule(original).await;

    let response = harness
        .app
        .clone()
        .oneshot(put(
            "/api/v1/lead-flow-rules/31",
            json!({
                "name": "after",
                "match_type": "any",
                "group_id": 10,
                "conditions": [
                    {"field": "stage_id", "operator": "eq", "value": 2}
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["name"], "after");
    assert_eq!(body["match_type"], "any");
    let conditions = body["conditions"].as_array().unwrap();
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0]["field"], "stage_id");
}

#[tokio::test]
async fn it_returns_not_found_when_updating_a_missing_rule() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(put(
            "/api/v1/lead-flow-rules/99",
            json!({"name": "ghost", "group_id": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn it_deletes_a_rule_once() {
    let harness = test_app();
    harness.store.seed_rule(rule(31)).await;

    let response = harness
        .app
        .clone()
        .oneshot(delete("/api/v1/lead-flow-rules/31"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = harness
        .app
        .clone()
        .oneshot(delete("/api/v1/lead-flow-rules/31"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn it_rejects_rules_with_more_than_one_destination() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules",
            json!({"name": "torn", "group_id": 1, "pond_id": 2}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "validation_failed");
    assert!(body["fields"]["destination"].is_string());
}

#[tokio::test]
async fn it_reorders_rule_priorities() {
    let harness = test_app();
    let mut first = rule(1);
    first.priority = 10;
    let mut second = rule(2);
    second.priority = 20;
    harness.store.seed_rule(first).await;
    harness.store.seed_rule(second).await;

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/reorder",
            json!({"priorities": [{"id": 1, "priority": 30}, {"id": 2, "priority": 5}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness
        .app
        .clone()
        .oneshot(get("/api/v1/lead-flow-rules"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body[0]["id"], 2);
    assert_eq!(body[1]["id"], 1);
}

#[tokio::test]
async fn it_rejects_reorders_that_name_unknown_rules() {
    let harness = test_app();
    let mut only = rule(1);
    only.priority = 10;
    harness.store.seed_rule(only).await;

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/reorder",
            json!({"priorities": [{"id": 1, "priority": 99}, {"id": 8, "priority": 1}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "validation_failed");
    assert!(body["fields"]["rules"].is_string());

    let survivor = harness
        .store
        .get_rule(TenantId(TENANT), 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(survivor.priority, 10);
}

#[tokio::test]
async fn it_rejects_empty_reorder_requests() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/reorder",
            json!({"priorities": []}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn it_copies_a_rule_set_to_another_source() {
    let harness = test_app();
    let mut downtown = rule(1);
    downtown.source_type = Some("zillow".to_owned());
    downtown.source_name = Some("downtown".to_owned());
    downtown.conditions = vec![condition_for_rule(1, 1, "city", "eq", json!("Austin"))];
    let mut downtown_too = rule(2);
    downtown_too.source_type = Some("zillow".to_owned());
    downtown_too.source_name = Some("downtown".to_owned());
    harness.store.seed_rule(downtown).await;
    harness.store.seed_rule(downtown_too).await;

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/copy-from-source",
            json!({
                "from": {"source_type": "zillow", "source_name": "downtown"},
                "to": {"source_type": "zillow", "source_name": "uptown"}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["copied"], 2);

    let rules = harness.store.list_rules(TenantId(TENANT)).await.unwrap();
    assert_eq!(rules.len(), 4);
    let clones: Vec<_> = rules
        .iter()
        .filter(|candidate| candidate.source_name.as_deref() == Some("uptown"))
        .collect();
    assert_eq!(clones.len(), 2);
    assert!(clones.iter().all(|clone| clone.leads_count == 0));
}

#[tokio::test]
async fn it_rejects_copying_a_source_onto_itself() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/copy-from-source",
            json!({
                "from": {"source_type": "zillow", "source_name": "downtown"},
                "to": {"source_type": "zillow", "source_name": "downtown"}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert!(body["fields"]["to"].is_string());
}

#[tokio::test]
async fn it_dry_runs_a_rule_without_touching_state() {
    let harness = test_app();
    let mut gate = rule(31);
    gate.conditions = vec![condition_for_rule(1, 31, "stage_id", "eq", json!(2))];
    harness.store.seed_rule(gate).await;
    let mut qualified = person(TENANT, 1);
    qualified.stage_id = Some(2);
    harness.store.seed_person(qualified).await;
    harness.store.seed_person(person(TENANT, 2)).await;

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/31/test",
            json!({"person_id": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["matches"], true);

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/31/test",
            json!({"person_id": 2}),
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["matches"], false);

    let untouched = harness
        .store
        .get_person(TenantId(TENANT), 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.available_for_group_id, None);
    let counted = harness
        .store
        .get_rule(TenantId(TENANT), 31)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counted.leads_count, 0);
}

#[tokio::test]
async fn it_returns_not_found_when_dry_run_targets_are_missing() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/99/test",
            json!({"person_id": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    harness.store.seed_rule(rule(31)).await;
    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/31/test",
            json!({"person_id": 99}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn it_distributes_leads_into_the_rule_group_pool() {
    let harness = test_app();
    let mut weekend = rule(31);
    weekend.group_id = Some(10);
    harness.store.seed_rule(weekend).await;
    harness.store.seed_person(person(TENANT, 1)).await;
    harness.store.seed_person(person(TENANT, 2)).await;
    harness
        .store
        .seed_person(pooled_person(TENANT, 3, 99))
        .await;

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/31/distribute",
            json!({"person_ids": [1, 2, 3, 4]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["distributed"], 2);

    let pooled = harness
        .store
        .get_person(TenantId(TENANT), 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pooled.available_for_group_id, Some(10));
    assert!(pooled.claim_expires_at.is_some());
    let elsewhere = harness
        .store
        .get_person(TenantId(TENANT), 3)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(elsewhere.available_for_group_id, Some(99));
}

#[tokio::test]
async fn it_rejects_distribution_for_rules_without_a_group() {
    let harness = test_app();
    let mut direct = rule(31);
    direct.group_id = None;
    direct.assigned_agent_id = Some(7);
    harness.store.seed_rule(direct).await;

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/31/distribute",
            json!({"person_ids": [1]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert!(body["fields"]["rule"].is_string());
}

#[tokio::test]
async fn it_rejects_empty_distribution_requests() {
    let harness = test_app();
    harness.store.seed_rule(rule(31)).await;

    let response = harness
        .app
        .clone()
        .oneshot(post(
            "/api/v1/lead-flow-rules/31/distribute",
            json!({"person_ids": []}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
