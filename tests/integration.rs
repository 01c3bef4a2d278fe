//! End-to-end coverage of the HTTP surface: auth, routing, store-and-
//! forward, TTL expiry, and tamper detection, all driven in-process
//! against the real `axum::Router` with no network socket involved.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tower::ServiceExt;

use tacedge_gateway::audit::AuditLog;
use tacedge_gateway::auth::JwtSecret;
use tacedge_gateway::clock::FixedClock;
use tacedge_gateway::config::GatewayConfig;
use tacedge_gateway::crypto::CryptoEngine;
use tacedge_gateway::http::{self, AppState};
use tacedge_gateway::node_registry::StaticNodeRegistry;
use tacedge_gateway::pipeline::Pipeline;
use tacedge_gateway::queue::{DrainWorker, InMemoryBackend, PriorityQueue};

const SECRET: &str = "integration-test-secret";

fn token(role: &str, classification_level: &str) -> String {
    let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
    let claims = json!({
        "sub": "operator-1",
        "exp": exp,
        "role": role,
        "classification_level": classification_level,
    });
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

struct Harness {
    state: AppState,
    queue: Arc<PriorityQueue>,
    clock: Arc<FixedClock>,
}

fn build_harness() -> Harness {
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
    let audit = Arc::new(AuditLog::new(clock.clone()));
    let nodes = Arc::new(StaticNodeRegistry::default());
    let queue = Arc::new(PriorityQueue::new(Arc::new(InMemoryBackend::new()), clock.clone()).with_nodes(nodes.clone()));
    let crypto = Arc::new(CryptoEngine::new("integration-test-master-key"));
    let mut config = GatewayConfig::default();
    config.encryption_key = "integration-test-master-key".into();
    config.jwt_secret = SECRET.into();

    let pipeline = Arc::new(Pipeline::new(config, audit.clone(), queue.clone(), nodes, clock.clone()));

    // Built, not installed globally: each test gets its own handle so
    // concurrently-running tests don't race over the process-wide
    // recorder singleton.
    let (_recorder, metrics) = PrometheusBuilder::new().build().expect("build prometheus recorder");

    let state = AppState {
        pipeline,
        queue: queue.clone(),
        audit,
        crypto,
        clock: clock.clone(),
        jwt_secret: JwtSecret(SECRET.into()),
        metrics,
    };

    Harness { state, queue, clock }
}

async fn send_request(
    state: &AppState,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (axum::http::StatusCode, Value) {
    let router = http::router(state.clone());
    let mut builder = axum::http::Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(axum::http::header::AUTHORIZATION, format!("Bearer {bearer}"));
    }
    let request = if let Some(body) = body {
        builder
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    } else {
        builder.body(axum::body::Body::empty()).unwrap()
    };

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn send_to_connected_node_is_transmitted_directly() {
    let harness = build_harness();
    let op_token = token("operator", "SECRET");

    let (status, body) = send_request(
        &harness.state,
        "POST",
        "/api/v1/messages",
        Some(&op_token),
        Some(json!({
            "precedence": "FLASH",
            "classification": "SECRET",
            "sender": "NODE-ALPHA",
            "recipient": "NODE-BRAVO",
            "content": "proceed to phase line bravo",
            "ttl": 300,
        })),
    )
    .await;

    assert_eq!(status, axum::http::StatusCode::CREATED);
    assert_eq!(body["status"], "TRANSMITTED");
}

#[tokio::test]
async fn send_to_unreachable_node_is_stored_then_drained() {
    let harness = build_harness();
    let op_token = token("operator", "SECRET");

    let (status, body) = send_request(
        &harness.state,
        "POST",
        "/api/v1/messages",
        Some(&op_token),
        Some(json!({
            "precedence": "PRIORITY",
            "classification": "CONFIDENTIAL",
            "sender": "NODE-ALPHA",
            "recipient": "NODE-ZULU",
            "content": "resupply request",
            "ttl": 300,
        })),
    )
    .await;

    assert_eq!(status, axum::http::StatusCode::CREATED);
    assert_eq!(body["status"], "STORED");

    assert_eq!(harness.queue.depth(tacedge_gateway::types::Precedence::Priority).await.unwrap(), 1);
}

#[tokio::test]
async fn flush_queue_drains_every_precedence() {
    let harness = build_harness();
    let op_token = token("operator", "SECRET");
    let admin_token = token("admin", "TOP_SECRET");
    let service_token = token("service", "TOP_SECRET");

    // NODE-ZULU is unreachable, so sending to it lands straight in
    // STORED. NODE-BRAVO is reachable, but queuing an entry for it
    // directly (bypassing `send`, which would deliver on the spot)
    // exercises the flushed path against a genuinely drainable entry.
    send_request(
        &harness.state,
        "POST",
        "/api/v1/messages",
        Some(&op_token),
        Some(json!({
            "precedence": "ROUTINE",
            "classification": "UNCLASSIFIED",
            "sender": "NODE-ALPHA",
            "recipient": "NODE-ZULU",
            "content": "routine traffic",
            "ttl": 300,
        })),
    )
    .await;

    send_request(
        &harness.state,
        "POST",
        "/api/v1/queue/enqueue",
        Some(&service_token),
        Some(json!({
            "message_id": "queued-for-flush",
            "recipient": "NODE-BRAVO",
            "encrypted_content": "{}",
            "precedence": "FLASH",
            "ttl": 300,
        })),
    )
    .await;

    let (status, body) = send_request(&harness.state, "POST", "/api/v1/queue/flush", Some(&admin_token), None).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["flushed"], 1);
    assert_eq!(body["failed"], 1);

    let (_, status_body) = send_request(&harness.state, "GET", "/api/v1/queue/status", Some(&admin_token), None).await;
    assert_eq!(status_body["total"], 0);
}

#[tokio::test]
async fn expired_entries_are_swept_from_the_queue() {
    let harness = build_harness();
    let op_token = token("operator", "SECRET");

    send_request(
        &harness.state,
        "POST",
        "/api/v1/messages",
        Some(&op_token),
        Some(json!({
            "precedence": "ROUTINE",
            "classification": "UNCLASSIFIED",
            "sender": "NODE-ALPHA",
            "recipient": "NODE-ZULU",
            "content": "low priority status update",
            "ttl": 60,
        })),
    )
    .await;

    harness.clock.advance(chrono::Duration::seconds(120));

    let worker = DrainWorker::new(
        harness.queue.clone(),
        Arc::new(AuditLog::new(harness.clock.clone())),
        Arc::new(StaticNodeRegistry::default()),
        harness.clock.clone(),
        Duration::from_secs(2),
    );
    worker.sweep_once().await;

    assert_eq!(harness.queue.depth(tacedge_gateway::types::Precedence::Routine).await.unwrap(), 0);
    assert_eq!(harness.queue.expired_count(tacedge_gateway::types::Precedence::Routine), 1);
}

#[tokio::test]
async fn tampered_ciphertext_is_rejected_as_auth_failed() {
    let harness = build_harness();
    let service_token = token("service", "TOP_SECRET");

    let (_, encrypted) = send_request(
        &harness.state,
        "POST",
        "/api/v1/encrypt",
        Some(&service_token),
        Some(json!({ "plaintext": "eyes only" })),
    )
    .await;

    let mut tampered = encrypted.clone();
    let mut ciphertext = tampered["ciphertext"].as_str().unwrap().to_string();
    ciphertext.push('A');
    tampered["ciphertext"] = json!(ciphertext);

    let (status, _) = send_request(&harness.state, "POST", "/api/v1/decrypt", Some(&service_token), Some(tampered)).await;
    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rbac_denies_send_without_permission_and_leaves_no_side_effects() {
    let harness = build_harness();
    // A "service" role has no "message:send" permission of note here —
    // use an explicit empty-permissions token to simulate a principal
    // that legitimately has none.
    let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
    let bare_token = encode(
        &Header::new(Algorithm::HS256),
        &json!({ "sub": "intruder", "exp": exp, "permissions": [] }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    let (status, _) = send_request(
        &harness.state,
        "POST",
        "/api/v1/messages",
        Some(&bare_token),
        Some(json!({
            "precedence": "FLASH",
            "classification": "UNCLASSIFIED",
            "sender": "NODE-ALPHA",
            "recipient": "NODE-BRAVO",
            "content": "should never land",
            "ttl": 300,
        })),
    )
    .await;

    assert_eq!(status, axum::http::StatusCode::FORBIDDEN);
    assert_eq!(harness.queue.total_depth().await.unwrap(), 0);
}

#[tokio::test]
async fn classification_ceiling_blocks_insufficient_clearance() {
    let harness = build_harness();
    let op_token = token("operator", "CONFIDENTIAL");

    let (status, _) = send_request(
        &harness.state,
        "POST",
        "/api/v1/messages",
        Some(&op_token),
        Some(json!({
            "precedence": "FLASH",
            "classification": "TOP_SECRET",
            "sender": "NODE-ALPHA",
            "recipient": "NODE-BRAVO",
            "content": "above this principal's clearance",
            "ttl": 300,
        })),
    )
    .await;

    assert_eq!(status, axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_bearer_token_is_unauthorized() {
    let harness = build_harness();
    let (status, _) = send_request(&harness.state, "GET", "/api/v1/nodes", None, None).await;
    assert_eq!(status, axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ack_is_idempotent_over_http() {
    let harness = build_harness();
    let op_token = token("operator", "SECRET");

    let (_, sent) = send_request(
        &harness.state,
        "POST",
        "/api/v1/messages",
        Some(&op_token),
        Some(json!({
            "precedence": "FLASH",
            "classification": "SECRET",
            "sender": "NODE-ALPHA",
            "recipient": "NODE-BRAVO",
            "content": "ack me",
            "ttl": 300,
        })),
    )
    .await;
    let message_id = sent["message_id"].as_str().unwrap();

    let (status1, first) = send_request(
        &harness.state,
        "POST",
        &format!("/api/v1/messages/{message_id}/ack"),
        Some(&op_token),
        None,
    )
    .await;
    let (status2, second) = send_request(
        &harness.state,
        "POST",
        &format!("/api/v1/messages/{message_id}/ack"),
        Some(&op_token),
        None,
    )
    .await;

    assert_eq!(status1, axum::http::StatusCode::OK);
    assert_eq!(status2, axum::http::StatusCode::OK);
    assert_eq!(first["acknowledged_at"], second["acknowledged_at"]);
    assert_eq!(first["acknowledged_by"], second["acknowledged_by"]);
}

#[tokio::test]
async fn internal_enqueue_rejects_duplicate_message_id() {
    let harness = build_harness();
    let service_token = token("service", "SECRET");

    let body = json!({
        "message_id": "msg-fixed-id",
        "recipient": "NODE-ZULU",
        "encrypted_content": "ct",
        "precedence": "IMMEDIATE",
        "ttl": 300,
    });

    let (status1, _) = send_request(&harness.state, "POST", "/api/v1/queue/enqueue", Some(&service_token), Some(body.clone())).await;
    let (status2, body2) = send_request(&harness.state, "POST", "/api/v1/queue/enqueue", Some(&service_token), Some(body)).await;

    assert_eq!(status1, axum::http::StatusCode::CREATED);
    assert_eq!(status2, axum::http::StatusCode::CONFLICT);
    assert_eq!(body2["error"]["code"], "ALREADY_QUEUED");
}

#[tokio::test]
async fn internal_endpoints_require_internal_call_permission() {
    let harness = build_harness();
    let op_token = token("operator", "SECRET");

    let (status, _) = send_request(
        &harness.state,
        "POST",
        "/api/v1/encrypt",
        Some(&op_token),
        Some(json!({ "plaintext": "x" })),
    )
    .await;

    assert_eq!(status, axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn submitted_audit_event_is_queryable() {
    let harness = build_harness();
    let service_token = token("service", "SECRET");
    let supervisor_token = token("supervisor", "SECRET");

    let (status, _) = send_request(
        &harness.state,
        "POST",
        "/api/v1/audit/events",
        Some(&service_token),
        Some(json!({
            "event_type": "NODE_REGISTERED",
            "control_family": "AC",
            "actor": { "node_id": "NODE-ALPHA", "role": "service" },
            "action": { "operation": "REGISTER_NODE", "resource": "node:NODE-ALPHA", "outcome": "SUCCESS" },
        })),
    )
    .await;
    assert_eq!(status, axum::http::StatusCode::CREATED);

    let (_, events) = send_request(
        &harness.state,
        "GET",
        "/api/v1/audit/events?event_type=NODE_REGISTERED",
        Some(&supervisor_token),
        None,
    )
    .await;
    assert_eq!(events["total"], 1);
}

#[tokio::test]
async fn health_and_ready_require_no_auth() {
    let harness = build_harness();
    let (status, _) = send_request(&harness.state, "GET", "/health", None, None).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    let (status, _) = send_request(&harness.state, "GET", "/ready", None, None).await;
    assert_eq!(status, axum::http::StatusCode::OK);
}
