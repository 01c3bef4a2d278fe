//! HTTP surface: axum router wiring every endpoint onto the
//! gateway/queue/audit/crypto collaborators held in [`AppState`].

use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audit::{AuditAction, AuditActor, AuditLog, AuditQuery, ControlFamily};
use crate::auth::{require_classification, require_permission, Claims, JwtSecret};
use crate::clock::Clock;
use crate::crypto::{CryptoEngine, EncryptedPayload};
use crate::error::ApiError;
use crate::ids::MessageId;
use crate::pipeline::{Pipeline, SendRequest};
use crate::queue::PriorityQueue;
use crate::types::{Classification, MessageStatus, Precedence};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub queue: Arc<PriorityQueue>,
    pub audit: Arc<AuditLog>,
    pub crypto: Arc<CryptoEngine>,
    pub clock: Arc<dyn Clock>,
    pub jwt_secret: JwtSecret,
    pub metrics: PrometheusHandle,
}

impl FromRef<AppState> for JwtSecret {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_secret.clone()
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/messages", post(send_message))
        .route("/api/v1/messages/{id}", get(get_message_status))
        .route("/api/v1/messages/{id}/content", get(get_message_content))
        .route("/api/v1/messages/{id}/ack", post(ack_message))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/queue/status", get(queue_status))
        .route("/api/v1/queue/flush", post(flush_queue))
        .route("/api/v1/audit/events", get(query_audit_events).post(submit_audit_event))
        .route("/api/v1/audit/export", get(export_audit_events))
        .route("/api/v1/audit/stats", get(audit_stats))
        .route("/api/v1/queue/enqueue", post(enqueue_internal))
        .route("/api/v1/encrypt", post(encrypt_internal))
        .route("/api/v1/decrypt", post(decrypt_internal));

    let public = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct SendMessageRequest {
    precedence: Precedence,
    classification: Classification,
    sender: String,
    recipient: String,
    content: String,
    ttl: i64,
}

#[derive(Serialize)]
struct SendMessageResponse {
    message_id: String,
    status: MessageStatus,
    precedence: Precedence,
    created_at: chrono::DateTime<chrono::Utc>,
    estimated_delivery: Option<chrono::DateTime<chrono::Utc>>,
}

async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "message:send")?;
    require_classification(&claims, body.classification)?;

    let now = state.clock.now();
    let result = state
        .pipeline
        .send(SendRequest {
            sender: body.sender,
            recipient: body.recipient,
            precedence: body.precedence,
            classification: body.classification,
            content: body.content,
            ttl_seconds: body.ttl,
            subject: claims.subject,
            role: claims.role.to_string(),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            message_id: result.message_id.to_string(),
            status: result.status,
            precedence: body.precedence,
            created_at: now,
            estimated_delivery: result.estimated_delivery,
        }),
    ))
}

async fn get_message_status(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "message:read")?;
    let record = state.pipeline.get_status(&MessageId::from(id))?;
    Ok(Json(json!({
        "message_id": record.message_id.to_string(),
        "status": record.status,
        "precedence": record.precedence,
        "classification": record.classification,
        "created_at": record.created_at,
        "estimated_delivery": record.estimated_delivery,
        "error": record.error,
    })))
}

async fn get_message_content(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "message:read")?;
    let content = state.pipeline.get_content(&MessageId::from(id))?;
    Ok(Json(json!({
        "id": content.id,
        "body": content.body,
        "precedence": content.precedence,
        "classification": content.classification,
        "sender": content.sender,
        "recipient": content.recipient,
    })))
}

async fn ack_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "message:read")?;
    let result = state.pipeline.ack(&MessageId::from(id), &claims.subject).await?;
    Ok(Json(json!({
        "acknowledged": result.acknowledged,
        "acknowledged_at": result.acknowledged_at,
        "acknowledged_by": result.acknowledged_by,
    })))
}

async fn list_nodes(State(state): State<AppState>, claims: Claims) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "node:status")?;
    Ok(Json(json!({ "nodes": state.pipeline.list_nodes() })))
}

async fn queue_status(State(state): State<AppState>, claims: Claims) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "node:status")?;
    let mut depths = serde_json::Map::new();
    for precedence in Precedence::all() {
        let depth = state.queue.depth(precedence).await.map_err(ApiError::from)?;
        depths.insert(precedence.to_string(), json!(depth));
    }
    Ok(Json(json!({
        "depths": depths,
        "total": state.queue.total_depth().await.map_err(ApiError::from)?,
    })))
}

async fn flush_queue(State(state): State<AppState>, claims: Claims) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "node:manage")?;
    let report = state.queue.flush_all().await.map_err(ApiError::from)?;
    Ok(Json(json!({
        "flushed": report.flushed,
        "failed": report.failed,
        "status": "COMPLETE",
    })))
}

#[derive(Deserialize)]
struct AuditEventsQuery {
    event_type: Option<String>,
    control_family: Option<ControlFamily>,
    actor_node: Option<String>,
    limit: Option<usize>,
    page: Option<usize>,
}

async fn query_audit_events(
    State(state): State<AppState>,
    claims: Claims,
    Query(params): Query<AuditEventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "audit:read")?;
    let mut query = AuditQuery::new();
    query.event_type = params.event_type;
    query.control_family = params.control_family;
    query.actor_node = params.actor_node;
    query.limit = params.limit.unwrap_or(100);
    let events = state.audit.query(&query);
    Ok(Json(json!({
        "events": events,
        "total": events.len(),
        "page": params.page.unwrap_or(1),
        "limit": query.limit,
    })))
}

async fn export_audit_events(State(state): State<AppState>, claims: Claims) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "audit:export")?;
    let body = state.audit.export();
    Ok(([(axum::http::header::CONTENT_TYPE, "application/json")], body))
}

async fn audit_stats(State(state): State<AppState>, claims: Claims) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "audit:read")?;
    Ok(Json(state.audit.stats()))
}

#[derive(Deserialize)]
struct EncryptRequest {
    plaintext: String,
    #[allow(dead_code)]
    classification: Option<Classification>,
}

pub async fn encrypt_internal(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<EncryptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "internal:call")?;
    let payload = state.crypto.encrypt(&body.plaintext).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(payload))
}

#[derive(Deserialize)]
struct DecryptRequest {
    ciphertext: String,
    nonce: String,
    tag: String,
}

#[derive(Serialize)]
struct DecryptResponse {
    plaintext: Option<String>,
    verified: bool,
}

pub async fn decrypt_internal(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<DecryptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "internal:call")?;
    let payload = EncryptedPayload {
        ciphertext: body.ciphertext,
        nonce: body.nonce,
        tag: body.tag,
    };
    match state.crypto.decrypt(&payload) {
        Ok(plaintext) => Ok(Json(DecryptResponse {
            plaintext: Some(plaintext),
            verified: true,
        })),
        Err(_) => Err(ApiError::AuthFailed),
    }
}

#[derive(Deserialize)]
struct EnqueueRequest {
    message_id: String,
    recipient: String,
    encrypted_content: String,
    precedence: Precedence,
    ttl: i64,
}

async fn enqueue_internal(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "internal:call")?;
    let result = state
        .queue
        .enqueue(body.message_id, body.recipient, body.encrypted_content, body.precedence, body.ttl)
        .await
        .map_err(ApiError::from)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "queue_position": result.queue_position, "expires_at": result.expires_at })),
    ))
}

#[derive(Deserialize)]
struct SubmitAuditEventRequest {
    event_type: String,
    control_family: ControlFamily,
    actor: AuditActor,
    action: AuditAction,
    #[serde(default)]
    context: std::collections::BTreeMap<String, serde_json::Value>,
}

async fn submit_audit_event(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SubmitAuditEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_permission(&claims, "internal:call")?;
    let event = state
        .audit
        .log(body.event_type, body.control_family, body.actor, body.action, body.context)
        .await;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn ready() -> impl IntoResponse {
    Json(json!({ "status": "ready" }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

