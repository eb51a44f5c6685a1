//! Snapshot ingest and audit handlers.
//!
//! Compute agents publish their nodes, services and instances here; the
//! scheduler reads the same tables when it builds a host snapshot.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::debug;
use vmsched_core::ImageMeta;
use vmsched_state::store::epoch_secs;
use vmsched_state::{ComputeNodeRecord, InstanceRecord, ServiceRecord};

use crate::ApiState;
use crate::response::{ApiError, ApiResponse};

// ── Compute nodes ──────────────────────────────────────────────

/// GET /v1/compute-nodes
pub async fn list_compute_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_compute_nodes() {
        Ok(nodes) => ApiResponse::ok(nodes).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// PUT /v1/compute-nodes
pub async fn put_compute_node(
    State(state): State<ApiState>,
    Json(node): Json<ComputeNodeRecord>,
) -> impl IntoResponse {
    debug!(host = %node.host, node = %node.hypervisor_hostname, "compute node reported");
    match state.store.put_compute_node(&node) {
        Ok(()) => ApiResponse::ok(node).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

// ── Services ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub topic: Option<String>,
}

/// GET /v1/services?topic=compute
///
/// Defaults to the configured compute topic.
pub async fn list_services(
    State(state): State<ApiState>,
    Query(query): Query<ServiceQuery>,
) -> impl IntoResponse {
    let topic = query
        .topic
        .unwrap_or_else(|| state.manager.config().compute_topic.clone());
    match state.store.list_services_by_topic(&topic) {
        Ok(services) => ApiResponse::ok(services).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// PUT /v1/services
pub async fn put_service(
    State(state): State<ApiState>,
    Json(service): Json<ServiceRecord>,
) -> impl IntoResponse {
    match state.store.put_service(&service) {
        Ok(()) => ApiResponse::ok(service).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /v1/services/{topic}/{host}/heartbeat
pub async fn heartbeat(
    State(state): State<ApiState>,
    Path((topic, host)): Path<(String, String)>,
) -> impl IntoResponse {
    let now = epoch_secs();
    match state.store.touch_service(&topic, &host, now) {
        Ok(true) => ApiResponse::ok(serde_json::json!({ "last_heartbeat": now })).into_response(),
        Ok(false) => ApiError::not_found(format!("service {topic}/{host} not found")).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

// ── Instances ──────────────────────────────────────────────────

/// GET /v1/instances
pub async fn list_instances(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_instances() {
        Ok(instances) => ApiResponse::ok(instances).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// PUT /v1/instances
pub async fn put_instance(
    State(state): State<ApiState>,
    Json(instance): Json<InstanceRecord>,
) -> impl IntoResponse {
    match state.store.put_instance(&instance) {
        Ok(()) => ApiResponse::ok(instance).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /v1/instances/{uuid}
pub async fn get_instance(
    State(state): State<ApiState>,
    Path(uuid): Path<String>,
) -> impl IntoResponse {
    match state.store.get_instance(&uuid) {
        Ok(Some(instance)) => ApiResponse::ok(instance).into_response(),
        Ok(None) => ApiError::not_found("instance not found").into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /v1/instances/{uuid}/faults
pub async fn list_faults(
    State(state): State<ApiState>,
    Path(uuid): Path<String>,
) -> impl IntoResponse {
    match state.store.list_instance_faults(&uuid) {
        Ok(faults) => ApiResponse::ok(faults).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

// ── Images ─────────────────────────────────────────────────────

/// PUT /v1/images
pub async fn put_image(
    State(state): State<ApiState>,
    Json(image): Json<ImageMeta>,
) -> impl IntoResponse {
    match state.store.put_image(&image) {
        Ok(()) => ApiResponse::ok(image).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /v1/images/{id}
pub async fn get_image(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_image(&id) {
        Ok(Some(image)) => ApiResponse::ok(image).into_response(),
        Ok(None) => ApiError::not_found("image not found").into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

// ── Compute commands ───────────────────────────────────────────

/// GET /v1/compute/{host}/commands
pub async fn list_commands(
    State(state): State<ApiState>,
    Path(host): Path<String>,
) -> impl IntoResponse {
    match state.store.list_commands_for_host(&host) {
        Ok(commands) => ApiResponse::ok(commands).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
