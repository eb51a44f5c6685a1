//! Scheduler RPC handlers.
//!
//! Manager calls block on the store and compute queue, so each one runs on
//! the blocking pool.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vmsched_core::{Destination, FilterProperties, Flavor, HostResources, ImageMeta, RequestSpec};
use vmsched_scheduler::RunInstanceArgs;
use vmsched_state::{InstanceRecord, StateStore};

use crate::ApiState;
use crate::response::{ApiError, ApiResponse, Ctx, run_blocking, run_scheduler};

fn find_instance(store: &StateStore, uuid: &str) -> Result<InstanceRecord, ApiError> {
    store
        .get_instance(uuid)?
        .ok_or_else(|| ApiError::not_found(format!("instance {uuid} not found")))
}

/// Filter properties as they stand after the call.
#[derive(Debug, Serialize, Deserialize)]
pub struct FilterPropertiesResponse {
    pub filter_properties: FilterProperties,
}

// ── Placement ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RunInstanceBody {
    pub request_spec: RequestSpec,
    #[serde(default)]
    pub filter_properties: FilterProperties,
    #[serde(flatten)]
    pub args: RunInstanceArgs,
}

/// POST /v1/scheduler/run_instance
pub async fn run_instance(
    State(state): State<ApiState>,
    Ctx(ctx): Ctx,
    Json(body): Json<RunInstanceBody>,
) -> Result<impl IntoResponse, ApiError> {
    let manager = state.manager.clone();
    let filter_properties = run_scheduler(move || {
        let mut props = body.filter_properties;
        manager.run_instance(&ctx, &body.request_spec, &body.args, &mut props)?;
        Ok(props)
    })
    .await?;
    Ok(ApiResponse::ok(FilterPropertiesResponse { filter_properties }))
}

#[derive(Debug, Deserialize)]
pub struct SelectBody {
    pub request_spec: RequestSpec,
    #[serde(default)]
    pub filter_properties: FilterProperties,
}

/// POST /v1/scheduler/select_destinations
pub async fn select_destinations(
    State(state): State<ApiState>,
    Ctx(ctx): Ctx,
    Json(body): Json<SelectBody>,
) -> Result<Json<ApiResponse<Vec<Destination>>>, ApiError> {
    let manager = state.manager.clone();
    let dests = run_scheduler(move || {
        manager.select_destinations(&ctx, &body.request_spec, &body.filter_properties)
    })
    .await?;
    Ok(ApiResponse::ok(dests))
}

/// POST /v1/scheduler/select_hosts
pub async fn select_hosts(
    State(state): State<ApiState>,
    Ctx(ctx): Ctx,
    Json(body): Json<SelectBody>,
) -> Result<Json<ApiResponse<Vec<Destination>>>, ApiError> {
    let manager = state.manager.clone();
    let dests = run_blocking(move || {
        manager.select_hosts(&ctx, &body.request_spec, &body.filter_properties)
    })
    .await?;
    Ok(ApiResponse::ok(dests))
}

#[derive(Debug, Deserialize)]
pub struct PrepResizeBody {
    pub instance_uuid: String,
    pub instance_type: Flavor,
    #[serde(default)]
    pub image: Option<ImageMeta>,
    pub request_spec: RequestSpec,
    #[serde(default)]
    pub filter_properties: FilterProperties,
    #[serde(default)]
    pub reservations: Vec<String>,
}

/// POST /v1/scheduler/prep_resize
pub async fn prep_resize(
    State(state): State<ApiState>,
    Ctx(ctx): Ctx,
    Json(body): Json<PrepResizeBody>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let manager = state.manager.clone();
    let filter_properties = run_blocking(move || -> Result<_, ApiError> {
        let instance = find_instance(&store, &body.instance_uuid)?;
        let mut props = body.filter_properties;
        manager.prep_resize(
            &ctx,
            body.image,
            &body.request_spec,
            &mut props,
            &instance,
            &body.instance_type,
            &body.reservations,
        )?;
        Ok(props)
    })
    .await?;
    Ok(ApiResponse::ok(FilterPropertiesResponse { filter_properties }))
}

#[derive(Debug, Deserialize)]
pub struct LiveMigrationBody {
    pub instance_uuid: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub block_migration: bool,
    #[serde(default)]
    pub disk_over_commit: bool,
}

/// POST /v1/scheduler/live_migration
pub async fn live_migration(
    State(state): State<ApiState>,
    Ctx(ctx): Ctx,
    Json(body): Json<LiveMigrationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let manager = state.manager.clone();
    let destination = run_blocking(move || -> Result<_, ApiError> {
        let instance = find_instance(&store, &body.instance_uuid)?;
        Ok(manager.live_migration(
            &ctx,
            &instance,
            body.destination.as_deref(),
            body.block_migration,
            body.disk_over_commit,
        )?)
    })
    .await?;
    Ok(ApiResponse::ok(serde_json::json!({ "destination": destination })))
}

// ── Reports ────────────────────────────────────────────────────

/// GET /v1/scheduler/hosts/{host}/resources
pub async fn show_host_resources(
    State(state): State<ApiState>,
    Ctx(ctx): Ctx,
    Path(host): Path<String>,
) -> Result<Json<ApiResponse<HostResources>>, ApiError> {
    let manager = state.manager.clone();
    let report = run_scheduler(move || manager.show_host_resources(&ctx, &host)).await?;
    Ok(ApiResponse::ok(report))
}

// ── Legacy ─────────────────────────────────────────────────────

/// POST /v3/scheduler/{method}
///
/// Body is the positional argument list as a JSON array.
pub async fn legacy_call(
    State(state): State<ApiState>,
    Ctx(ctx): Ctx,
    Path(method): Path<String>,
    Json(args): Json<Vec<Value>>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let legacy = state.legacy.clone();
    let result = run_scheduler(move || legacy.call(&ctx, &method, &args)).await?;
    Ok(ApiResponse::ok(result))
}
