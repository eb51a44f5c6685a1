//! Interfaces to the systems the scheduler coordinates with.
//!
//! Every call here crosses an I/O boundary and may block. Implementations
//! must be `Send + Sync`; the manager shares them across concurrent calls
//! and holds no locks of its own while calling them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vmsched_core::{FilterProperties, Flavor, ImageMeta, Limits, RequestContext, RequestSpec};
use vmsched_state::{
    ComputeNodeRecord, InstanceFault, InstanceRecord, InstanceUpdate, ServiceRecord, StateError,
};

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The collaborator rejected the request as invalid.
    #[error("invalid: {0}")]
    Invalid(String),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("{0}")]
    Failed(String),
}

impl From<StateError> for CollaboratorError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => Self::NotFound(what),
            err @ StateError::UnexpectedTaskState { .. } => Self::Conflict(err.to_string()),
            other => Self::State(other),
        }
    }
}

pub type CollabResult<T> = Result<T, CollaboratorError>;

// ── Request payloads ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestedNetwork {
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub fixed_ip: Option<String>,
    #[serde(default)]
    pub port_id: Option<String>,
}

/// Launch arguments passed through scheduling untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInstanceArgs {
    #[serde(default)]
    pub admin_password: Option<String>,
    /// `(path, contents)` pairs written into the guest.
    #[serde(default)]
    pub injected_files: Vec<(String, String)>,
    #[serde(default)]
    pub requested_networks: Vec<RequestedNetwork>,
    #[serde(default)]
    pub is_first_time: bool,
    #[serde(default)]
    pub legacy_bdm_in_spec: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInstanceRequest {
    pub instance: InstanceRecord,
    pub node: String,
    pub request_spec: RequestSpec,
    pub filter_properties: FilterProperties,
    pub args: RunInstanceArgs,
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepResizeRequest {
    pub instance: InstanceRecord,
    pub instance_type: Flavor,
    pub image: Option<ImageMeta>,
    pub node: String,
    pub reservations: Vec<String>,
    pub request_spec: RequestSpec,
    pub filter_properties: FilterProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMigrationRequest {
    pub instance: InstanceRecord,
    pub source: String,
    pub destination: String,
    pub block_migration: bool,
    /// Result of the destination pre-check.
    pub migrate_data: serde_json::Value,
}

// ── Traits ────────────────────────────────────────────────────────

/// Instance persistence.
pub trait InstanceStore: Send + Sync {
    /// Apply `update` atomically and return the record before and after.
    fn update_instance_and_get_original(
        &self,
        ctx: &RequestContext,
        uuid: &str,
        update: &InstanceUpdate,
    ) -> CollabResult<(InstanceRecord, InstanceRecord)>;

    fn create_instance_fault(&self, ctx: &RequestContext, fault: &InstanceFault) -> CollabResult<()>;

    fn instances_by_host(&self, ctx: &RequestContext, host: &str) -> CollabResult<Vec<InstanceRecord>>;
}

/// Source of the host snapshot.
pub trait HostCatalog: Send + Sync {
    /// Services registered under `topic`, disabled ones included.
    fn services_by_topic(&self, ctx: &RequestContext, topic: &str) -> CollabResult<Vec<ServiceRecord>>;

    /// The compute service record for `host`, or `NotFound`.
    fn compute_service(&self, ctx: &RequestContext, host: &str) -> CollabResult<ServiceRecord>;

    fn compute_nodes(&self, ctx: &RequestContext) -> CollabResult<Vec<ComputeNodeRecord>>;

    /// The first hypervisor node reported by `host`, or `NotFound`.
    fn compute_node(&self, ctx: &RequestContext, host: &str) -> CollabResult<ComputeNodeRecord>;
}

/// Liveness oracle.
pub trait ServiceGroup: Send + Sync {
    fn service_is_up(&self, service: &ServiceRecord) -> bool;
}

/// Follow-on actions dispatched to a compute host.
pub trait ComputeRpc: Send + Sync {
    fn run_instance(&self, ctx: &RequestContext, host: &str, req: &RunInstanceRequest) -> CollabResult<()>;

    fn prep_resize(&self, ctx: &RequestContext, host: &str, req: &PrepResizeRequest) -> CollabResult<()>;

    /// Ask `destination` whether it can take the instance. The returned
    /// value is handed back through [`ComputeRpc::live_migration`].
    fn check_can_live_migrate_destination(
        &self,
        ctx: &RequestContext,
        instance: &InstanceRecord,
        destination: &str,
        block_migration: bool,
        disk_over_commit: bool,
    ) -> CollabResult<serde_json::Value>;

    fn live_migration(&self, ctx: &RequestContext, req: &LiveMigrationRequest) -> CollabResult<()>;
}

pub trait ImageService: Send + Sync {
    /// Image metadata, or `NotFound`.
    fn show(&self, ctx: &RequestContext, image_id: &str) -> CollabResult<ImageMeta>;
}

/// Operational event channel. Events are fire-and-forget.
pub trait Notifier: Send + Sync {
    fn info(&self, ctx: &RequestContext, event_type: &str, payload: serde_json::Value) -> CollabResult<()>;

    fn error(&self, ctx: &RequestContext, event_type: &str, payload: serde_json::Value) -> CollabResult<()>;
}

pub trait QuotaEngine: Send + Sync {
    fn rollback(&self, ctx: &RequestContext, reservations: &[String]) -> CollabResult<()>;

    /// Drop stale reservations. Returns how many were removed.
    fn expire(&self, ctx: &RequestContext) -> CollabResult<u32>;
}

/// Handles to every collaborator, shared by the manager, drivers and tasks.
#[derive(Clone)]
pub struct Collaborators {
    pub instances: Arc<dyn InstanceStore>,
    pub hosts: Arc<dyn HostCatalog>,
    pub servicegroup: Arc<dyn ServiceGroup>,
    pub compute: Arc<dyn ComputeRpc>,
    pub images: Arc<dyn ImageService>,
    pub notifier: Arc<dyn Notifier>,
    pub quotas: Arc<dyn QuotaEngine>,
}
