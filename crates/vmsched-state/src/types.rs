//! Domain types for the vmsched state store.
//!
//! These types represent the persisted view of instances, compute hosts,
//! services, and the audit records the scheduler writes on failure. All
//! types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use vmsched_core::{ImageMeta, PowerState, ResourceShape, TaskState, VmState};

/// Unique identifier for an instance.
pub type InstanceUuid = String;

/// Hostname of a compute service.
pub type HostId = String;

// ── Instance ──────────────────────────────────────────────────────

/// Persisted state of a single virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InstanceRecord {
    pub uuid: InstanceUuid,
    pub project_id: String,
    #[serde(default)]
    pub host: Option<HostId>,
    #[serde(default)]
    pub node: Option<String>,
    /// `None` until the instance has a confirmed lifecycle state.
    #[serde(default)]
    pub vm_state: Option<VmState>,
    #[serde(default)]
    pub task_state: Option<TaskState>,
    #[serde(default)]
    pub power_state: PowerState,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub root_gb: u64,
    #[serde(default)]
    pub ephemeral_gb: u64,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub os_type: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    /// Unix timestamp of the last placement decision.
    #[serde(default)]
    pub scheduled_at: Option<u64>,
    #[serde(default)]
    pub updated_at: u64,
}

impl InstanceRecord {
    pub fn resources(&self) -> ResourceShape {
        ResourceShape {
            vcpus: self.vcpus,
            memory_mb: self.memory_mb,
            root_gb: self.root_gb,
            ephemeral_gb: self.ephemeral_gb,
        }
    }
}

/// Partial update applied atomically to an [`InstanceRecord`].
///
/// Outer `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstanceUpdate {
    pub vm_state: Option<VmState>,
    pub task_state: Option<Option<TaskState>>,
    /// Precondition: the stored task state must equal this value.
    pub expected_task_state: Option<TaskState>,
    pub host: Option<Option<HostId>>,
    pub node: Option<Option<String>>,
    pub scheduled_at: Option<u64>,
}

impl InstanceUpdate {
    pub fn vm_state(state: VmState) -> Self {
        Self {
            vm_state: Some(state),
            ..Self::default()
        }
    }

    pub fn clear_task_state(mut self) -> Self {
        self.task_state = Some(None);
        self
    }

    pub fn expect_task_state(mut self, state: TaskState) -> Self {
        self.expected_task_state = Some(state);
        self
    }

    /// Record a placement decision on the instance.
    pub fn placed_on(host: &str, node: &str, at: u64) -> Self {
        Self {
            host: Some(Some(host.to_string())),
            node: Some(Some(node.to_string())),
            scheduled_at: Some(at),
            ..Self::default()
        }
    }

    /// Apply this update to `record` in place.
    pub fn apply(&self, record: &mut InstanceRecord, now: u64) {
        if let Some(state) = self.vm_state {
            record.vm_state = Some(state);
        }
        if let Some(task) = self.task_state {
            record.task_state = task;
        }
        if let Some(host) = &self.host {
            record.host = host.clone();
        }
        if let Some(node) = &self.node {
            record.node = node.clone();
        }
        if let Some(at) = self.scheduled_at {
            record.scheduled_at = Some(at);
        }
        record.updated_at = now;
    }
}

// ── Compute host ──────────────────────────────────────────────────

/// Capacity and usage reported by one hypervisor node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ComputeNodeRecord {
    pub host: HostId,
    pub hypervisor_hostname: String,
    pub vcpus: u32,
    pub vcpus_used: u32,
    pub memory_mb: u64,
    pub memory_mb_used: u64,
    pub local_gb: u64,
    pub local_gb_used: u64,
    #[serde(default)]
    pub hypervisor_type: String,
    #[serde(default)]
    pub hypervisor_version: u64,
    #[serde(default)]
    pub cpu_arch: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub updated_at: u64,
}

impl ComputeNodeRecord {
    pub fn free_ram_mb(&self) -> i64 {
        self.memory_mb as i64 - self.memory_mb_used as i64
    }

    pub fn table_key(&self) -> String {
        format!("{}:{}", self.host, self.hypervisor_hostname)
    }
}

/// A registered service (compute, scheduler, ...) and its liveness data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServiceRecord {
    pub host: HostId,
    pub binary: String,
    pub topic: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub disabled_reason: Option<String>,
    /// Unix timestamp of the last heartbeat.
    pub last_heartbeat: u64,
}

impl ServiceRecord {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.topic, self.host)
    }
}

// ── Audit ─────────────────────────────────────────────────────────

/// Diagnostic entry linking an instance to the error that affected it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceFault {
    pub instance_uuid: InstanceUuid,
    pub code: u16,
    /// Error kind name, e.g. `NoValidHost`.
    pub exception_type: String,
    pub message: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub host: Option<HostId>,
    pub created_at: u64,
}

// ── Images & quotas ───────────────────────────────────────────────

/// Image metadata persisted for lookup by id.
pub type ImageRecord = ImageMeta;

/// A pending quota reservation, committed or rolled back by its owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub id: String,
    pub project_id: String,
    pub resource: String,
    pub delta: i64,
    /// Unix timestamp after which the reservation is stale.
    pub expire_at: u64,
}

// ── Compute dispatch ──────────────────────────────────────────────

/// Kind of follow-on action dispatched to a compute host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeCommandKind {
    RunInstance,
    PrepResize,
    LiveMigration,
}

/// A command queued for a compute host to pick up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeCommand {
    pub host: HostId,
    #[serde(default)]
    pub node: Option<String>,
    pub kind: ComputeCommandKind,
    pub instance_uuid: InstanceUuid,
    pub payload: serde_json::Value,
    pub created_at: u64,
}
