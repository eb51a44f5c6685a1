//! Shared types used across vmsched crates.
//!
//! These are the values threaded through a placement call: the caller's
//! request context, the request spec describing what to place, the mutable
//! filter properties (including retry state), and the destinations the
//! scheduler hands back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A `(host, node)` pair. Serialized as a two-element JSON array.
pub type HostNode = (String, String);

/// Per-host resource ceilings attached by filters and carried to compute.
pub type Limits = BTreeMap<String, f64>;

// ── Context ───────────────────────────────────────────────────────

/// Identity of the caller on whose behalf a scheduler operation runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: String,
    pub project_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
            request_id: None,
            is_admin: false,
        }
    }

    /// Attach a request id for log correlation.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Copy of this context with admin rights, used for snapshot reads.
    pub fn elevated(&self) -> Self {
        Self {
            is_admin: true,
            ..self.clone()
        }
    }
}

// ── Instance states ───────────────────────────────────────────────

/// Externally visible lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Active,
    Building,
    Paused,
    Suspended,
    Stopped,
    Rescued,
    Resized,
    #[serde(rename = "soft-delete")]
    SoftDeleted,
    Deleted,
    Error,
    Shelved,
    ShelvedOffloaded,
}

impl VmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::Active => "active",
            VmState::Building => "building",
            VmState::Paused => "paused",
            VmState::Suspended => "suspended",
            VmState::Stopped => "stopped",
            VmState::Rescued => "rescued",
            VmState::Resized => "resized",
            VmState::SoftDeleted => "soft-delete",
            VmState::Deleted => "deleted",
            VmState::Error => "error",
            VmState::Shelved => "shelved",
            VmState::ShelvedOffloaded => "shelved_offloaded",
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient operation an instance is undergoing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Scheduling,
    Networking,
    Spawning,
    ResizePrep,
    ResizeMigrating,
    ResizeMigrated,
    ResizeFinish,
    Migrating,
    Rebuilding,
    PoweringOff,
    PoweringOn,
    Deleting,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Scheduling => "scheduling",
            TaskState::Networking => "networking",
            TaskState::Spawning => "spawning",
            TaskState::ResizePrep => "resize_prep",
            TaskState::ResizeMigrating => "resize_migrating",
            TaskState::ResizeMigrated => "resize_migrated",
            TaskState::ResizeFinish => "resize_finish",
            TaskState::Migrating => "migrating",
            TaskState::Rebuilding => "rebuilding",
            TaskState::PoweringOff => "powering-off",
            TaskState::PoweringOn => "powering-on",
            TaskState::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

/// Hypervisor-reported power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    #[default]
    NoState,
    Running,
    Paused,
    Shutdown,
    Crashed,
    Suspended,
}

// ── Request spec ──────────────────────────────────────────────────

/// Named resource-shape template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flavor {
    pub name: String,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub root_gb: u64,
    #[serde(default)]
    pub ephemeral_gb: u64,
}

/// Resource demand of a single instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceShape {
    pub vcpus: u32,
    pub memory_mb: u64,
    pub root_gb: u64,
    pub ephemeral_gb: u64,
}

impl ResourceShape {
    /// Local disk demand in GB (root + ephemeral).
    pub fn disk_gb(&self) -> u64 {
        self.root_gb + self.ephemeral_gb
    }
}

/// Properties shared by every instance in a request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceProperties {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub vcpus: u32,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub root_gb: u64,
    #[serde(default)]
    pub ephemeral_gb: u64,
    #[serde(default)]
    pub os_type: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
}

/// Image metadata as returned by the image service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageMeta {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub min_ram: Option<u64>,
    #[serde(default)]
    pub min_disk: Option<u64>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// The unit of placement work.
///
/// Built once per call and never shared between concurrent requests.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestSpec {
    pub instance_properties: InstanceProperties,
    #[serde(default)]
    pub instance_type: Option<Flavor>,
    #[serde(default)]
    pub instance_uuids: Vec<String>,
    #[serde(default)]
    pub num_instances: Option<u32>,
    #[serde(default)]
    pub image: Option<ImageMeta>,
}

impl RequestSpec {
    /// Number of instances to place: explicit count, else one per uuid, else one.
    pub fn instance_count(&self) -> u32 {
        match self.num_instances {
            Some(n) => n,
            None if !self.instance_uuids.is_empty() => self.instance_uuids.len() as u32,
            None => 1,
        }
    }

    /// Per-instance demand, preferring the flavor over the raw properties.
    pub fn resources(&self) -> ResourceShape {
        match &self.instance_type {
            Some(flavor) => ResourceShape {
                vcpus: flavor.vcpus,
                memory_mb: flavor.memory_mb,
                root_gb: flavor.root_gb,
                ephemeral_gb: flavor.ephemeral_gb,
            },
            None => ResourceShape {
                vcpus: self.instance_properties.vcpus,
                memory_mb: self.instance_properties.memory_mb,
                root_gb: self.instance_properties.root_gb,
                ephemeral_gb: self.instance_properties.ephemeral_gb,
            },
        }
    }

    /// Uuid of the instance this spec is about, if any.
    pub fn instance_uuid(&self) -> Option<&str> {
        self.instance_properties
            .uuid
            .as_deref()
            .or_else(|| self.instance_uuids.first().map(String::as_str))
    }
}

// ── Filter properties ─────────────────────────────────────────────

/// Hosts already tried within one logical multi-attempt operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RetryState {
    /// Append-only, in attempt order.
    #[serde(default)]
    pub hosts: Vec<HostNode>,
    #[serde(default)]
    pub num_attempts: u32,
    /// Error reported by the previous attempt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exc: Option<String>,
}

impl RetryState {
    pub fn new(num_attempts: u32) -> Self {
        Self {
            hosts: Vec::new(),
            num_attempts,
            exc: None,
        }
    }

    pub fn contains(&self, host: &str, node: &str) -> bool {
        self.hosts.iter().any(|(h, n)| h == host && n == node)
    }
}

/// Advisory state threaded through a placement attempt.
///
/// Owned by the call that created it; resize and migrate callers carry it
/// across retries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterProperties {
    #[serde(default)]
    pub retry: Option<RetryState>,
    #[serde(default)]
    pub scheduler_hints: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub ignore_hosts: Vec<String>,
    #[serde(default)]
    pub force_hosts: Vec<String>,
    #[serde(default)]
    pub force_nodes: Vec<String>,
    /// Limits of the last chosen destination.
    #[serde(default)]
    pub limits: Limits,
    /// Driver-specific side channel.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FilterProperties {
    pub fn with_retry(retry: RetryState) -> Self {
        Self {
            retry: Some(retry),
            ..Self::default()
        }
    }

    /// True when the caller pinned the request to specific hosts or nodes.
    pub fn is_forced(&self) -> bool {
        !self.force_hosts.is_empty() || !self.force_nodes.is_empty()
    }
}

/// A chosen placement target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub host: String,
    pub nodename: String,
    #[serde(default)]
    pub limits: Limits,
}

// ── Host resource report ──────────────────────────────────────────

/// Per-project resource consumption on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub vcpus: u32,
    pub memory_mb: u64,
    pub root_gb: u64,
    pub ephemeral_gb: u64,
}

/// Raw capacity and usage totals reported by a compute host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub vcpus: u32,
    pub vcpus_used: u32,
    pub memory_mb: u64,
    pub memory_mb_used: u64,
    pub local_gb: u64,
    pub local_gb_used: u64,
}

/// Response of `show_host_resources`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HostResources {
    pub usage: BTreeMap<String, UsageSummary>,
    pub resource: ResourceTotals,
}
