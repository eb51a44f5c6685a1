//! Working copy of a compute host used during one placement call.

use vmsched_core::{Limits, ResourceShape};

/// A vcpu / memory / disk triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Capacity {
    pub vcpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

/// Snapshot of one `(host, node)` pair.
///
/// Built fresh for every driver invocation. Filters annotate `limits` on
/// the copy they receive; the pipeline consumes resources on its own copy
/// between picks. Neither touches the source of truth.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HostState {
    pub host: String,
    pub nodename: String,
    pub total: Capacity,
    pub used: Capacity,
    pub hypervisor_type: String,
    pub hypervisor_version: u64,
    pub cpu_arch: Option<String>,
    pub availability_zone: Option<String>,
    pub service_up: bool,
    pub service_disabled: bool,
    /// Instances placed on this copy during the current call.
    pub num_instances: u32,
    pub limits: Limits,
}

impl HostState {
    pub fn new(host: impl Into<String>, nodename: impl Into<String>, total: Capacity) -> Self {
        Self {
            host: host.into(),
            nodename: nodename.into(),
            total,
            used: Capacity::default(),
            hypervisor_type: String::new(),
            hypervisor_version: 0,
            cpu_arch: None,
            availability_zone: None,
            service_up: true,
            service_disabled: false,
            num_instances: 0,
            limits: Limits::new(),
        }
    }

    /// Free RAM; negative when the host is already overcommitted.
    pub fn free_ram_mb(&self) -> i64 {
        self.total.memory_mb as i64 - self.used.memory_mb as i64
    }

    pub fn free_vcpus(&self) -> i64 {
        i64::from(self.total.vcpus) - i64::from(self.used.vcpus)
    }

    pub fn free_disk_gb(&self) -> i64 {
        self.total.disk_gb as i64 - self.used.disk_gb as i64
    }

    /// Charge one instance of `shape` against this copy.
    pub fn consume(&mut self, shape: &ResourceShape) {
        self.used.vcpus = self.used.vcpus.saturating_add(shape.vcpus);
        self.used.memory_mb = self.used.memory_mb.saturating_add(shape.memory_mb);
        self.used.disk_gb = self.used.disk_gb.saturating_add(shape.disk_gb());
        self.num_instances += 1;
    }

    pub fn matches(&self, host: &str, node: &str) -> bool {
        self.host == host && self.nodename == node
    }
}
