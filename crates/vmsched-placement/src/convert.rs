//! Type conversions between state store types and placement types.
//!
//! Bridges `vmsched_state::{ComputeNodeRecord, ServiceRecord}` to the
//! pipeline's [`HostState`].

use std::collections::{BTreeSet, HashMap};

use vmsched_state::{ComputeNodeRecord, ServiceRecord};

use crate::host_state::{Capacity, HostState};

/// Convert a [`ComputeNodeRecord`] to a [`HostState`].
///
/// `service_up` is passed externally because liveness is decided by the
/// service group, not the state store.
pub fn host_state_from_record(
    node: &ComputeNodeRecord,
    service: Option<&ServiceRecord>,
    service_up: bool,
) -> HostState {
    HostState {
        host: node.host.clone(),
        nodename: node.hypervisor_hostname.clone(),
        total: Capacity {
            vcpus: node.vcpus,
            memory_mb: node.memory_mb,
            disk_gb: node.local_gb,
        },
        used: Capacity {
            vcpus: node.vcpus_used,
            memory_mb: node.memory_mb_used,
            disk_gb: node.local_gb_used,
        },
        hypervisor_type: node.hypervisor_type.clone(),
        hypervisor_version: node.hypervisor_version,
        cpu_arch: node.cpu_arch.clone(),
        availability_zone: node.availability_zone.clone(),
        service_up,
        service_disabled: service.is_some_and(|s| s.disabled),
        num_instances: 0,
        limits: Default::default(),
    }
}

/// Convert a whole snapshot, keeping the order of `nodes`.
///
/// Nodes whose host has no registered service are treated as down.
pub fn host_states_from_records(
    nodes: &[ComputeNodeRecord],
    services: &[ServiceRecord],
    up_hosts: &BTreeSet<String>,
) -> Vec<HostState> {
    let by_host: HashMap<&str, &ServiceRecord> =
        services.iter().map(|s| (s.host.as_str(), s)).collect();
    nodes
        .iter()
        .map(|node| {
            let service = by_host.get(node.host.as_str()).copied();
            let up = service.is_some() && up_hosts.contains(&node.host);
            host_state_from_record(node, service, up)
        })
        .collect()
}
