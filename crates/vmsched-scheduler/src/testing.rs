//! Test fixtures: an in-memory store wired to recording collaborators.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use vmsched_core::{
    InstanceProperties, RequestContext, RequestSpec, SchedulerConfig, TaskState, VmState,
};
use vmsched_state::{ComputeNodeRecord, InstanceFault, InstanceRecord, ServiceRecord, StateStore};

use crate::collaborators::{
    CollabResult, CollaboratorError, Collaborators, ComputeRpc, LiveMigrationRequest, Notifier,
    PrepResizeRequest, RunInstanceRequest,
};
use crate::driver::DriverBase;
use crate::service_group::HeartbeatServiceGroup;
use crate::store_impls::StoreHostCatalog;

/// Fixed wall clock seen by the harness service group.
pub const NOW: u64 = 1_700_000_000;

// ── Notifier ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    infos: Mutex<Vec<(String, Value)>>,
    errors: Mutex<Vec<(String, Value)>>,
    fail_next: AtomicBool,
}

impl RecordingNotifier {
    pub fn infos(&self) -> Vec<(String, Value)> {
        self.infos.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(String, Value)> {
        self.errors.lock().unwrap().clone()
    }

    /// Make the next error event fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl Notifier for RecordingNotifier {
    fn info(&self, _ctx: &RequestContext, event_type: &str, payload: Value) -> CollabResult<()> {
        self.infos.lock().unwrap().push((event_type.to_string(), payload));
        Ok(())
    }

    fn error(&self, _ctx: &RequestContext, event_type: &str, payload: Value) -> CollabResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CollaboratorError::Failed("notification bus down".into()));
        }
        self.errors.lock().unwrap().push((event_type.to_string(), payload));
        Ok(())
    }
}

// ── Compute ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingCompute {
    run_instance: Mutex<Vec<(String, RunInstanceRequest)>>,
    prep_resize: Mutex<Vec<(String, PrepResizeRequest)>>,
    live_migration: Mutex<Vec<LiveMigrationRequest>>,
    rejected_destinations: Mutex<BTreeSet<String>>,
    fail_dispatch: AtomicBool,
}

impl RecordingCompute {
    pub fn run_instance_calls(&self) -> Vec<(String, RunInstanceRequest)> {
        self.run_instance.lock().unwrap().clone()
    }

    pub fn prep_resize_calls(&self) -> Vec<(String, PrepResizeRequest)> {
        self.prep_resize.lock().unwrap().clone()
    }

    pub fn live_migration_calls(&self) -> Vec<LiveMigrationRequest> {
        self.live_migration.lock().unwrap().clone()
    }

    /// Answer the live-migration pre-check for `host` with `Invalid`.
    pub fn reject_destination(&self, host: &str) {
        self.rejected_destinations.lock().unwrap().insert(host.to_string());
    }

    /// Fail every dispatch (run, resize, migrate) from now on.
    pub fn fail_dispatch(&self) {
        self.fail_dispatch.store(true, Ordering::SeqCst);
    }

    fn check_dispatch(&self) -> CollabResult<()> {
        if self.fail_dispatch.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Failed("compute unreachable".into()));
        }
        Ok(())
    }
}

impl ComputeRpc for RecordingCompute {
    fn run_instance(&self, _ctx: &RequestContext, host: &str, req: &RunInstanceRequest) -> CollabResult<()> {
        self.check_dispatch()?;
        self.run_instance.lock().unwrap().push((host.to_string(), req.clone()));
        Ok(())
    }

    fn prep_resize(&self, _ctx: &RequestContext, host: &str, req: &PrepResizeRequest) -> CollabResult<()> {
        self.check_dispatch()?;
        self.prep_resize.lock().unwrap().push((host.to_string(), req.clone()));
        Ok(())
    }

    fn check_can_live_migrate_destination(
        &self,
        _ctx: &RequestContext,
        instance: &InstanceRecord,
        destination: &str,
        _block_migration: bool,
        _disk_over_commit: bool,
    ) -> CollabResult<Value> {
        if self.rejected_destinations.lock().unwrap().contains(destination) {
            return Err(CollaboratorError::Invalid(format!(
                "{destination} cannot take {}",
                instance.uuid
            )));
        }
        Ok(json!({ "checked": destination }))
    }

    fn live_migration(&self, _ctx: &RequestContext, req: &LiveMigrationRequest) -> CollabResult<()> {
        self.check_dispatch()?;
        self.live_migration.lock().unwrap().push(req.clone());
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────────

pub struct Harness {
    pub store: StateStore,
    pub ctx: RequestContext,
    pub config: SchedulerConfig,
    pub notifier: Arc<RecordingNotifier>,
    pub compute: Arc<RecordingCompute>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: StateStore::open_in_memory().unwrap(),
            ctx: RequestContext::new("fake-user", "fake-project").with_request_id("req-test"),
            config: SchedulerConfig::default(),
            notifier: Arc::new(RecordingNotifier::default()),
            compute: Arc::new(RecordingCompute::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        let servicegroup = HeartbeatServiceGroup::new(Duration::from_secs(self.config.service_down_time_secs))
            .with_clock(|| NOW);
        Collaborators {
            instances: Arc::new(self.store.clone()),
            hosts: Arc::new(StoreHostCatalog::new(self.store.clone(), self.config.compute_topic.clone())),
            servicegroup: Arc::new(servicegroup),
            compute: self.compute.clone(),
            images: Arc::new(self.store.clone()),
            notifier: self.notifier.clone(),
            quotas: Arc::new(self.store.clone()),
        }
    }

    pub fn driver_base(&self) -> DriverBase {
        DriverBase::new(self.config.clone(), self.collaborators())
    }

    /// Store a small instance with no host.
    pub fn add_instance(
        &self,
        uuid: &str,
        project_id: &str,
        vm_state: Option<VmState>,
        task_state: Option<TaskState>,
    ) -> InstanceRecord {
        let instance = InstanceRecord {
            uuid: uuid.to_string(),
            project_id: project_id.to_string(),
            vm_state,
            task_state,
            vcpus: 1,
            memory_mb: 128,
            root_gb: 1,
            ..InstanceRecord::default()
        };
        self.store.put_instance(&instance).unwrap();
        instance
    }

    pub fn add_compute(&self, host: &str, up: bool) {
        self.add_compute_with_ram(host, up, 4096);
    }

    /// Register a compute service and one node `{host}-node` with
    /// `memory_mb` of RAM. A down host has a stale heartbeat.
    pub fn add_compute_with_ram(&self, host: &str, up: bool, memory_mb: u64) {
        self.store
            .put_compute_node(&ComputeNodeRecord {
                host: host.to_string(),
                hypervisor_hostname: format!("{host}-node"),
                vcpus: 16,
                memory_mb,
                local_gb: 500,
                hypervisor_type: "QEMU".to_string(),
                hypervisor_version: 2_000_000,
                updated_at: NOW,
                ..ComputeNodeRecord::default()
            })
            .unwrap();
        let last_heartbeat = if up {
            NOW
        } else {
            NOW - self.config.service_down_time_secs - 1
        };
        self.store
            .put_service(&ServiceRecord {
                host: host.to_string(),
                binary: "vmsched-compute".to_string(),
                topic: self.config.compute_topic.clone(),
                last_heartbeat,
                ..ServiceRecord::default()
            })
            .unwrap();
    }

    pub fn disable_service(&self, host: &str) {
        let mut service = self
            .store
            .get_service(&self.config.compute_topic, host)
            .unwrap()
            .unwrap();
        service.disabled = true;
        self.store.put_service(&service).unwrap();
    }

    pub fn set_hypervisor(&self, host: &str, hypervisor_type: &str, version: u64) {
        for mut node in self.store.list_compute_nodes_by_host(host).unwrap() {
            node.hypervisor_type = hypervisor_type.to_string();
            node.hypervisor_version = version;
            self.store.put_compute_node(&node).unwrap();
        }
    }

    pub fn spec_for(&self, uuid: &str) -> RequestSpec {
        RequestSpec {
            instance_properties: InstanceProperties {
                uuid: Some(uuid.to_string()),
                project_id: "p1".to_string(),
                ..InstanceProperties::default()
            },
            instance_uuids: vec![uuid.to_string()],
            ..RequestSpec::default()
        }
    }

    pub fn instance(&self, uuid: &str) -> InstanceRecord {
        self.store.get_instance(uuid).unwrap().unwrap()
    }

    pub fn faults(&self, uuid: &str) -> Vec<InstanceFault> {
        self.store.list_instance_faults(uuid).unwrap()
    }
}
