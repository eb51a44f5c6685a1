//! Scheduler manager.
//!
//! Every public operation has the same shape: ask the driver, dispatch the
//! follow-on action on success, and on any failure restore the instance,
//! record a fault, notify, and return the original error unchanged.

use std::collections::BTreeMap;

use tracing::{error, info, warn};
use vmsched_core::{
    Destination, FilterProperties, Flavor, HostResources, ImageMeta, RequestContext, RequestSpec,
    ResourceTotals, RetryState, SchedulerConfig, TaskState, UsageSummary, VmState,
};
use vmsched_state::{InstanceRecord, InstanceUpdate};

use crate::collaborators::{Collaborators, PrepResizeRequest, RunInstanceArgs};
use crate::driver::{BaseScheduler, DriverBase, SchedulerDriver};
use crate::error::{ErrorKind, RpcError, SchedulerError, SchedulerResult};
use crate::filter_scheduler::FilterScheduler;
use crate::live_migrate::LiveMigrationTask;
use crate::utils;

pub struct SchedulerManager {
    config: SchedulerConfig,
    collaborators: Collaborators,
    driver: Box<dyn SchedulerDriver>,
}

impl SchedulerManager {
    /// Build a manager with the driver named by `config.driver`.
    pub fn new(config: SchedulerConfig, collaborators: Collaborators) -> SchedulerResult<Self> {
        let base = DriverBase::new(config.clone(), collaborators.clone());
        let driver: Box<dyn SchedulerDriver> = match config.driver.as_str() {
            "filter" => Box::new(FilterScheduler::new(base)?),
            "base" => Box::new(BaseScheduler::new(base)),
            other => {
                return Err(SchedulerError::Config(format!(
                    "unknown scheduler driver: {other}"
                )));
            }
        };
        info!(driver = %config.driver, "scheduler manager initialized");
        Ok(Self::with_driver(config, collaborators, driver))
    }

    pub fn with_driver(
        config: SchedulerConfig,
        collaborators: Collaborators,
        driver: Box<dyn SchedulerDriver>,
    ) -> Self {
        Self {
            config,
            collaborators,
            driver,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    // ── Placement ─────────────────────────────────────────────────

    /// Place and launch the instances in `request_spec`.
    ///
    /// On failure every named instance goes to ERROR with its task state
    /// cleared.
    pub fn run_instance(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        args: &RunInstanceArgs,
        filter_properties: &mut FilterProperties,
    ) -> SchedulerResult<()> {
        let result = self
            .driver
            .schedule_run_instance(ctx, request_spec, args, filter_properties);
        if let Err(err) = &result {
            self.log_failure("run_instance", err);
            let updates = InstanceUpdate::vm_state(VmState::Error).clear_task_state();
            for instance_uuid in &request_spec.instance_uuids {
                self.set_vm_state_and_notify(
                    ctx,
                    "run_instance",
                    &updates,
                    Some(err),
                    &utils::spec_for_instance(request_spec, instance_uuid),
                );
            }
        }
        result
    }

    pub fn select_destinations(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        filter_properties: &FilterProperties,
    ) -> SchedulerResult<Vec<Destination>> {
        self.driver
            .select_destinations(ctx, request_spec, filter_properties)
    }

    /// Like [`select_destinations`](Self::select_destinations), with every
    /// failure marked as expected for the transport.
    pub fn select_hosts(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        filter_properties: &FilterProperties,
    ) -> Result<Vec<Destination>, RpcError> {
        self.driver
            .select_destinations(ctx, request_spec, filter_properties)
            .map_err(RpcError::Expected)
    }

    /// Pick a resize destination and ask it to prepare.
    ///
    /// The chosen pair is appended to `filter_properties.retry.hosts`.
    #[allow(clippy::too_many_arguments)]
    pub fn prep_resize(
        &self,
        ctx: &RequestContext,
        image: Option<ImageMeta>,
        request_spec: &RequestSpec,
        filter_properties: &mut FilterProperties,
        instance: &InstanceRecord,
        instance_type: &Flavor,
        reservations: &[String],
    ) -> SchedulerResult<()> {
        let result = self.schedule_prep_resize(
            ctx,
            image,
            request_spec,
            filter_properties,
            instance,
            instance_type,
            reservations,
        );
        let Err(err) = result else {
            return Ok(());
        };

        self.log_failure("prep_resize", &err);
        let vm_state = match err.kind() {
            ErrorKind::NoValidHost => instance.vm_state.unwrap_or(VmState::Active),
            _ => VmState::Error,
        };
        self.set_vm_state_and_notify(
            ctx,
            "prep_resize",
            &InstanceUpdate::vm_state(vm_state).clear_task_state(),
            Some(&err),
            &utils::spec_for_instance(request_spec, &instance.uuid),
        );

        if !reservations.is_empty() {
            if let Err(e) = self.collaborators.quotas.rollback(ctx, reservations) {
                warn!(instance_uuid = %instance.uuid, error = %e, "failed to roll back reservations");
            }
        }
        Err(err)
    }

    #[allow(clippy::too_many_arguments)]
    fn schedule_prep_resize(
        &self,
        ctx: &RequestContext,
        image: Option<ImageMeta>,
        request_spec: &RequestSpec,
        filter_properties: &mut FilterProperties,
        instance: &InstanceRecord,
        instance_type: &Flavor,
        reservations: &[String],
    ) -> SchedulerResult<()> {
        let dest = self
            .driver
            .select_destinations(ctx, request_spec, filter_properties)?
            .into_iter()
            .next()
            .ok_or_else(|| SchedulerError::no_valid_host("no destination returned"))?;

        filter_properties.retry.get_or_insert_with(|| RetryState::new(1));
        utils::populate_filter_properties(filter_properties, &dest);

        let req = PrepResizeRequest {
            instance: instance.clone(),
            instance_type: instance_type.clone(),
            image,
            node: dest.nodename.clone(),
            reservations: reservations.to_vec(),
            request_spec: request_spec.clone(),
            filter_properties: filter_properties.clone(),
        };
        self.collaborators.compute.prep_resize(ctx, &dest.host, &req)?;
        info!(
            instance_uuid = %instance.uuid,
            host = %dest.host,
            node = %dest.nodename,
            "resize destination selected"
        );
        Ok(())
    }

    /// Live-migrate `instance`, to `destination` if given. Returns the host
    /// the migration was started towards.
    ///
    /// On failure the instance's prior vm state is restored and its task
    /// state cleared, whatever the error.
    pub fn live_migration(
        &self,
        ctx: &RequestContext,
        instance: &InstanceRecord,
        destination: Option<&str>,
        block_migration: bool,
        disk_over_commit: bool,
    ) -> SchedulerResult<String> {
        let result = self.schedule_live_migration(
            ctx,
            instance,
            destination,
            block_migration,
            disk_over_commit,
        );
        if let Err(err) = &result {
            self.log_failure("live_migration", err);
            let mut updates = InstanceUpdate {
                vm_state: instance.vm_state,
                ..InstanceUpdate::default()
            }
            .clear_task_state();
            if let Some(expected) = migrating_precondition(instance.task_state) {
                updates = updates.expect_task_state(expected);
            }
            let request_spec = utils::build_request_spec(None, std::slice::from_ref(instance), None);
            self.set_vm_state_and_notify(ctx, "live_migration", &updates, Some(err), &request_spec);
        }
        result
    }

    fn schedule_live_migration(
        &self,
        ctx: &RequestContext,
        instance: &InstanceRecord,
        destination: Option<&str>,
        block_migration: bool,
        disk_over_commit: bool,
    ) -> SchedulerResult<String> {
        LiveMigrationTask::new(
            ctx,
            instance,
            destination,
            block_migration,
            disk_over_commit,
            self.driver.as_ref(),
            &self.collaborators,
            &self.config,
        )
        .execute()
    }

    // ── Rollback ──────────────────────────────────────────────────

    /// Apply `updates`, record a fault for `error`, and notify
    /// `{service}.{method}`. Never fails.
    pub fn set_vm_state_and_notify(
        &self,
        ctx: &RequestContext,
        method: &str,
        updates: &InstanceUpdate,
        error: Option<&SchedulerError>,
        request_spec: &RequestSpec,
    ) {
        utils::set_vm_state_and_notify(
            &self.collaborators,
            ctx,
            &self.config.service_name,
            method,
            updates,
            error,
            request_spec,
        );
    }

    fn log_failure(&self, method: &str, err: &SchedulerError) {
        match err.kind() {
            ErrorKind::NoValidHost => warn!(%method, error = %err, "scheduling failed"),
            _ => error!(%method, error = %err, "scheduler call failed"),
        }
    }

    // ── Reports & housekeeping ────────────────────────────────────

    /// Per-project usage on `host` plus the host's raw totals.
    pub fn show_host_resources(&self, ctx: &RequestContext, host: &str) -> SchedulerResult<HostResources> {
        let node = self.collaborators.hosts.compute_node(ctx, host)?;
        let instances = self.collaborators.instances.instances_by_host(ctx, host)?;

        let mut usage: BTreeMap<String, UsageSummary> = BTreeMap::new();
        for instance in &instances {
            let entry = usage.entry(instance.project_id.clone()).or_default();
            entry.vcpus += instance.vcpus;
            entry.memory_mb += instance.memory_mb;
            entry.root_gb += instance.root_gb;
            entry.ephemeral_gb += instance.ephemeral_gb;
        }

        Ok(HostResources {
            usage,
            resource: ResourceTotals {
                vcpus: node.vcpus,
                vcpus_used: node.vcpus_used,
                memory_mb: node.memory_mb,
                memory_mb_used: node.memory_mb_used,
                local_gb: node.local_gb,
                local_gb_used: node.local_gb_used,
            },
        })
    }

    pub fn run_periodic_tasks(&self, ctx: &RequestContext) {
        self.driver.run_periodic_tasks(ctx);
    }

    /// Drop stale quota reservations.
    pub fn expire_reservations(&self, ctx: &RequestContext) -> SchedulerResult<u32> {
        let expired = self.collaborators.quotas.expire(ctx)?;
        if expired > 0 {
            info!(expired, "expired quota reservations");
        }
        Ok(expired)
    }
}

/// Precondition for the live-migration rollback update: only an instance
/// still marked as migrating may be restored.
fn migrating_precondition(prior: Option<TaskState>) -> Option<TaskState> {
    (prior == Some(TaskState::Migrating)).then_some(TaskState::Migrating)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CollaboratorError;
    use crate::testing::Harness;
    use vmsched_core::PowerState;
    use vmsched_state::Reservation;

    /// Driver whose selection result is fixed by the test.
    struct ScriptedDriver {
        base: DriverBase,
        result: fn() -> SchedulerResult<Vec<Destination>>,
    }

    impl SchedulerDriver for ScriptedDriver {
        fn base(&self) -> &DriverBase {
            &self.base
        }

        fn schedule_run_instance(
            &self,
            _ctx: &RequestContext,
            _request_spec: &RequestSpec,
            _args: &RunInstanceArgs,
            _filter_properties: &mut FilterProperties,
        ) -> SchedulerResult<()> {
            (self.result)().map(|_| ())
        }

        fn select_destinations(
            &self,
            _ctx: &RequestContext,
            _request_spec: &RequestSpec,
            _filter_properties: &FilterProperties,
        ) -> SchedulerResult<Vec<Destination>> {
            (self.result)()
        }
    }

    fn scripted(h: &Harness, result: fn() -> SchedulerResult<Vec<Destination>>) -> SchedulerManager {
        let driver = ScriptedDriver {
            base: h.driver_base(),
            result,
        };
        SchedulerManager::with_driver(h.config.clone(), h.collaborators(), Box::new(driver))
    }

    fn filter_manager(h: &Harness) -> SchedulerManager {
        SchedulerManager::new(h.config.clone(), h.collaborators()).unwrap()
    }

    fn host_node() -> SchedulerResult<Vec<Destination>> {
        Ok(vec![Destination {
            host: "host".into(),
            nodename: "node".into(),
            limits: Default::default(),
        }])
    }

    fn boom() -> SchedulerResult<Vec<Destination>> {
        Err(SchedulerError::Other("boom".into()))
    }

    fn flavor() -> Flavor {
        Flavor {
            name: "m1.small".into(),
            vcpus: 1,
            memory_mb: 512,
            root_gb: 1,
            ephemeral_gb: 0,
        }
    }

    fn migrating_instance(h: &Harness, host: &str) -> InstanceRecord {
        let mut inst = h.add_instance("u1", "p1", Some(VmState::Active), Some(TaskState::Migrating));
        inst.host = Some(host.into());
        inst.power_state = PowerState::Running;
        inst.memory_mb = 512;
        h.store.put_instance(&inst).unwrap();
        inst
    }

    #[test]
    fn driver_is_chosen_from_config() {
        let mut h = Harness::new();
        assert!(SchedulerManager::new(h.config.clone(), h.collaborators()).is_ok());

        h.config.driver = "base".into();
        assert!(SchedulerManager::new(h.config.clone(), h.collaborators()).is_ok());

        h.config.driver = "chance".into();
        assert!(matches!(
            SchedulerManager::new(h.config.clone(), h.collaborators()),
            Err(SchedulerError::Config(_))
        ));
    }

    // ── run_instance ──────────────────────────────────────────────

    #[test]
    fn run_instance_no_valid_host_errors_every_instance() {
        let h = Harness::new();
        h.add_instance("u1", "p1", Some(VmState::Building), Some(TaskState::Scheduling));
        h.add_instance("u2", "p1", Some(VmState::Building), Some(TaskState::Scheduling));
        let manager = filter_manager(&h);
        let mut spec = h.spec_for("u1");
        spec.instance_uuids = vec!["u1".into(), "u2".into()];

        let err = manager
            .run_instance(&h.ctx, &spec, &RunInstanceArgs::default(), &mut FilterProperties::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoValidHost);

        for uuid in ["u1", "u2"] {
            let inst = h.instance(uuid);
            assert_eq!(inst.vm_state, Some(VmState::Error));
            assert_eq!(inst.task_state, None);
            assert_eq!(h.faults(uuid).len(), 1);
        }
        let events = h.notifier.errors();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|(e, _)| e == "scheduler.run_instance"));
        assert_eq!(events[0].1["instance_id"], "u1");
        assert_eq!(events[1].1["instance_id"], "u2");
    }

    #[test]
    fn run_instance_reraises_arbitrary_errors() {
        let h = Harness::new();
        h.add_instance("u1", "p1", Some(VmState::Building), Some(TaskState::Scheduling));
        let manager = scripted(&h, boom);

        let err = manager
            .run_instance(&h.ctx, &h.spec_for("u1"), &RunInstanceArgs::default(), &mut FilterProperties::default())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Other(ref m) if m == "boom"));
        assert_eq!(h.instance("u1").vm_state, Some(VmState::Error));
        assert_eq!(h.faults("u1")[0].exception_type, "SchedulerError");
        assert_eq!(h.notifier.errors().len(), 1);
    }

    #[test]
    fn run_instance_success_dispatches() {
        let h = Harness::new();
        h.add_compute("host1", true);
        h.add_instance("u1", "p1", Some(VmState::Building), Some(TaskState::Scheduling));
        let manager = filter_manager(&h);

        manager
            .run_instance(&h.ctx, &h.spec_for("u1"), &RunInstanceArgs::default(), &mut FilterProperties::default())
            .unwrap();
        assert_eq!(h.compute.run_instance_calls().len(), 1);
        assert!(h.notifier.errors().is_empty());
    }

    // ── select_hosts ──────────────────────────────────────────────

    #[test]
    fn select_hosts_marks_every_failure_expected() {
        let h = Harness::new();
        let manager = filter_manager(&h);
        let err = manager
            .select_hosts(&h.ctx, &h.spec_for("u1"), &FilterProperties::default())
            .unwrap_err();
        assert!(matches!(err, RpcError::Expected(SchedulerError::NoValidHost { .. })));

        let manager = scripted(&h, boom);
        let err = manager
            .select_hosts(&h.ctx, &h.spec_for("u1"), &FilterProperties::default())
            .unwrap_err();
        assert!(matches!(err, RpcError::Expected(SchedulerError::Other(_))));
        assert!(h.notifier.errors().is_empty());
    }

    // ── prep_resize ───────────────────────────────────────────────

    #[test]
    fn prep_resize_appends_destination_and_dispatches() {
        let h = Harness::new();
        let instance = h.add_instance("u1", "p1", Some(VmState::Active), Some(TaskState::ResizePrep));
        let manager = scripted(&h, host_node);
        let mut props = FilterProperties::with_retry(RetryState::new(1));

        manager
            .prep_resize(&h.ctx, None, &h.spec_for("u1"), &mut props, &instance, &flavor(), &[])
            .unwrap();

        let retry = props.retry.unwrap();
        assert_eq!(retry.hosts, vec![("host".to_string(), "node".to_string())]);
        assert_eq!(retry.num_attempts, 1);
        let calls = h.compute.prep_resize_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "host");
        assert_eq!(calls[0].1.node, "node");
        assert_eq!(calls[0].1.instance_type.name, "m1.small");
    }

    #[test]
    fn prep_resize_bootstraps_missing_retry() {
        let h = Harness::new();
        let instance = h.add_instance("u1", "p1", Some(VmState::Active), Some(TaskState::ResizePrep));
        let manager = scripted(&h, host_node);
        let mut props = FilterProperties::default();

        manager
            .prep_resize(&h.ctx, None, &h.spec_for("u1"), &mut props, &instance, &flavor(), &[])
            .unwrap();
        let retry = props.retry.unwrap();
        assert_eq!(retry.num_attempts, 1);
        assert_eq!(retry.hosts.len(), 1);
    }

    #[test]
    fn prep_resize_no_valid_host_keeps_prior_state() {
        let h = Harness::new();
        let instance = h.add_instance("u1", "p1", Some(VmState::Stopped), Some(TaskState::ResizePrep));
        h.store
            .put_reservation(&Reservation {
                id: "r1".into(),
                project_id: "p1".into(),
                resource: "ram".into(),
                delta: 512,
                expire_at: u64::MAX,
            })
            .unwrap();
        let manager = filter_manager(&h);

        let err = manager
            .prep_resize(
                &h.ctx,
                None,
                &h.spec_for("u1"),
                &mut FilterProperties::default(),
                &instance,
                &flavor(),
                &["r1".to_string()],
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoValidHost);

        let inst = h.instance("u1");
        assert_eq!(inst.vm_state, Some(VmState::Stopped));
        assert_eq!(inst.task_state, None);
        assert_eq!(h.faults("u1").len(), 1);
        let events = h.notifier.errors();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "scheduler.prep_resize");
        assert!(h.store.list_reservations().unwrap().is_empty());
    }

    #[test]
    fn prep_resize_without_prior_state_restores_active() {
        let h = Harness::new();
        let instance = h.add_instance("u1", "p1", None, Some(TaskState::ResizePrep));
        let manager = filter_manager(&h);

        manager
            .prep_resize(&h.ctx, None, &h.spec_for("u1"), &mut FilterProperties::default(), &instance, &flavor(), &[])
            .unwrap_err();
        assert_eq!(h.instance("u1").vm_state, Some(VmState::Active));
    }

    #[test]
    fn prep_resize_dispatch_failure_sets_error() {
        let h = Harness::new();
        let instance = h.add_instance("u1", "p1", Some(VmState::Active), Some(TaskState::ResizePrep));
        h.compute.fail_dispatch();
        let manager = scripted(&h, host_node);

        let err = manager
            .prep_resize(&h.ctx, None, &h.spec_for("u1"), &mut FilterProperties::default(), &instance, &flavor(), &[])
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Collaborator(CollaboratorError::Failed(_))));

        let inst = h.instance("u1");
        assert_eq!(inst.vm_state, Some(VmState::Error));
        assert_eq!(inst.task_state, None);
        assert_eq!(h.faults("u1").len(), 1);
        assert_eq!(h.notifier.errors().len(), 1);
    }

    #[test]
    fn notification_failure_does_not_mask_error() {
        let h = Harness::new();
        let instance = h.add_instance("u1", "p1", Some(VmState::Active), Some(TaskState::ResizePrep));
        h.notifier.fail_next();
        let manager = filter_manager(&h);

        let err = manager
            .prep_resize(&h.ctx, None, &h.spec_for("u1"), &mut FilterProperties::default(), &instance, &flavor(), &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoValidHost);
        assert_eq!(h.instance("u1").task_state, None);
        assert_eq!(h.faults("u1").len(), 1);
        assert!(h.notifier.errors().is_empty());
    }

    // ── live_migration ────────────────────────────────────────────

    #[test]
    fn live_migration_to_down_destination_restores_state() {
        let h = Harness::new();
        h.add_compute("src", true);
        h.add_compute("dst", false);
        let instance = migrating_instance(&h, "src");
        let manager = filter_manager(&h);

        let err = manager
            .live_migration(&h.ctx, &instance, Some("dst"), false, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ComputeServiceUnavailable);

        let inst = h.instance("u1");
        assert_eq!(inst.vm_state, Some(VmState::Active));
        assert_eq!(inst.task_state, None);
        assert_eq!(h.faults("u1").len(), 1);
        let events = h.notifier.errors();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "scheduler.live_migration");
        assert_eq!(events[0].1["state"], "active");
    }

    #[test]
    fn live_migration_reraises_arbitrary_errors() {
        let h = Harness::new();
        h.add_compute("src", true);
        h.add_compute("dst", true);
        let instance = migrating_instance(&h, "src");
        h.compute.fail_dispatch();
        let manager = filter_manager(&h);

        let err = manager
            .live_migration(&h.ctx, &instance, Some("dst"), false, false)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Collaborator(CollaboratorError::Failed(_))));
        assert_eq!(h.instance("u1").vm_state, Some(VmState::Active));
        assert_eq!(h.instance("u1").task_state, None);
        assert_eq!(h.notifier.errors().len(), 1);
    }

    #[test]
    fn live_migration_rejected_precheck_is_invalid() {
        let h = Harness::new();
        h.add_compute("src", true);
        h.add_compute("dst", true);
        h.compute.reject_destination("dst");
        let instance = migrating_instance(&h, "src");
        let manager = filter_manager(&h);

        let err = manager
            .live_migration(&h.ctx, &instance, Some("dst"), true, false)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::MigrationPreCheck(_)));
        assert_eq!(h.faults("u1")[0].code, 400);
    }

    #[test]
    fn live_migration_success_leaves_state_to_compute() {
        let h = Harness::new();
        h.add_compute("src", true);
        h.add_compute("dst", true);
        let instance = migrating_instance(&h, "src");
        let manager = filter_manager(&h);

        let dest = manager
            .live_migration(&h.ctx, &instance, None, false, false)
            .unwrap();
        assert_eq!(dest, "dst");
        assert_eq!(h.instance("u1").task_state, Some(TaskState::Migrating));
        assert!(h.notifier.errors().is_empty());
    }

    #[test]
    fn migrating_precondition_only_for_migrating() {
        assert_eq!(migrating_precondition(Some(TaskState::Migrating)), Some(TaskState::Migrating));
        assert_eq!(migrating_precondition(Some(TaskState::ResizePrep)), None);
        assert_eq!(migrating_precondition(None), None);
    }

    // ── Reports & housekeeping ────────────────────────────────────

    #[test]
    fn show_host_resources_aggregates_by_project() {
        let h = Harness::new();
        h.add_compute("host", true);
        for (uuid, project, vcpus, memory_mb, root_gb) in [
            ("a", "p1", 1, 128, 128),
            ("b", "p1", 2, 256, 384),
            ("c", "p2", 2, 256, 256),
        ] {
            h.store
                .put_instance(&InstanceRecord {
                    uuid: uuid.into(),
                    project_id: project.into(),
                    host: Some("host".into()),
                    vcpus,
                    memory_mb,
                    root_gb,
                    ..InstanceRecord::default()
                })
                .unwrap();
        }
        let manager = filter_manager(&h);

        let report = manager.show_host_resources(&h.ctx, "host").unwrap();
        assert_eq!(
            report.usage["p1"],
            UsageSummary {
                vcpus: 3,
                memory_mb: 384,
                root_gb: 512,
                ephemeral_gb: 0
            }
        );
        assert_eq!(
            report.usage["p2"],
            UsageSummary {
                vcpus: 2,
                memory_mb: 256,
                root_gb: 256,
                ephemeral_gb: 0
            }
        );
        assert_eq!(report.resource.memory_mb, 4096);
        assert_eq!(report.resource.vcpus, 16);
    }

    #[test]
    fn show_host_resources_unknown_host() {
        let h = Harness::new();
        let manager = filter_manager(&h);
        assert!(matches!(
            manager.show_host_resources(&h.ctx, "ghost"),
            Err(SchedulerError::Collaborator(CollaboratorError::NotFound(_)))
        ));
    }

    #[test]
    fn expire_reservations_drops_stale_only() {
        let h = Harness::new();
        for (id, expire_at) in [("old", 1), ("fresh", u64::MAX)] {
            h.store
                .put_reservation(&Reservation {
                    id: id.into(),
                    project_id: "p1".into(),
                    resource: "instances".into(),
                    delta: 1,
                    expire_at,
                })
                .unwrap();
        }
        let manager = filter_manager(&h);

        assert_eq!(manager.expire_reservations(&h.ctx).unwrap(), 1);
        let left = h.store.list_reservations().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "fresh");
    }
}
