//! Scheduler driver interface.
//!
//! A driver turns a request into destinations. Drivers are chosen once at
//! process start from `scheduler.driver` in the configuration. The two
//! selection entry points fail with [`SchedulerError::Unimplemented`]
//! unless a concrete driver overrides them.

use std::collections::BTreeSet;

use tracing::error;
use vmsched_core::{Destination, FilterProperties, RequestContext, RequestSpec, SchedulerConfig, VmState};
use vmsched_state::InstanceUpdate;

use crate::collaborators::{Collaborators, RunInstanceArgs};
use crate::error::{ErrorKind, SchedulerError, SchedulerResult};
use crate::utils;

/// State every driver carries: configuration and collaborator handles.
#[derive(Clone)]
pub struct DriverBase {
    pub config: SchedulerConfig,
    pub collaborators: Collaborators,
}

impl DriverBase {
    pub fn new(config: SchedulerConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    /// Hosts under `topic` whose service is enabled and reporting alive.
    pub fn hosts_up(&self, ctx: &RequestContext, topic: &str) -> SchedulerResult<BTreeSet<String>> {
        let services = self.collaborators.hosts.services_by_topic(ctx, topic)?;
        Ok(services
            .iter()
            .filter(|s| !s.disabled && self.collaborators.servicegroup.service_is_up(s))
            .map(|s| s.host.clone())
            .collect())
    }

    /// Put `instance_uuid` into ERROR, record a fault, and notify
    /// `scheduler.run_instance`.
    pub fn handle_schedule_error(
        &self,
        ctx: &RequestContext,
        err: &SchedulerError,
        instance_uuid: &str,
        request_spec: &RequestSpec,
    ) {
        if err.kind() != ErrorKind::NoValidHost {
            error!(%instance_uuid, error = %err, "Exception during scheduler.run_instance");
        }
        let updates = InstanceUpdate::vm_state(VmState::Error).clear_task_state();
        utils::set_vm_state_and_notify(
            &self.collaborators,
            ctx,
            &self.config.service_name,
            "run_instance",
            &updates,
            Some(err),
            &utils::spec_for_instance(request_spec, instance_uuid),
        );
    }
}

/// A host-selection strategy.
pub trait SchedulerDriver: Send + Sync {
    fn base(&self) -> &DriverBase;

    /// Place and launch every instance in `request_spec`.
    ///
    /// May update `filter_properties.retry` as attempts are counted.
    fn schedule_run_instance(
        &self,
        _ctx: &RequestContext,
        _request_spec: &RequestSpec,
        _args: &RunInstanceArgs,
        _filter_properties: &mut FilterProperties,
    ) -> SchedulerResult<()> {
        Err(SchedulerError::Unimplemented("schedule_run_instance"))
    }

    /// One destination per requested instance, best first.
    fn select_destinations(
        &self,
        _ctx: &RequestContext,
        _request_spec: &RequestSpec,
        _filter_properties: &FilterProperties,
    ) -> SchedulerResult<Vec<Destination>> {
        Err(SchedulerError::Unimplemented("select_destinations"))
    }

    fn hosts_up(&self, ctx: &RequestContext, topic: &str) -> SchedulerResult<BTreeSet<String>> {
        self.base().hosts_up(ctx, topic)
    }

    fn handle_schedule_error(
        &self,
        ctx: &RequestContext,
        err: &SchedulerError,
        instance_uuid: &str,
        request_spec: &RequestSpec,
    ) {
        self.base().handle_schedule_error(ctx, err, instance_uuid, request_spec)
    }

    /// Periodic housekeeping hook.
    fn run_periodic_tasks(&self, _ctx: &RequestContext) {}
}

/// Driver with no selection strategy.
pub struct BaseScheduler {
    base: DriverBase,
}

impl BaseScheduler {
    pub fn new(base: DriverBase) -> Self {
        Self { base }
    }
}

impl SchedulerDriver for BaseScheduler {
    fn base(&self) -> &DriverBase {
        &self.base
    }
}
