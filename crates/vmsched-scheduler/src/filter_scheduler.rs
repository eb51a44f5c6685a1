//! Filter scheduler — the default driver.
//!
//! Builds a host snapshot from the catalog and liveness oracle, then runs
//! the placement pipeline over it. For run-instance requests it also
//! records each placement on the instance and dispatches the launch.

use serde_json::json;
use tracing::{debug, info, warn};
use vmsched_core::{Destination, FilterProperties, RequestContext, RequestSpec};
use vmsched_placement::{HostState, Pipeline, host_states_from_records};
use vmsched_state::{InstanceUpdate, store::epoch_secs};

use crate::collaborators::{RunInstanceArgs, RunInstanceRequest};
use crate::driver::{DriverBase, SchedulerDriver};
use crate::error::{SchedulerError, SchedulerResult};
use crate::utils;

pub struct FilterScheduler {
    base: DriverBase,
    pipeline: Pipeline,
}

impl FilterScheduler {
    pub fn new(base: DriverBase) -> SchedulerResult<Self> {
        let pipeline = Pipeline::from_config(&base.config.filters, &base.config.weights)?;
        debug!(filters = ?pipeline.filter_names(), "filter scheduler ready");
        Ok(Self { base, pipeline })
    }

    /// Current view of every compute node, annotated with liveness.
    fn host_snapshot(&self, ctx: &RequestContext) -> SchedulerResult<Vec<HostState>> {
        let elevated = ctx.elevated();
        let collab = &self.base.collaborators;
        let topic = &self.base.config.compute_topic;

        let services = collab.hosts.services_by_topic(&elevated, topic)?;
        let up = self.base.hosts_up(&elevated, topic)?;
        let nodes = collab.hosts.compute_nodes(&elevated)?;
        Ok(host_states_from_records(&nodes, &services, &up))
    }

    fn schedule(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        filter_properties: &FilterProperties,
    ) -> SchedulerResult<Vec<Destination>> {
        let hosts = self.host_snapshot(ctx)?;
        debug!(hosts = hosts.len(), "host snapshot loaded");
        Ok(self
            .pipeline
            .select_destinations(&hosts, request_spec, filter_properties)?)
    }

    fn notify_info(&self, ctx: &RequestContext, event: &str, payload: serde_json::Value) {
        let event_type = format!("{}.{event}", self.base.config.service_name);
        if let Err(e) = self.base.collaborators.notifier.info(ctx, &event_type, payload) {
            warn!(%event_type, error = %e, "failed to emit notification");
        }
    }

    /// Record the placement on the instance and ask compute to launch it.
    fn provision(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        instance_uuid: &str,
        dest: &Destination,
        args: &RunInstanceArgs,
        filter_properties: FilterProperties,
    ) -> SchedulerResult<()> {
        let collab = &self.base.collaborators;
        let update = InstanceUpdate::placed_on(&dest.host, &dest.nodename, epoch_secs());
        let (_, instance) = collab
            .instances
            .update_instance_and_get_original(ctx, instance_uuid, &update)?;

        let req = RunInstanceRequest {
            instance,
            node: dest.nodename.clone(),
            request_spec: utils::spec_for_instance(request_spec, instance_uuid),
            filter_properties,
            args: args.clone(),
            limits: dest.limits.clone(),
        };
        collab.compute.run_instance(ctx, &dest.host, &req)?;
        info!(%instance_uuid, host = %dest.host, node = %dest.nodename, "instance scheduled");
        Ok(())
    }
}

impl SchedulerDriver for FilterScheduler {
    fn base(&self) -> &DriverBase {
        &self.base
    }

    fn schedule_run_instance(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        args: &RunInstanceArgs,
        filter_properties: &mut FilterProperties,
    ) -> SchedulerResult<()> {
        let instance_uuids = &request_spec.instance_uuids;
        info!(instances = ?instance_uuids, "attempting to build instances");
        self.notify_info(
            ctx,
            "run_instance.start",
            json!({ "request_spec": request_spec }),
        );

        let first_uuid = instance_uuids.first().map(String::as_str).unwrap_or("");
        utils::populate_retry(filter_properties, first_uuid, self.base.config.max_attempts)?;

        let destinations = self.schedule(ctx, request_spec, filter_properties)?;

        for (index, instance_uuid) in instance_uuids.iter().enumerate() {
            let Some(dest) = destinations.get(index) else {
                let err = SchedulerError::no_valid_host("");
                self.handle_schedule_error(ctx, &err, instance_uuid, request_spec);
                continue;
            };
            let mut props = filter_properties.clone();
            utils::populate_filter_properties(&mut props, dest);
            if let Err(err) = self.provision(ctx, request_spec, instance_uuid, dest, args, props) {
                self.handle_schedule_error(ctx, &err, instance_uuid, request_spec);
            }
        }

        self.notify_info(
            ctx,
            "run_instance.end",
            json!({ "request_spec": request_spec }),
        );
        Ok(())
    }

    fn select_destinations(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        filter_properties: &FilterProperties,
    ) -> SchedulerResult<Vec<Destination>> {
        self.notify_info(
            ctx,
            "select_destinations.start",
            json!({ "request_spec": request_spec }),
        );
        let destinations = self.schedule(ctx, request_spec, filter_properties)?;
        self.notify_info(
            ctx,
            "select_destinations.end",
            json!({ "request_spec": request_spec }),
        );
        Ok(destinations)
    }

    fn run_periodic_tasks(&self, _ctx: &RequestContext) {
        debug!("filter scheduler periodic tasks");
    }
}
