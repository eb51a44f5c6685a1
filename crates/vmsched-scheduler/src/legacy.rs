//! Positional-argument (v3) calling convention.
//!
//! [`LegacyProxy`] reorders positional arguments into the keyword-style
//! [`SchedulerEndpoint`] methods and forwards them unchanged.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use vmsched_core::{
    Destination, FilterProperties, Flavor, HostResources, ImageMeta, RequestContext, RequestSpec,
};
use vmsched_state::InstanceRecord;

use crate::collaborators::{RequestedNetwork, RunInstanceArgs};
use crate::error::{RpcError, SchedulerError, SchedulerResult};
use crate::manager::SchedulerManager;

/// The operations reachable through the legacy convention.
pub trait SchedulerEndpoint: Send + Sync {
    fn run_instance(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        args: &RunInstanceArgs,
        filter_properties: &mut FilterProperties,
    ) -> SchedulerResult<()>;

    fn select_destinations(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        filter_properties: &FilterProperties,
    ) -> SchedulerResult<Vec<Destination>>;

    #[allow(clippy::too_many_arguments)]
    fn prep_resize(
        &self,
        ctx: &RequestContext,
        image: Option<ImageMeta>,
        request_spec: &RequestSpec,
        filter_properties: &mut FilterProperties,
        instance: &InstanceRecord,
        instance_type: &Flavor,
        reservations: &[String],
    ) -> SchedulerResult<()>;

    fn select_hosts(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        filter_properties: &FilterProperties,
    ) -> Result<Vec<Destination>, RpcError>;

    fn live_migration(
        &self,
        ctx: &RequestContext,
        instance: &InstanceRecord,
        destination: Option<&str>,
        block_migration: bool,
        disk_over_commit: bool,
    ) -> SchedulerResult<String>;

    fn show_host_resources(&self, ctx: &RequestContext, host: &str) -> SchedulerResult<HostResources>;
}

impl SchedulerEndpoint for SchedulerManager {
    fn run_instance(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        args: &RunInstanceArgs,
        filter_properties: &mut FilterProperties,
    ) -> SchedulerResult<()> {
        SchedulerManager::run_instance(self, ctx, request_spec, args, filter_properties)
    }

    fn select_destinations(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        filter_properties: &FilterProperties,
    ) -> SchedulerResult<Vec<Destination>> {
        SchedulerManager::select_destinations(self, ctx, request_spec, filter_properties)
    }

    fn prep_resize(
        &self,
        ctx: &RequestContext,
        image: Option<ImageMeta>,
        request_spec: &RequestSpec,
        filter_properties: &mut FilterProperties,
        instance: &InstanceRecord,
        instance_type: &Flavor,
        reservations: &[String],
    ) -> SchedulerResult<()> {
        SchedulerManager::prep_resize(
            self,
            ctx,
            image,
            request_spec,
            filter_properties,
            instance,
            instance_type,
            reservations,
        )
    }

    fn select_hosts(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        filter_properties: &FilterProperties,
    ) -> Result<Vec<Destination>, RpcError> {
        SchedulerManager::select_hosts(self, ctx, request_spec, filter_properties)
    }

    fn live_migration(
        &self,
        ctx: &RequestContext,
        instance: &InstanceRecord,
        destination: Option<&str>,
        block_migration: bool,
        disk_over_commit: bool,
    ) -> SchedulerResult<String> {
        SchedulerManager::live_migration(
            self,
            ctx,
            instance,
            destination,
            block_migration,
            disk_over_commit,
        )
    }

    fn show_host_resources(&self, ctx: &RequestContext, host: &str) -> SchedulerResult<HostResources> {
        SchedulerManager::show_host_resources(self, ctx, host)
    }
}

impl<E: SchedulerEndpoint + ?Sized> SchedulerEndpoint for Arc<E> {
    fn run_instance(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        args: &RunInstanceArgs,
        filter_properties: &mut FilterProperties,
    ) -> SchedulerResult<()> {
        (**self).run_instance(ctx, request_spec, args, filter_properties)
    }

    fn select_destinations(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        filter_properties: &FilterProperties,
    ) -> SchedulerResult<Vec<Destination>> {
        (**self).select_destinations(ctx, request_spec, filter_properties)
    }

    fn prep_resize(
        &self,
        ctx: &RequestContext,
        image: Option<ImageMeta>,
        request_spec: &RequestSpec,
        filter_properties: &mut FilterProperties,
        instance: &InstanceRecord,
        instance_type: &Flavor,
        reservations: &[String],
    ) -> SchedulerResult<()> {
        (**self).prep_resize(
            ctx,
            image,
            request_spec,
            filter_properties,
            instance,
            instance_type,
            reservations,
        )
    }

    fn select_hosts(
        &self,
        ctx: &RequestContext,
        request_spec: &RequestSpec,
        filter_properties: &FilterProperties,
    ) -> Result<Vec<Destination>, RpcError> {
        (**self).select_hosts(ctx, request_spec, filter_properties)
    }

    fn live_migration(
        &self,
        ctx: &RequestContext,
        instance: &InstanceRecord,
        destination: Option<&str>,
        block_migration: bool,
        disk_over_commit: bool,
    ) -> SchedulerResult<String> {
        (**self).live_migration(ctx, instance, destination, block_migration, disk_over_commit)
    }

    fn show_host_resources(&self, ctx: &RequestContext, host: &str) -> SchedulerResult<HostResources> {
        (**self).show_host_resources(ctx, host)
    }
}

pub struct LegacyProxy<E> {
    endpoint: E,
}

impl<E: SchedulerEndpoint> LegacyProxy<E> {
    pub fn new(endpoint: E) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn select_destinations(
        &self,
        ctx: &RequestContext,
        request_spec: RequestSpec,
        filter_properties: FilterProperties,
    ) -> SchedulerResult<Vec<Destination>> {
        self.endpoint
            .select_destinations(ctx, &request_spec, &filter_properties)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run_instance(
        &self,
        ctx: &RequestContext,
        request_spec: RequestSpec,
        admin_password: Option<String>,
        injected_files: Vec<(String, String)>,
        requested_networks: Vec<RequestedNetwork>,
        is_first_time: bool,
        mut filter_properties: FilterProperties,
        legacy_bdm_in_spec: bool,
    ) -> SchedulerResult<()> {
        let args = RunInstanceArgs {
            admin_password,
            injected_files,
            requested_networks,
            is_first_time,
            legacy_bdm_in_spec,
        };
        self.endpoint
            .run_instance(ctx, &request_spec, &args, &mut filter_properties)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn prep_resize(
        &self,
        ctx: &RequestContext,
        instance: InstanceRecord,
        instance_type: Flavor,
        image: Option<ImageMeta>,
        request_spec: RequestSpec,
        mut filter_properties: FilterProperties,
        reservations: Vec<String>,
    ) -> SchedulerResult<()> {
        self.endpoint.prep_resize(
            ctx,
            image,
            &request_spec,
            &mut filter_properties,
            &instance,
            &instance_type,
            &reservations,
        )
    }

    pub fn select_hosts(
        &self,
        ctx: &RequestContext,
        request_spec: RequestSpec,
        filter_properties: FilterProperties,
    ) -> Result<Vec<Destination>, RpcError> {
        self.endpoint
            .select_hosts(ctx, &request_spec, &filter_properties)
    }

    pub fn live_migration(
        &self,
        ctx: &RequestContext,
        block_migration: bool,
        disk_over_commit: bool,
        instance: InstanceRecord,
        destination: Option<String>,
    ) -> SchedulerResult<String> {
        self.endpoint.live_migration(
            ctx,
            &instance,
            destination.as_deref(),
            block_migration,
            disk_over_commit,
        )
    }

    pub fn show_host_resources(&self, ctx: &RequestContext, host: String) -> SchedulerResult<HostResources> {
        self.endpoint.show_host_resources(ctx, &host)
    }

    /// Dispatch `method` with arguments decoded from a JSON array.
    ///
    /// Missing trailing arguments take their default. Returns the method's
    /// result as JSON (`null` for methods without one).
    pub fn call(&self, ctx: &RequestContext, method: &str, args: &[Value]) -> SchedulerResult<Value> {
        let args = PositionalArgs(args);
        match method {
            "select_destinations" => {
                let dests = self.select_destinations(
                    ctx,
                    args.required(0, "request_spec")?,
                    args.optional(1, "filter_properties")?,
                )?;
                encode(&dests, "destinations")
            }
            "run_instance" => {
                self.run_instance(
                    ctx,
                    args.required(0, "request_spec")?,
                    args.optional(1, "admin_password")?,
                    args.optional(2, "injected_files")?,
                    args.optional(3, "requested_networks")?,
                    args.optional(4, "is_first_time")?,
                    args.optional(5, "filter_properties")?,
                    args.optional(6, "legacy_bdm_in_spec")?,
                )?;
                Ok(Value::Null)
            }
            "prep_resize" => {
                self.prep_resize(
                    ctx,
                    args.required(0, "instance")?,
                    args.required(1, "instance_type")?,
                    args.optional(2, "image")?,
                    args.required(3, "request_spec")?,
                    args.optional(4, "filter_properties")?,
                    args.optional(5, "reservations")?,
                )?;
                Ok(Value::Null)
            }
            "select_hosts" => {
                let dests = self
                    .select_hosts(
                        ctx,
                        args.required(0, "request_spec")?,
                        args.optional(1, "filter_properties")?,
                    )
                    .map_err(RpcError::into_inner)?;
                encode(&dests, "destinations")
            }
            "live_migration" => {
                let destination = self.live_migration(
                    ctx,
                    args.optional(0, "block_migration")?,
                    args.optional(1, "disk_over_commit")?,
                    args.required(2, "instance")?,
                    args.optional(3, "dest")?,
                )?;
                Ok(Value::String(destination))
            }
            "show_host_resources" => {
                let report = self.show_host_resources(ctx, args.required(0, "host")?)?;
                encode(&report, "host resources")
            }
            other => Err(SchedulerError::InvalidRequest(format!(
                "unknown legacy method: {other}"
            ))),
        }
    }
}

struct PositionalArgs<'a>(&'a [Value]);

impl PositionalArgs<'_> {
    fn required<T: DeserializeOwned>(&self, index: usize, name: &str) -> SchedulerResult<T> {
        let value = self
            .0
            .get(index)
            .ok_or_else(|| SchedulerError::InvalidRequest(format!("missing argument {index} ({name})")))?;
        decode(value.clone(), index, name)
    }

    fn optional<T: DeserializeOwned + Default>(&self, index: usize, name: &str) -> SchedulerResult<T> {
        match self.0.get(index) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => decode(value.clone(), index, name),
        }
    }
}

fn encode<T: serde::Serialize>(value: &T, what: &str) -> SchedulerResult<Value> {
    serde_json::to_value(value).map_err(|e| SchedulerError::Other(format!("encode {what}: {e}")))
}

fn decode<T: DeserializeOwned>(value: Value, index: usize, name: &str) -> SchedulerResult<T> {
    serde_json::from_value(value)
        .map_err(|e| SchedulerError::InvalidRequest(format!("argument {index} ({name}): {e}")))
}
