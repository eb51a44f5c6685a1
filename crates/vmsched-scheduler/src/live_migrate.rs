//! Live-migration task.
//!
//! A single-use workflow: validate the instance and its source host, then
//! either validate the requested destination or search for one with the
//! driver, and finally hand the migration to compute. The task never
//! retries a failed migration; that is the caller's decision.

use tracing::{debug, info};
use vmsched_core::{FilterProperties, PowerState, RequestContext, RequestSpec, SchedulerConfig};
use vmsched_state::{ComputeNodeRecord, InstanceRecord};

use crate::collaborators::{CollaboratorError, Collaborators, LiveMigrationRequest};
use crate::driver::SchedulerDriver;
use crate::error::{SchedulerError, SchedulerResult};
use crate::utils;

pub struct LiveMigrationTask<'a> {
    ctx: &'a RequestContext,
    instance: &'a InstanceRecord,
    destination: Option<String>,
    block_migration: bool,
    disk_over_commit: bool,
    driver: &'a dyn SchedulerDriver,
    collaborators: &'a Collaborators,
    config: &'a SchedulerConfig,
    migrate_data: serde_json::Value,
}

impl<'a> LiveMigrationTask<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &'a RequestContext,
        instance: &'a InstanceRecord,
        destination: Option<&str>,
        block_migration: bool,
        disk_over_commit: bool,
        driver: &'a dyn SchedulerDriver,
        collaborators: &'a Collaborators,
        config: &'a SchedulerConfig,
    ) -> Self {
        Self {
            ctx,
            instance,
            destination: destination.map(str::to_string),
            block_migration,
            disk_over_commit,
            driver,
            collaborators,
            config,
            migrate_data: serde_json::Value::Null,
        }
    }

    /// Run the checks and start the migration. Returns the destination host.
    pub fn execute(mut self) -> SchedulerResult<String> {
        self.check_instance_is_running()?;
        let source = self.source()?.to_string();
        self.check_host_is_up(&source)?;

        let destination = match self.destination.clone() {
            Some(dest) => {
                self.check_requested_destination(&source, &dest)?;
                dest
            }
            None => self.find_destination(&source)?,
        };

        info!(
            instance_uuid = %self.instance.uuid,
            %source,
            %destination,
            block_migration = self.block_migration,
            "starting live migration"
        );
        self.collaborators.compute.live_migration(
            self.ctx,
            &LiveMigrationRequest {
                instance: self.instance.clone(),
                source,
                destination: destination.clone(),
                block_migration: self.block_migration,
                migrate_data: std::mem::take(&mut self.migrate_data),
            },
        )?;
        Ok(destination)
    }

    fn source(&self) -> SchedulerResult<&str> {
        self.instance.host.as_deref().ok_or_else(|| {
            SchedulerError::InvalidRequest(format!("instance {} has no host", self.instance.uuid))
        })
    }

    fn check_instance_is_running(&self) -> SchedulerResult<()> {
        if self.instance.power_state != PowerState::Running {
            return Err(SchedulerError::InstanceNotRunning {
                uuid: self.instance.uuid.clone(),
            });
        }
        Ok(())
    }

    fn check_host_is_up(&self, host: &str) -> SchedulerResult<()> {
        let service = self.collaborators.hosts.compute_service(self.ctx, host)?;
        if !self.collaborators.servicegroup.service_is_up(&service) {
            return Err(SchedulerError::ComputeServiceUnavailable {
                host: host.to_string(),
            });
        }
        Ok(())
    }

    fn check_requested_destination(&mut self, source: &str, dest: &str) -> SchedulerResult<()> {
        if dest == source {
            return Err(SchedulerError::UnableToMigrateToSelf {
                uuid: self.instance.uuid.clone(),
                host: dest.to_string(),
            });
        }
        self.check_host_is_up(dest)?;
        self.check_destination_has_enough_memory(dest)?;
        self.check_compatible_with_source_hypervisor(source, dest)?;
        self.call_livem_checks_on_host(dest)
    }

    fn check_destination_has_enough_memory(&self, dest: &str) -> SchedulerResult<()> {
        let avail = self.compute_info(dest)?.free_ram_mb();
        let mem_inst = self.instance.memory_mb;
        if mem_inst == 0 || avail <= mem_inst as i64 {
            return Err(SchedulerError::MigrationPreCheck(format!(
                "Unable to migrate {} to {dest}: Lack of memory(host:{avail} <= instance:{mem_inst})",
                self.instance.uuid
            )));
        }
        Ok(())
    }

    fn check_compatible_with_source_hypervisor(&self, source: &str, dest: &str) -> SchedulerResult<()> {
        let source_info = self.compute_info(source)?;
        let dest_info = self.compute_info(dest)?;
        if source_info.hypervisor_type != dest_info.hypervisor_type {
            return Err(SchedulerError::InvalidHypervisorType);
        }
        if source_info.hypervisor_version > dest_info.hypervisor_version {
            return Err(SchedulerError::DestinationHypervisorTooOld);
        }
        Ok(())
    }

    fn call_livem_checks_on_host(&mut self, dest: &str) -> SchedulerResult<()> {
        self.migrate_data = self
            .collaborators
            .compute
            .check_can_live_migrate_destination(
                self.ctx,
                self.instance,
                dest,
                self.block_migration,
                self.disk_over_commit,
            )
            .map_err(|e| match e {
                CollaboratorError::Invalid(reason) => SchedulerError::MigrationPreCheck(reason),
                other => other.into(),
            })?;
        Ok(())
    }

    fn compute_info(&self, host: &str) -> SchedulerResult<ComputeNodeRecord> {
        Ok(self.collaborators.hosts.compute_node(self.ctx, host)?)
    }

    fn find_destination(&mut self, source: &str) -> SchedulerResult<String> {
        let image = match &self.instance.image_ref {
            Some(image_ref) => Some(self.collaborators.images.show(self.ctx, image_ref)?),
            None => None,
        };
        let request_spec: RequestSpec = utils::build_request_spec(image, std::slice::from_ref(self.instance), None);

        let mut attempted_hosts = vec![source.to_string()];
        loop {
            self.check_not_over_max_retries(&attempted_hosts)?;
            let filter_properties = FilterProperties {
                ignore_hosts: attempted_hosts.clone(),
                ..FilterProperties::default()
            };
            let host = self
                .driver
                .select_destinations(self.ctx, &request_spec, &filter_properties)?
                .into_iter()
                .next()
                .map(|d| d.host)
                .ok_or_else(|| SchedulerError::no_valid_host("no destination returned"))?;

            let checked = self
                .check_compatible_with_source_hypervisor(source, &host)
                .and_then(|()| self.call_livem_checks_on_host(&host));
            match checked {
                Ok(()) => return Ok(host),
                Err(err) if err.is_invalid() => {
                    debug!(%host, error = %err, "skipping invalid live migration destination");
                    attempted_hosts.push(host);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn check_not_over_max_retries(&self, attempted_hosts: &[String]) -> SchedulerResult<()> {
        let Some(max_retries) = self.config.migrate_retry_limit() else {
            return Ok(());
        };
        let retries = attempted_hosts.len().saturating_sub(1);
        if retries > max_retries as usize {
            return Err(SchedulerError::no_valid_host(format!(
                "Exceeded max scheduling retries {max_retries} for instance {} during live migration",
                self.instance.uuid
            )));
        }
        Ok(())
    }
}
