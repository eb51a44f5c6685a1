//! Compute dispatch through a per-host command queue.
//!
//! Each follow-on action is persisted as a [`ComputeCommand`] keyed by the
//! target host. Compute agents poll their queue and execute commands in
//! order. Destination pre-checks are answered from the host snapshot.

use serde::Serialize;
use tracing::info;
use vmsched_core::RequestContext;
use vmsched_state::{ComputeCommand, ComputeCommandKind, InstanceRecord, StateStore, store::epoch_secs};

use crate::collaborators::{
    CollabResult, CollaboratorError, ComputeRpc, LiveMigrationRequest, PrepResizeRequest,
    RunInstanceRequest,
};

#[derive(Clone)]
pub struct QueuedComputeRpc {
    store: StateStore,
}

impl QueuedComputeRpc {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    fn enqueue<T: Serialize>(
        &self,
        host: &str,
        node: Option<&str>,
        kind: ComputeCommandKind,
        instance_uuid: &str,
        payload: &T,
    ) -> CollabResult<()> {
        let payload =
            serde_json::to_value(payload).map_err(|e| CollaboratorError::Failed(format!("serialize payload: {e}")))?;
        self.store.enqueue_command(&ComputeCommand {
            host: host.to_string(),
            node: node.map(str::to_string),
            kind,
            instance_uuid: instance_uuid.to_string(),
            payload,
            created_at: epoch_secs(),
        })?;
        info!(%host, ?kind, %instance_uuid, "compute command queued");
        Ok(())
    }
}

impl ComputeRpc for QueuedComputeRpc {
    fn run_instance(&self, _ctx: &RequestContext, host: &str, req: &RunInstanceRequest) -> CollabResult<()> {
        self.enqueue(
            host,
            Some(&req.node),
            ComputeCommandKind::RunInstance,
            &req.instance.uuid,
            req,
        )
    }

    fn prep_resize(&self, _ctx: &RequestContext, host: &str, req: &PrepResizeRequest) -> CollabResult<()> {
        self.enqueue(
            host,
            Some(&req.node),
            ComputeCommandKind::PrepResize,
            &req.instance.uuid,
            req,
        )
    }

    fn check_can_live_migrate_destination(
        &self,
        _ctx: &RequestContext,
        instance: &InstanceRecord,
        destination: &str,
        block_migration: bool,
        disk_over_commit: bool,
    ) -> CollabResult<serde_json::Value> {
        let node = self
            .store
            .list_compute_nodes_by_host(destination)?
            .into_iter()
            .next()
            .ok_or_else(|| CollaboratorError::NotFound(format!("compute host {destination}")))?;

        let disk_needed = instance.root_gb + instance.ephemeral_gb;
        let disk_free = node.local_gb.saturating_sub(node.local_gb_used);
        if block_migration && !disk_over_commit && disk_free < disk_needed {
            return Err(CollaboratorError::Invalid(format!(
                "Unable to migrate {}: disk of instance is too large \
                 (available on destination host: {disk_free} GB < need: {disk_needed} GB)",
                instance.uuid
            )));
        }

        Ok(serde_json::json!({
            "block_migration": block_migration,
            "disk_over_commit": disk_over_commit,
            "disk_available_gb": disk_free,
        }))
    }

    fn live_migration(&self, _ctx: &RequestContext, req: &LiveMigrationRequest) -> CollabResult<()> {
        // The source host drives the migration.
        self.enqueue(
            &req.source,
            None,
            ComputeCommandKind::LiveMigration,
            &req.instance.uuid,
            req,
        )
    }
}
