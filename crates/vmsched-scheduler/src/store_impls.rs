//! Collaborator implementations backed by the embedded [`StateStore`].

use std::sync::Arc;
use std::time::Duration;

use vmsched_core::{ImageMeta, RequestContext, SchedulerConfig};
use vmsched_state::{
    ComputeNodeRecord, InstanceFault, InstanceRecord, InstanceUpdate, ServiceRecord, StateStore,
    store::epoch_secs,
};

use crate::collaborators::{
    CollabResult, CollaboratorError, Collaborators, HostCatalog, ImageService, InstanceStore,
    QuotaEngine,
};
use crate::compute_rpc::QueuedComputeRpc;
use crate::notifier::LogNotifier;
use crate::service_group::HeartbeatServiceGroup;

/// Wire every collaborator to `store`: heartbeat liveness, queued compute
/// dispatch and log notifications.
pub fn store_collaborators(store: &StateStore, config: &SchedulerConfig) -> Collaborators {
    let down_time = Duration::from_secs(config.service_down_time_secs);
    Collaborators {
        instances: Arc::new(store.clone()),
        hosts: Arc::new(StoreHostCatalog::new(store.clone(), config.compute_topic.clone())),
        servicegroup: Arc::new(HeartbeatServiceGroup::new(down_time)),
        compute: Arc::new(QueuedComputeRpc::new(store.clone())),
        images: Arc::new(store.clone()),
        notifier: Arc::new(LogNotifier::new(config.service_name.clone())),
        quotas: Arc::new(store.clone()),
    }
}

/// Host snapshot read from the store's services and compute nodes.
///
/// Per-host service lookups use the compute topic given at construction.
#[derive(Clone)]
pub struct StoreHostCatalog {
    store: StateStore,
    compute_topic: String,
}

impl StoreHostCatalog {
    pub fn new(store: StateStore, compute_topic: impl Into<String>) -> Self {
        Self {
            store,
            compute_topic: compute_topic.into(),
        }
    }
}

impl HostCatalog for StoreHostCatalog {
    fn services_by_topic(&self, _ctx: &RequestContext, topic: &str) -> CollabResult<Vec<ServiceRecord>> {
        Ok(self.store.list_services_by_topic(topic)?)
    }

    fn compute_service(&self, _ctx: &RequestContext, host: &str) -> CollabResult<ServiceRecord> {
        self.store
            .get_service(&self.compute_topic, host)?
            .ok_or_else(|| CollaboratorError::NotFound(format!("compute host {host}")))
    }

    fn compute_nodes(&self, _ctx: &RequestContext) -> CollabResult<Vec<ComputeNodeRecord>> {
        Ok(self.store.list_compute_nodes()?)
    }

    fn compute_node(&self, _ctx: &RequestContext, host: &str) -> CollabResult<ComputeNodeRecord> {
        self.store
            .list_compute_nodes_by_host(host)?
            .into_iter()
            .next()
            .ok_or_else(|| CollaboratorError::NotFound(format!("compute host {host}")))
    }
}

impl InstanceStore for StateStore {
    fn update_instance_and_get_original(
        &self,
        _ctx: &RequestContext,
        uuid: &str,
        update: &InstanceUpdate,
    ) -> CollabResult<(InstanceRecord, InstanceRecord)> {
        Ok(StateStore::update_instance_and_get_original(self, uuid, update)?)
    }

    fn create_instance_fault(&self, _ctx: &RequestContext, fault: &InstanceFault) -> CollabResult<()> {
        Ok(self.add_instance_fault(fault)?)
    }

    fn instances_by_host(&self, _ctx: &RequestContext, host: &str) -> CollabResult<Vec<InstanceRecord>> {
        Ok(self.list_instances_by_host(host)?)
    }
}

impl ImageService for StateStore {
    fn show(&self, _ctx: &RequestContext, image_id: &str) -> CollabResult<ImageMeta> {
        self.get_image(image_id)?
            .ok_or_else(|| CollaboratorError::NotFound(format!("image {image_id}")))
    }
}

impl QuotaEngine for StateStore {
    fn rollback(&self, _ctx: &RequestContext, reservations: &[String]) -> CollabResult<()> {
        self.delete_reservations(reservations)?;
        Ok(())
    }

    fn expire(&self, _ctx: &RequestContext) -> CollabResult<u32> {
        Ok(self.expire_reservations(epoch_secs())?)
    }
}
