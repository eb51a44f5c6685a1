//! vmsched-scheduler — placement orchestration and the rollback contract.
//!
//! The [`SchedulerManager`] receives placement requests, delegates host
//! selection to a [`SchedulerDriver`], and dispatches the follow-on action
//! to compute. Any failure restores the instance's visible state, records
//! a fault, emits a notification, and is returned to the caller unchanged.
//!
//! # Architecture
//!
//! ```text
//! SchedulerManager
//!   ├── SchedulerDriver (BaseScheduler | FilterScheduler)
//!   │     └── Pipeline (vmsched-placement)
//!   ├── LiveMigrationTask (per call)
//!   └── Collaborators
//!         ├── InstanceStore / HostCatalog / ImageService / QuotaEngine (StateStore)
//!         ├── ServiceGroup (HeartbeatServiceGroup)
//!         ├── ComputeRpc (QueuedComputeRpc)
//!         └── Notifier (LogNotifier)
//! ```

pub mod collaborators;
pub mod compute_rpc;
pub mod driver;
pub mod error;
pub mod filter_scheduler;
pub mod legacy;
pub mod live_migrate;
pub mod manager;
pub mod notifier;
pub mod service_group;
pub mod store_impls;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use collaborators::{
    CollabResult, CollaboratorError, Collaborators, ComputeRpc, HostCatalog, ImageService,
    InstanceStore, LiveMigrationRequest, Notifier, PrepResizeRequest, QuotaEngine,
    RequestedNetwork, RunInstanceArgs, RunInstanceRequest, ServiceGroup,
};
pub use compute_rpc::QueuedComputeRpc;
pub use driver::{BaseScheduler, DriverBase, SchedulerDriver};
pub use error::{ErrorKind, RpcError, SchedulerError, SchedulerResult};
pub use filter_scheduler::FilterScheduler;
pub use legacy::{LegacyProxy, SchedulerEndpoint};
pub use live_migrate::LiveMigrationTask;
pub use manager::SchedulerManager;
pub use notifier::LogNotifier;
pub use service_group::HeartbeatServiceGroup;
pub use store_impls::{StoreHostCatalog, store_collaborators};
