//! vmsched-api — REST API for the vmsched scheduler.
//!
//! Exposes the scheduler manager's operations as JSON endpoints, the
//! positional legacy convention under `/v3`, and the ingest endpoints
//! compute agents use to publish their snapshot.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/v1/scheduler/run_instance` | Place and launch instances |
//! | POST | `/v1/scheduler/select_destinations` | Choose destinations |
//! | POST | `/v1/scheduler/select_hosts` | Choose destinations (expected errors) |
//! | POST | `/v1/scheduler/prep_resize` | Choose a resize destination |
//! | POST | `/v1/scheduler/live_migration` | Live-migrate an instance |
//! | GET | `/v1/scheduler/hosts/{host}/resources` | Per-project usage on a host |
//! | POST | `/v3/scheduler/{method}` | Positional legacy call |
//! | GET/PUT | `/v1/compute-nodes` | List / upsert compute nodes |
//! | GET/PUT | `/v1/services` | List / upsert services |
//! | POST | `/v1/services/{topic}/{host}/heartbeat` | Record a heartbeat |
//! | GET/PUT | `/v1/instances` | List / upsert instances |
//! | GET | `/v1/instances/{uuid}` | Get an instance |
//! | GET | `/v1/instances/{uuid}/faults` | Fault audit trail |
//! | PUT | `/v1/images` | Upsert image metadata |
//! | GET | `/v1/images/{id}` | Get image metadata |
//! | GET | `/v1/compute/{host}/commands` | Commands queued for a host |

pub mod handlers;
pub mod ingest;
pub mod response;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use vmsched_scheduler::{LegacyProxy, SchedulerManager};
use vmsched_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub manager: Arc<SchedulerManager>,
    pub legacy: Arc<LegacyProxy<Arc<SchedulerManager>>>,
}

impl ApiState {
    pub fn new(store: StateStore, manager: SchedulerManager) -> Self {
        let manager = Arc::new(manager);
        Self {
            store,
            legacy: Arc::new(LegacyProxy::new(manager.clone())),
            manager,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let scheduler_routes = Router::new()
        .route("/run_instance", post(handlers::run_instance))
        .route("/select_destinations", post(handlers::select_destinations))
        .route("/select_hosts", post(handlers::select_hosts))
        .route("/prep_resize", post(handlers::prep_resize))
        .route("/live_migration", post(handlers::live_migration))
        .route("/hosts/{host}/resources", get(handlers::show_host_resources));

    let v1 = Router::new()
        .nest("/scheduler", scheduler_routes)
        .route("/compute-nodes", get(ingest::list_compute_nodes).put(ingest::put_compute_node))
        .route("/services", get(ingest::list_services).put(ingest::put_service))
        .route("/services/{topic}/{host}/heartbeat", post(ingest::heartbeat))
        .route("/instances", get(ingest::list_instances).put(ingest::put_instance))
        .route("/instances/{uuid}", get(ingest::get_instance))
        .route("/instances/{uuid}/faults", get(ingest::list_faults))
        .route("/images", put(ingest::put_image))
        .route("/images/{id}", get(ingest::get_image))
        .route("/compute/{host}/commands", get(ingest::list_commands));

    Router::new()
        .nest("/v1", v1)
        .route("/v3/scheduler/{method}", post(handlers::legacy_call))
        .with_state(state)
}
