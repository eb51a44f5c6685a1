//! Router-level tests.
//!
//! Drives the full axum router: snapshot ingest, placement, dispatch to
//! the compute queue, rollback on failure and the legacy positional route.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use vmsched_api::{ApiState, build_router};
use vmsched_core::SchedulerConfig;
use vmsched_scheduler::{SchedulerManager, store_collaborators};
use vmsched_state::store::epoch_secs;
use vmsched_state::{ComputeNodeRecord, InstanceRecord, ServiceRecord, StateStore};

fn test_router() -> (StateStore, Router) {
    let store = StateStore::open_in_memory().unwrap();
    let config = SchedulerConfig::default();
    let manager = SchedulerManager::new(config.clone(), store_collaborators(&store, &config)).unwrap();
    let router = build_router(ApiState::new(store.clone(), manager));
    (store, router)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-user-id", "admin")
        .header("x-project-id", "admin")
        .header("x-request-id", "req-1")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register_host(router: &Router, host: &str, memory_mb: u64) {
    let node = ComputeNodeRecord {
        host: host.to_string(),
        hypervisor_hostname: format!("{host}.local"),
        vcpus: 8,
        memory_mb,
        local_gb: 100,
        hypervisor_type: "QEMU".into(),
        hypervisor_version: 6_002_000,
        ..ComputeNodeRecord::default()
    };
    let resp = router
        .clone()
        .oneshot(json_request("PUT", "/v1/compute-nodes", serde_json::to_value(&node).unwrap()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let service = ServiceRecord {
        host: host.to_string(),
        binary: "vmsched-compute".into(),
        topic: "compute".into(),
        last_heartbeat: epoch_secs(),
        ..ServiceRecord::default()
    };
    let resp = router
        .clone()
        .oneshot(json_request("PUT", "/v1/services", serde_json::to_value(&service).unwrap()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

fn request_spec(uuid: &str, memory_mb: u64) -> Value {
    json!({
        "instance_properties": {
            "uuid": uuid,
            "project_id": "p1",
            "vcpus": 1,
            "memory_mb": memory_mb,
            "root_gb": 1
        },
        "instance_uuids": [uuid]
    })
}

#[tokio::test]
async fn run_instance_queues_command_for_chosen_host() {
    let (store, router) = test_router();
    register_host(&router, "c1", 4096).await;
    store
        .put_instance(&InstanceRecord {
            uuid: "u1".into(),
            project_id: "p1".into(),
            vcpus: 1,
            memory_mb: 512,
            root_gb: 1,
            ..InstanceRecord::default()
        })
        .unwrap();

    let resp = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/scheduler/run_instance",
            json!({ "request_spec": request_spec("u1", 512), "is_first_time": true }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["filter_properties"]["retry"]["num_attempts"], 1);

    let resp = router
        .oneshot(json_request("GET", "/v1/compute/c1/commands", Value::Null))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["data"][0]["kind"], "run_instance");
    assert_eq!(body["data"][0]["instance_uuid"], "u1");
    assert_eq!(body["data"][0]["payload"]["args"]["is_first_time"], true);

    let instance = store.get_instance("u1").unwrap().unwrap();
    assert_eq!(instance.host.as_deref(), Some("c1"));
}

#[tokio::test]
async fn no_valid_host_is_conflict_and_rolled_back() {
    let (store, router) = test_router();
    register_host(&router, "c1", 1024).await;
    store
        .put_instance(&InstanceRecord {
            uuid: "u1".into(),
            project_id: "p1".into(),
            ..InstanceRecord::default()
        })
        .unwrap();

    let resp = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/scheduler/run_instance",
            json!({ "request_spec": request_spec("u1", 65536) }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "NoValidHost");

    let resp = router
        .oneshot(json_request("GET", "/v1/instances/u1/faults", Value::Null))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["exception_type"], "NoValidHost");
}

#[tokio::test]
async fn select_hosts_failure_is_expected() {
    let (_store, router) = test_router();
    let resp = router
        .oneshot(json_request(
            "POST",
            "/v1/scheduler/select_hosts",
            json!({ "request_spec": request_spec("u1", 512) }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn legacy_select_destinations() {
    let (_store, router) = test_router();
    register_host(&router, "c1", 4096).await;

    let resp = router
        .oneshot(json_request(
            "POST",
            "/v3/scheduler/select_destinations",
            json!([request_spec("u1", 512), {}]),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"][0]["host"], "c1");
    assert_eq!(body["data"][0]["nodename"], "c1.local");
}

#[tokio::test]
async fn legacy_unknown_method_is_bad_request() {
    let (_store, router) = test_router();
    let resp = router
        .oneshot(json_request("POST", "/v3/scheduler/rebuild", json!([])))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn host_resources_report() {
    let (store, router) = test_router();
    register_host(&router, "c1", 4096).await;
    for (uuid, project, vcpus) in [("a", "p1", 1), ("b", "p1", 2), ("c", "p2", 2)] {
        store
            .put_instance(&InstanceRecord {
                uuid: uuid.into(),
                project_id: project.into(),
                host: Some("c1".into()),
                vcpus,
                memory_mb: 256,
                root_gb: 10,
                ..InstanceRecord::default()
            })
            .unwrap();
    }

    let resp = router
        .oneshot(json_request("GET", "/v1/scheduler/hosts/c1/resources", Value::Null))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"]["usage"]["p1"]["vcpus"], 3);
    assert_eq!(body["data"]["usage"]["p1"]["memory_mb"], 512);
    assert_eq!(body["data"]["usage"]["p2"]["root_gb"], 10);
    assert_eq!(body["data"]["resource"]["memory_mb"], 4096);
}

#[tokio::test]
async fn live_migration_to_self_is_bad_request() {
    let (store, router) = test_router();
    register_host(&router, "c1", 4096).await;
    store
        .put_instance(&InstanceRecord {
            uuid: "u1".into(),
            project_id: "p1".into(),
            host: Some("c1".into()),
            power_state: vmsched_core::PowerState::Running,
            memory_mb: 512,
            ..InstanceRecord::default()
        })
        .unwrap();

    let resp = router
        .oneshot(json_request(
            "POST",
            "/v1/scheduler/live_migration",
            json!({ "instance_uuid": "u1", "destination": "c1" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["kind"], "UnableToMigrateToSelf");
}
