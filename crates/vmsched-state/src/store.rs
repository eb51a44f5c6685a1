//! StateStore — redb-backed state persistence for vmsched.
//!
//! Provides typed CRUD operations over instances, compute nodes, services,
//! faults, images, reservations, and compute commands. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [
            INSTANCES,
            COMPUTE_NODES,
            SERVICES,
            FAULTS,
            IMAGES,
            RESERVATIONS,
            COMPUTE_COMMANDS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All values whose key starts with `prefix`, in key order.
    fn scan<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            }
        }
        Ok(results)
    }

    fn remove(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Append `value` under `{prefix}{seq}` where `seq` counts existing entries.
    ///
    /// Counting and insertion share one write transaction, so concurrent
    /// appends under the same prefix never collide.
    fn append<T: Serialize>(&self, table: Table, prefix: &str, value: &T) -> StateResult<String> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let key;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let mut seq = 0u64;
            for entry in t.iter().map_err(map_err!(Read))? {
                let (k, _) = entry.map_err(map_err!(Read))?;
                if k.value().starts_with(prefix) {
                    seq += 1;
                }
            }
            key = format!("{prefix}{seq:010}");
            t.insert(key.as_str(), bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(key)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update an instance record.
    pub fn put_instance(&self, instance: &InstanceRecord) -> StateResult<()> {
        self.put(INSTANCES, &instance.uuid, instance)?;
        debug!(uuid = %instance.uuid, "instance stored");
        Ok(())
    }

    pub fn get_instance(&self, uuid: &str) -> StateResult<Option<InstanceRecord>> {
        self.get(INSTANCES, uuid)
    }

    pub fn list_instances(&self) -> StateResult<Vec<InstanceRecord>> {
        self.scan(INSTANCES, "")
    }

    /// List all instances currently assigned to `host`.
    pub fn list_instances_by_host(&self, host: &str) -> StateResult<Vec<InstanceRecord>> {
        Ok(self
            .list_instances()?
            .into_iter()
            .filter(|i| i.host.as_deref() == Some(host))
            .collect())
    }

    /// Delete an instance by uuid. Returns true if it existed.
    pub fn delete_instance(&self, uuid: &str) -> StateResult<bool> {
        self.remove(INSTANCES, uuid)
    }

    /// Apply `update` atomically and return the record before and after.
    ///
    /// Fails with [`StateError::UnexpectedTaskState`] without writing when
    /// the update carries an `expected_task_state` the stored record does
    /// not match.
    pub fn update_instance_and_get_original(
        &self,
        uuid: &str,
        update: &InstanceUpdate,
    ) -> StateResult<(InstanceRecord, InstanceRecord)> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (old, new) = {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let old: InstanceRecord = match table.get(uuid).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("instance {uuid}"))),
            };

            if let Some(expected) = update.expected_task_state {
                if old.task_state != Some(expected) {
                    return Err(StateError::UnexpectedTaskState {
                        uuid: uuid.to_string(),
                        expected,
                        actual: old.task_state,
                    });
                }
            }

            let mut new = old.clone();
            update.apply(&mut new, epoch_secs());
            let bytes = serde_json::to_vec(&new).map_err(map_err!(Serialize))?;
            table.insert(uuid, bytes.as_slice()).map_err(map_err!(Write))?;
            (old, new)
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%uuid, vm_state = ?new.vm_state, task_state = ?new.task_state, "instance updated");
        Ok((old, new))
    }

    // ── Compute nodes ──────────────────────────────────────────────

    pub fn put_compute_node(&self, node: &ComputeNodeRecord) -> StateResult<()> {
        self.put(COMPUTE_NODES, &node.table_key(), node)
    }

    pub fn list_compute_nodes(&self) -> StateResult<Vec<ComputeNodeRecord>> {
        self.scan(COMPUTE_NODES, "")
    }

    /// All hypervisor nodes managed by `host`.
    pub fn list_compute_nodes_by_host(&self, host: &str) -> StateResult<Vec<ComputeNodeRecord>> {
        self.scan(COMPUTE_NODES, &format!("{host}:"))
    }

    pub fn delete_compute_node(&self, host: &str, node: &str) -> StateResult<bool> {
        self.remove(COMPUTE_NODES, &format!("{host}:{node}"))
    }

    // ── Services ───────────────────────────────────────────────────

    pub fn put_service(&self, service: &ServiceRecord) -> StateResult<()> {
        self.put(SERVICES, &service.table_key(), service)
    }

    pub fn get_service(&self, topic: &str, host: &str) -> StateResult<Option<ServiceRecord>> {
        self.get(SERVICES, &format!("{topic}/{host}"))
    }

    pub fn list_services_by_topic(&self, topic: &str) -> StateResult<Vec<ServiceRecord>> {
        self.scan(SERVICES, &format!("{topic}/"))
    }

    /// Refresh a service's heartbeat. Returns false for unknown services.
    pub fn touch_service(&self, topic: &str, host: &str, at: u64) -> StateResult<bool> {
        match self.get_service(topic, host)? {
            Some(mut service) => {
                service.last_heartbeat = at;
                self.put_service(&service)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ── Faults ─────────────────────────────────────────────────────

    /// Append a fault record for an instance.
    pub fn add_instance_fault(&self, fault: &InstanceFault) -> StateResult<()> {
        let key = self.append(FAULTS, &format!("{}:", fault.instance_uuid), fault)?;
        debug!(%key, code = fault.code, "instance fault recorded");
        Ok(())
    }

    /// Faults for an instance, oldest first.
    pub fn list_instance_faults(&self, uuid: &str) -> StateResult<Vec<InstanceFault>> {
        self.scan(FAULTS, &format!("{uuid}:"))
    }

    // ── Images ─────────────────────────────────────────────────────

    pub fn put_image(&self, image: &ImageRecord) -> StateResult<()> {
        self.put(IMAGES, &image.id, image)
    }

    pub fn get_image(&self, image_id: &str) -> StateResult<Option<ImageRecord>> {
        self.get(IMAGES, image_id)
    }

    // ── Reservations ───────────────────────────────────────────────

    pub fn put_reservation(&self, reservation: &Reservation) -> StateResult<()> {
        self.put(RESERVATIONS, &reservation.id, reservation)
    }

    pub fn list_reservations(&self) -> StateResult<Vec<Reservation>> {
        self.scan(RESERVATIONS, "")
    }

    /// Drop the given reservations. Returns how many existed.
    pub fn delete_reservations(&self, ids: &[String]) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut count = 0;
        {
            let mut table = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
            for id in ids {
                if table.remove(id.as_str()).map_err(map_err!(Write))?.is_some() {
                    count += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    /// Drop every reservation whose `expire_at` is at or before `now`.
    pub fn expire_reservations(&self, now: u64) -> StateResult<u32> {
        let stale: Vec<String> = self
            .list_reservations()?
            .into_iter()
            .filter(|r| r.expire_at <= now)
            .map(|r| r.id)
            .collect();
        self.delete_reservations(&stale)
    }

    // ── Compute commands ───────────────────────────────────────────

    /// Queue a command for a compute host.
    pub fn enqueue_command(&self, command: &ComputeCommand) -> StateResult<()> {
        let key = self.append(COMPUTE_COMMANDS, &format!("{}:", command.host), command)?;
        debug!(%key, kind = ?command.kind, "compute command queued");
        Ok(())
    }

    /// Commands queued for `host`, oldest first.
    pub fn list_commands_for_host(&self, host: &str) -> StateResult<Vec<ComputeCommand>> {
        self.scan(COMPUTE_COMMANDS, &format!("{host}:"))
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmsched_core::{TaskState, VmState};

    fn test_instance(uuid: &str, host: &str, project: &str) -> InstanceRecord {
        InstanceRecord {
            uuid: uuid.to_string(),
            project_id: project.to_string(),
            host: Some(host.to_string()),
            node: Some(format!("{host}-node")),
            vm_state: Some(VmState::Active),
            vcpus: 1,
            memory_mb: 512,
            root_gb: 10,
            ..InstanceRecord::default()
        }
    }

    fn test_compute_node(host: &str, node: &str) -> ComputeNodeRecord {
        ComputeNodeRecord {
            host: host.to_string(),
            hypervisor_hostname: node.to_string(),
            vcpus: 8,
            memory_mb: 16384,
            local_gb: 500,
            hypervisor_type: "QEMU".to_string(),
            hypervisor_version: 2_000_000,
            ..ComputeNodeRecord::default()
        }
    }

    fn test_fault(uuid: &str, message: &str) -> InstanceFault {
        InstanceFault {
            instance_uuid: uuid.to_string(),
            code: 500,
            exception_type: "NoValidHost".to_string(),
            message: message.to_string(),
            details: String::new(),
            host: None,
            created_at: 1000,
        }
    }

    // ── Instances ──────────────────────────────────────────────────

    #[test]
    fn instance_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let inst = test_instance("uuid-1", "host1", "p1");

        store.put_instance(&inst).unwrap();
        assert_eq!(store.get_instance("uuid-1").unwrap(), Some(inst));
        assert!(store.get_instance("nope").unwrap().is_none());
    }

    #[test]
    fn instances_filtered_by_host() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("a", "host1", "p1")).unwrap();
        store.put_instance(&test_instance("b", "host1", "p2")).unwrap();
        store.put_instance(&test_instance("c", "host2", "p1")).unwrap();

        assert_eq!(store.list_instances_by_host("host1").unwrap().len(), 2);
        assert_eq!(store.list_instances_by_host("host2").unwrap().len(), 1);
        assert!(store.list_instances_by_host("host3").unwrap().is_empty());
    }

    #[test]
    fn update_returns_old_and_new() {
        let store = StateStore::open_in_memory().unwrap();
        let mut inst = test_instance("uuid-1", "host1", "p1");
        inst.task_state = Some(TaskState::ResizePrep);
        store.put_instance(&inst).unwrap();

        let update = InstanceUpdate::vm_state(VmState::Error).clear_task_state();
        let (old, new) = store.update_instance_and_get_original("uuid-1", &update).unwrap();

        assert_eq!(old.vm_state, Some(VmState::Active));
        assert_eq!(old.task_state, Some(TaskState::ResizePrep));
        assert_eq!(new.vm_state, Some(VmState::Error));
        assert_eq!(new.task_state, None);
        assert_eq!(store.get_instance("uuid-1").unwrap(), Some(new));
    }

    #[test]
    fn update_enforces_expected_task_state() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("uuid-1", "host1", "p1")).unwrap();

        let update = InstanceUpdate::vm_state(VmState::Active)
            .clear_task_state()
            .expect_task_state(TaskState::Migrating);
        let err = store.update_instance_and_get_original("uuid-1", &update).unwrap_err();
        assert!(matches!(
            err,
            StateError::UnexpectedTaskState { expected: TaskState::Migrating, actual: None, .. }
        ));

        // Nothing was written.
        let stored = store.get_instance("uuid-1").unwrap().unwrap();
        assert_eq!(stored.updated_at, 0);
    }

    #[test]
    fn update_missing_instance_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .update_instance_and_get_original("ghost", &InstanceUpdate::vm_state(VmState::Error))
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn placement_update_sets_host_and_node() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&InstanceRecord {
            uuid: "uuid-1".to_string(),
            ..InstanceRecord::default()
        })
        .unwrap();

        let (_, new) = store
            .update_instance_and_get_original("uuid-1", &InstanceUpdate::placed_on("h", "n", 42))
            .unwrap();
        assert_eq!(new.host.as_deref(), Some("h"));
        assert_eq!(new.node.as_deref(), Some("n"));
        assert_eq!(new.scheduled_at, Some(42));
    }

    // ── Compute nodes & services ───────────────────────────────────

    #[test]
    fn compute_nodes_by_host_prefix() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_compute_node(&test_compute_node("host1", "n1")).unwrap();
        store.put_compute_node(&test_compute_node("host1", "n2")).unwrap();
        store.put_compute_node(&test_compute_node("host10", "n1")).unwrap();

        assert_eq!(store.list_compute_nodes_by_host("host1").unwrap().len(), 2);
        assert_eq!(store.list_compute_nodes().unwrap().len(), 3);
        assert!(store.delete_compute_node("host1", "n2").unwrap());
        assert_eq!(store.list_compute_nodes_by_host("host1").unwrap().len(), 1);
    }

    #[test]
    fn services_by_topic_and_heartbeat() {
        let store = StateStore::open_in_memory().unwrap();
        for host in ["host1", "host2"] {
            store
                .put_service(&ServiceRecord {
                    host: host.to_string(),
                    binary: "vmsched-compute".to_string(),
                    topic: "compute".to_string(),
                    last_heartbeat: 100,
                    ..ServiceRecord::default()
                })
                .unwrap();
        }

        assert_eq!(store.list_services_by_topic("compute").unwrap().len(), 2);
        assert!(store.list_services_by_topic("scheduler").unwrap().is_empty());

        assert!(store.touch_service("compute", "host1", 200).unwrap());
        assert!(!store.touch_service("compute", "ghost", 200).unwrap());
        let svc = store.get_service("compute", "host1").unwrap().unwrap();
        assert_eq!(svc.last_heartbeat, 200);
    }

    // ── Faults ─────────────────────────────────────────────────────

    #[test]
    fn faults_are_appended_in_order() {
        let store = StateStore::open_in_memory().unwrap();
        store.add_instance_fault(&test_fault("uuid-1", "first")).unwrap();
        store.add_instance_fault(&test_fault("uuid-1", "second")).unwrap();
        store.add_instance_fault(&test_fault("uuid-2", "other")).unwrap();

        let faults = store.list_instance_faults("uuid-1").unwrap();
        assert_eq!(faults.len(), 2);
        assert_eq!(faults[0].message, "first");
        assert_eq!(faults[1].message, "second");
    }

    // ── Reservations ───────────────────────────────────────────────

    #[test]
    fn reservations_expire_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        for (id, expire_at) in [("r1", 100), ("r2", 200), ("r3", 300)] {
            store
                .put_reservation(&Reservation {
                    id: id.to_string(),
                    project_id: "p1".to_string(),
                    resource: "cores".to_string(),
                    delta: 2,
                    expire_at,
                })
                .unwrap();
        }

        assert_eq!(store.expire_reservations(200).unwrap(), 2);
        assert_eq!(store.delete_reservations(&["r3".to_string(), "r1".to_string()]).unwrap(), 1);
        assert!(store.list_reservations().unwrap().is_empty());
    }

    // ── Compute commands ───────────────────────────────────────────

    #[test]
    fn commands_are_scoped_per_host() {
        let store = StateStore::open_in_memory().unwrap();
        for (host, uuid) in [("host1", "a"), ("host2", "b"), ("host1", "c")] {
            store
                .enqueue_command(&ComputeCommand {
                    host: host.to_string(),
                    node: None,
                    kind: ComputeCommandKind::RunInstance,
                    instance_uuid: uuid.to_string(),
                    payload: serde_json::json!({}),
                    created_at: 1,
                })
                .unwrap();
        }

        let cmds = store.list_commands_for_host("host1").unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].instance_uuid, "a");
        assert_eq!(cmds[1].instance_uuid, "c");
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_instance(&test_instance("uuid-1", "host1", "p1")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let inst = store.get_instance("uuid-1").unwrap();
        assert_eq!(inst.unwrap().project_id, "p1");
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_instances().unwrap().is_empty());
        assert!(store.list_compute_nodes().unwrap().is_empty());
        assert!(store.list_instance_faults("any").unwrap().is_empty());
        assert!(store.get_image("any").unwrap().is_none());
        assert!(!store.delete_instance("nope").unwrap());
        assert_eq!(store.expire_reservations(u64::MAX).unwrap(), 0);
    }
}
