//! redb table definitions for the vmsched state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Instance records keyed by `{uuid}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Compute node records keyed by `{host}:{hypervisor_hostname}`.
pub const COMPUTE_NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("compute_nodes");

/// Service records keyed by `{topic}/{host}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Instance faults keyed by `{instance_uuid}:{seq}`; append-only.
pub const FAULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("instance_faults");

/// Image metadata keyed by `{image_id}`.
pub const IMAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("images");

/// Quota reservations keyed by `{reservation_id}`.
pub const RESERVATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("reservations");

/// Compute commands keyed by `{host}:{seq}`.
pub const COMPUTE_COMMANDS: TableDefinition<&str, &[u8]> = TableDefinition::new("compute_commands");
