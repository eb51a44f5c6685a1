//! vmsched-state — embedded state store for vmsched.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for instances, compute nodes, services, instance faults, images,
//! quota reservations, and compute commands awaiting pickup.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{host}:{node}`, `{topic}/{host}`, `{uuid}:{seq}`) enable
//! prefix scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across request handlers and background tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
