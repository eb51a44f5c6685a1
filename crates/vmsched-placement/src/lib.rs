//! vmsched host selection — filter chain, weighers, retry exclusion.
//!
//! This crate turns a snapshot of compute hosts into an ordered list of
//! destinations for a request. It performs no I/O: callers fetch the
//! snapshot and liveness data, convert them with [`convert`], and hand the
//! result to a [`Pipeline`].
//!
//! # Components
//!
//! - **`host_state`** — Per-call working copy of a host's capacity and usage
//! - **`filters`** — Hard constraints (retry exclusion, capacity, liveness, zone, image)
//! - **`weighers`** — Normalised scoring of surviving hosts
//! - **`pipeline`** — Filter → weigh → pick, repeated once per instance
//! - **`convert`** — Type conversions from state store records

pub mod convert;
pub mod filters;
pub mod host_state;
pub mod pipeline;
pub mod weighers;

pub use convert::{host_state_from_record, host_states_from_records};
pub use filters::{FilterChain, FilterRequest, HostFilter};
pub use host_state::{Capacity, HostState};
pub use pipeline::{Pipeline, PlacementError, PlacementResult};
pub use weighers::{HostWeigher, WeighedHost, WeigherChain};
