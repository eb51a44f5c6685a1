//! Placement pipeline — filter, weigh, pick.
//!
//! Given a host snapshot and a request, the pipeline:
//! 1. Applies the host-manager pre-pass (`ignore_hosts`, `force_hosts`, `force_nodes`)
//! 2. Runs the filter chain over working copies (retry exclusion first)
//! 3. Weighs survivors and picks the best host
//! 4. Charges the pick against its working copy and repeats per instance
//!
//! The pipeline never mutates the request's retry state. Appending the
//! chosen pairs is the caller's job.

use thiserror::Error;
use tracing::{debug, info, warn};
use vmsched_core::{Destination, FilterConfig, FilterProperties, RequestSpec, WeightConfig};

use crate::filters::{FilterChain, FilterRequest};
use crate::host_state::HostState;
use crate::weighers::WeigherChain;

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlacementError {
    #[error("No valid host was found. {reason}")]
    NoValidHost { reason: String },

    #[error("unknown scheduler filter: {0}")]
    UnknownFilter(String),
}

/// A configured filter chain and weigher chain.
pub struct Pipeline {
    filters: FilterChain,
    weighers: WeigherChain,
}

impl Pipeline {
    pub fn new(filters: FilterChain, weighers: WeigherChain) -> Self {
        Self { filters, weighers }
    }

    pub fn from_config(filters: &FilterConfig, weights: &WeightConfig) -> PlacementResult<Self> {
        Ok(Self::new(
            FilterChain::from_config(filters)?,
            WeigherChain::from_config(weights),
        ))
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.names()
    }

    /// Choose one destination per requested instance.
    ///
    /// Returns exactly `spec.instance_count()` destinations or fails with
    /// [`PlacementError::NoValidHost`]. The same host may appear more than
    /// once when its remaining capacity allows.
    pub fn select_destinations(
        &self,
        hosts: &[HostState],
        spec: &RequestSpec,
        props: &FilterProperties,
    ) -> PlacementResult<Vec<Destination>> {
        let count = spec.instance_count() as usize;
        let req = FilterRequest::new(spec, props);
        let mut working = candidate_hosts(hosts, props);
        let forced = props.is_forced();

        let mut selected = Vec::with_capacity(count.min(working.len()));
        for index in 0..count {
            let survivors: Vec<HostState> = working
                .iter()
                .filter_map(|host| {
                    let mut copy = host.clone();
                    copy.limits.clear();
                    let passes = if forced {
                        self.filters.retry_passes(&mut copy, &req)
                    } else {
                        self.filters.host_passes(&mut copy, &req)
                    };
                    passes.then_some(copy)
                })
                .collect();

            debug!(
                instance = index,
                candidates = working.len(),
                survivors = survivors.len(),
                "filtered hosts"
            );

            let Some(best) = self.weighers.weigh(survivors, &req).into_iter().next() else {
                warn!(placed = index, requested = count, "insufficient hosts for request");
                return Err(PlacementError::NoValidHost {
                    reason: format!("Found {index} of {count} requested hosts."),
                });
            };

            debug!(
                host = %best.host.host,
                node = %best.host.nodename,
                weight = best.weight,
                "selected host"
            );

            if let Some(slot) = working
                .iter_mut()
                .find(|h| h.matches(&best.host.host, &best.host.nodename))
            {
                slot.consume(&req.resources);
            }
            selected.push(Destination {
                host: best.host.host,
                nodename: best.host.nodename,
                limits: best.host.limits,
            });
        }

        info!(requested = count, "placement complete");
        Ok(selected)
    }
}

/// Host-manager pre-pass over the snapshot.
///
/// Ignored hosts are dropped. When hosts or nodes are forced, only those
/// remain; unknown forced names leave an empty candidate set.
fn candidate_hosts(hosts: &[HostState], props: &FilterProperties) -> Vec<HostState> {
    hosts
        .iter()
        .filter(|h| !props.ignore_hosts.iter().any(|i| i == &h.host))
        .filter(|h| props.force_hosts.is_empty() || props.force_hosts.iter().any(|f| f == &h.host))
        .filter(|h| {
            props.force_nodes.is_empty() || props.force_nodes.iter().any(|f| f == &h.nodename)
        })
        .cloned()
        .collect()
}
