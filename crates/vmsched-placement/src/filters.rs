//! Hard constraints over `(host, request)`.
//!
//! A host survives only if every filter in the chain accepts it. Filters
//! may record per-host ceilings in the working copy's `limits`; those are
//! carried to the compute host with the chosen destination.

use tracing::debug;
use vmsched_core::{FilterConfig, FilterProperties, RequestSpec, ResourceShape};

use crate::host_state::HostState;
use crate::pipeline::{PlacementError, PlacementResult};

/// What a filter sees about the request being placed.
#[derive(Debug, Clone, Copy)]
pub struct FilterRequest<'a> {
    pub spec: &'a RequestSpec,
    pub props: &'a FilterProperties,
    pub resources: ResourceShape,
}

impl<'a> FilterRequest<'a> {
    pub fn new(spec: &'a RequestSpec, props: &'a FilterProperties) -> Self {
        Self {
            spec,
            props,
            resources: spec.resources(),
        }
    }
}

/// A hard constraint predicate.
pub trait HostFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `host` can take one more instance of the request.
    fn host_passes(&self, host: &mut HostState, req: &FilterRequest<'_>) -> bool;
}

// ── Filters ───────────────────────────────────────────────────────

/// Rejects `(host, node)` pairs already attempted in this operation.
pub struct RetryFilter;

impl HostFilter for RetryFilter {
    fn name(&self) -> &'static str {
        "RetryFilter"
    }

    fn host_passes(&self, host: &mut HostState, req: &FilterRequest<'_>) -> bool {
        let Some(retry) = &req.props.retry else {
            return true;
        };
        let passes = !retry.contains(&host.host, &host.nodename);
        if !passes {
            debug!(host = %host.host, node = %host.nodename, "host already attempted");
        }
        passes
    }
}

/// Rejects hosts whose compute service is down or disabled.
pub struct ComputeFilter;

impl HostFilter for ComputeFilter {
    fn name(&self) -> &'static str {
        "ComputeFilter"
    }

    fn host_passes(&self, host: &mut HostState, _req: &FilterRequest<'_>) -> bool {
        host.service_up && !host.service_disabled
    }
}

pub struct RamFilter {
    pub allocation_ratio: f64,
}

impl HostFilter for RamFilter {
    fn name(&self) -> &'static str {
        "RamFilter"
    }

    fn host_passes(&self, host: &mut HostState, req: &FilterRequest<'_>) -> bool {
        let total = host.total.memory_mb as f64;
        let limit = total * self.allocation_ratio;
        let used = total - host.free_ram_mb() as f64;
        let usable = limit - used;
        if usable < req.resources.memory_mb as f64 {
            debug!(host = %host.host, usable, requested = req.resources.memory_mb, "insufficient ram");
            return false;
        }
        host.limits.insert("memory_mb".to_string(), limit);
        true
    }
}

pub struct CoreFilter {
    pub allocation_ratio: f64,
}

impl HostFilter for CoreFilter {
    fn name(&self) -> &'static str {
        "CoreFilter"
    }

    fn host_passes(&self, host: &mut HostState, req: &FilterRequest<'_>) -> bool {
        // Hosts that do not report vcpus are not constrained.
        if host.total.vcpus == 0 {
            return true;
        }
        let limit = f64::from(host.total.vcpus) * self.allocation_ratio;
        let usable = limit - f64::from(host.used.vcpus);
        if usable < f64::from(req.resources.vcpus) {
            debug!(host = %host.host, usable, requested = req.resources.vcpus, "insufficient vcpus");
            return false;
        }
        host.limits.insert("vcpu".to_string(), limit);
        true
    }
}

pub struct DiskFilter {
    pub allocation_ratio: f64,
}

impl HostFilter for DiskFilter {
    fn name(&self) -> &'static str {
        "DiskFilter"
    }

    fn host_passes(&self, host: &mut HostState, req: &FilterRequest<'_>) -> bool {
        let total = host.total.disk_gb as f64;
        let limit = total * self.allocation_ratio;
        let usable = limit - (total - host.free_disk_gb() as f64);
        let requested = req.resources.disk_gb();
        if usable < requested as f64 {
            debug!(host = %host.host, usable, requested, "insufficient disk");
            return false;
        }
        host.limits.insert("disk_gb".to_string(), limit);
        true
    }
}

/// Matches the requested availability zone, when one is requested.
pub struct AvailabilityZoneFilter;

impl HostFilter for AvailabilityZoneFilter {
    fn name(&self) -> &'static str {
        "AvailabilityZoneFilter"
    }

    fn host_passes(&self, host: &mut HostState, req: &FilterRequest<'_>) -> bool {
        match &req.spec.instance_properties.availability_zone {
            Some(zone) => host.availability_zone.as_deref() == Some(zone.as_str()),
            None => true,
        }
    }
}

/// Matches image `hypervisor_type` and `architecture` against the host.
pub struct ImagePropertiesFilter;

impl HostFilter for ImagePropertiesFilter {
    fn name(&self) -> &'static str {
        "ImagePropertiesFilter"
    }

    fn host_passes(&self, host: &mut HostState, req: &FilterRequest<'_>) -> bool {
        let Some(image) = &req.spec.image else {
            return true;
        };
        if let Some(wanted) = image.properties.get("hypervisor_type") {
            if !wanted.eq_ignore_ascii_case(&host.hypervisor_type) {
                return false;
            }
        }
        if let Some(wanted) = image.properties.get("architecture") {
            match &host.cpu_arch {
                Some(arch) if arch.eq_ignore_ascii_case(wanted) => {}
                _ => return false,
            }
        }
        true
    }
}

// ── Chain ─────────────────────────────────────────────────────────

/// Ordered set of filters. The retry filter always runs first.
pub struct FilterChain {
    filters: Vec<Box<dyn HostFilter>>,
}

impl FilterChain {
    /// Build the chain from configured filter names.
    ///
    /// `RetryFilter` is placed first whether or not it is listed.
    pub fn from_config(config: &FilterConfig) -> PlacementResult<Self> {
        let mut filters: Vec<Box<dyn HostFilter>> = vec![Box::new(RetryFilter)];
        for name in &config.enabled {
            let filter: Box<dyn HostFilter> = match name.as_str() {
                "RetryFilter" => continue,
                "ComputeFilter" => Box::new(ComputeFilter),
                "RamFilter" => Box::new(RamFilter {
                    allocation_ratio: config.ram_allocation_ratio,
                }),
                "CoreFilter" => Box::new(CoreFilter {
                    allocation_ratio: config.cpu_allocation_ratio,
                }),
                "DiskFilter" => Box::new(DiskFilter {
                    allocation_ratio: config.disk_allocation_ratio,
                }),
                "AvailabilityZoneFilter" => Box::new(AvailabilityZoneFilter),
                "ImagePropertiesFilter" => Box::new(ImagePropertiesFilter),
                other => return Err(PlacementError::UnknownFilter(other.to_string())),
            };
            filters.push(filter);
        }
        Ok(Self { filters })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run every filter against `host`. Stops at the first rejection.
    pub fn host_passes(&self, host: &mut HostState, req: &FilterRequest<'_>) -> bool {
        self.filters.iter().all(|f| f.host_passes(host, req))
    }

    /// Run only retry exclusion. Used for forced hosts.
    pub fn retry_passes(&self, host: &mut HostState, req: &FilterRequest<'_>) -> bool {
        RetryFilter.host_passes(host, req)
    }
}
