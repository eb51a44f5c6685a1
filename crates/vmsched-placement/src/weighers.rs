//! Scoring of hosts that survived the filter chain.
//!
//! Each weigher produces a raw value per host. Raw values are normalised to
//! `[0, 1]` across the candidate set, multiplied by the weigher's configured
//! multiplier, and summed into the host's final weight.

use vmsched_core::WeightConfig;

use crate::filters::FilterRequest;
use crate::host_state::HostState;

pub trait HostWeigher: Send + Sync {
    fn name(&self) -> &'static str;
    fn multiplier(&self) -> f64;
    fn raw_weight(&self, host: &HostState, req: &FilterRequest<'_>) -> f64;
}

/// Prefers hosts with more free RAM (spread). A negative multiplier stacks.
pub struct RamWeigher {
    pub multiplier: f64,
}

impl HostWeigher for RamWeigher {
    fn name(&self) -> &'static str {
        "RamWeigher"
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn raw_weight(&self, host: &HostState, _req: &FilterRequest<'_>) -> f64 {
        host.free_ram_mb() as f64
    }
}

pub struct VcpuWeigher {
    pub multiplier: f64,
}

impl HostWeigher for VcpuWeigher {
    fn name(&self) -> &'static str {
        "VcpuWeigher"
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn raw_weight(&self, host: &HostState, _req: &FilterRequest<'_>) -> f64 {
        host.free_vcpus() as f64
    }
}

/// A candidate with its combined weight.
#[derive(Debug, Clone)]
pub struct WeighedHost {
    pub host: HostState,
    pub weight: f64,
}

pub struct WeigherChain {
    weighers: Vec<Box<dyn HostWeigher>>,
}

impl WeigherChain {
    pub fn from_config(config: &WeightConfig) -> Self {
        Self {
            weighers: vec![
                Box::new(RamWeigher {
                    multiplier: config.ram_weight_multiplier,
                }),
                Box::new(VcpuWeigher {
                    multiplier: config.vcpu_weight_multiplier,
                }),
            ],
        }
    }

    /// Weigh `hosts` and return them best first.
    ///
    /// The sort is stable, so equal weights keep snapshot order.
    pub fn weigh(&self, hosts: Vec<HostState>, req: &FilterRequest<'_>) -> Vec<WeighedHost> {
        let mut weights = vec![0.0; hosts.len()];
        for weigher in &self.weighers {
            let raw: Vec<f64> = hosts.iter().map(|h| weigher.raw_weight(h, req)).collect();
            for (total, value) in weights.iter_mut().zip(normalize(&raw)) {
                *total += weigher.multiplier() * value;
            }
        }

        let mut weighed: Vec<WeighedHost> = hosts
            .into_iter()
            .zip(weights)
            .map(|(host, weight)| WeighedHost { host, weight })
            .collect();
        weighed.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        weighed
    }
}

/// Scale values into `[0, 1]`. A set with no spread maps to all zeros.
fn normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !(range > 0.0) {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}
