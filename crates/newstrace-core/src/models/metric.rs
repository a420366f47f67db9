//! Metric sample, baseline, and host snapshot data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single observed metric value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name
    pub name: String,

    /// Observed value
    pub value: f64,

    /// Label dimensions
    pub labels: Vec<(String, String)>,

    /// When the value was observed
    pub timestamp: DateTime<Utc>,
}

/// Rolling mean/std reference for judging "normal" per key
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatBaseline {
    /// Mean of the window
    pub mean: f64,
    /// Population standard deviation of the window
    pub std_dev: f64,
    /// Samples the baseline was computed from
    pub sample_count: usize,
}

/// Host resource kinds, in bottleneck tie-break precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Processor utilization
    Cpu,
    /// Memory utilization
    Memory,
    /// Disk utilization
    Disk,
    /// Network throughput
    Network,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Disk => "disk",
            ResourceKind::Network => "network",
        };
        f.write_str(s)
    }
}

/// A point-in-time sample of host resource gauges
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,

    /// CPU utilization in percent
    pub cpu_percent: f64,

    /// Memory utilization in percent
    pub memory_percent: f64,

    /// Disk utilization in percent
    pub disk_percent: f64,

    /// Network throughput in Mbps
    pub network_mbps: f64,
}

impl PerformanceSnapshot {
    /// Value of one resource gauge
    pub fn resource(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu_percent,
            ResourceKind::Memory => self.memory_percent,
            ResourceKind::Disk => self.disk_percent,
            ResourceKind::Network => self.network_mbps,
        }
    }
}
