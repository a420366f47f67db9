//! Host resource sampling, scoring, and bottleneck classification

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PerformanceConfig;
use crate::models::{PerformanceSnapshot, ResourceKind, Severity};
use crate::monitoring::MetricsCollector;

/// Snapshots considered by the periodic bottleneck classification
const BOTTLENECK_WINDOW: usize = 6;

/// Breach factor at which a threshold alert escalates to critical
const CRITICAL_FACTOR: f64 = 1.15;

/// Resource averages over a window with the classified primary bottleneck
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottleneckReport {
    /// Snapshots averaged
    pub window: usize,
    /// Average CPU percent
    pub avg_cpu_percent: f64,
    /// Average memory percent
    pub avg_memory_percent: f64,
    /// Average disk percent
    pub avg_disk_percent: f64,
    /// Average network Mbps
    pub avg_network_mbps: f64,
    /// Resource most exceeding its threshold, if any
    pub primary_bottleneck: Option<ResourceKind>,
}

/// Periodically samples host resources and raises threshold alerts through
/// the metrics collector's handler path.
pub struct PerformanceMonitor {
    config: PerformanceConfig,
    collector: Arc<MetricsCollector>,
    system: Mutex<System>,
    disks: Mutex<Disks>,
    networks: Mutex<Networks>,
    last_sample_at: Mutex<Instant>,
    snapshots: Mutex<VecDeque<PerformanceSnapshot>>,
    bottlenecks: Mutex<VecDeque<ResourceKind>>,
    cancel: CancellationToken,
}

impl PerformanceMonitor {
    /// Create a monitor reporting through the given collector
    pub fn new(config: PerformanceConfig, collector: Arc<MetricsCollector>) -> Self {
        Self {
            config,
            collector,
            system: Mutex::new(System::new()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            last_sample_at: Mutex::new(Instant::now()),
            snapshots: Mutex::new(VecDeque::new()),
            bottlenecks: Mutex::new(VecDeque::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Threshold configured for a resource
    pub fn threshold_for(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.config.cpu_threshold,
            ResourceKind::Memory => self.config.memory_threshold,
            ResourceKind::Disk => self.config.disk_threshold,
            ResourceKind::Network => self.config.network_threshold,
        }
    }

    /// Take one host resource sample
    pub fn sample(&self) -> PerformanceSnapshot {
        let cpu_percent = {
            let mut system = self.system.lock();
            system.refresh_cpu();
            system.refresh_memory();
            f64::from(system.global_cpu_info().cpu_usage())
        };

        let memory_percent = {
            let system = self.system.lock();
            let total = system.total_memory();
            if total == 0 {
                0.0
            } else {
                system.used_memory() as f64 / total as f64 * 100.0
            }
        };

        let disk_percent = {
            let mut disks = self.disks.lock();
            disks.refresh();
            let (total, available) = disks
                .iter()
                .fold((0u64, 0u64), |(t, a), disk| {
                    (t + disk.total_space(), a + disk.available_space())
                });
            if total == 0 {
                0.0
            } else {
                (total - available) as f64 / total as f64 * 100.0
            }
        };

        let network_mbps = {
            let mut networks = self.networks.lock();
            networks.refresh();
            let bytes: u64 = networks
                .iter()
                .map(|(_, data)| data.received() + data.transmitted())
                .sum();
            let mut last = self.last_sample_at.lock();
            let elapsed = last.elapsed().as_secs_f64().max(0.001);
            *last = Instant::now();
            bytes as f64 * 8.0 / 1_000_000.0 / elapsed
        };

        PerformanceSnapshot {
            timestamp: Utc::now(),
            cpu_percent,
            memory_percent,
            disk_percent,
            network_mbps,
        }
    }

    /// Append a snapshot to the rolling history and publish its gauges
    pub fn record_snapshot(&self, snapshot: PerformanceSnapshot) {
        {
            let mut snapshots = self.snapshots.lock();
            if snapshots.len() == self.config.history_capacity {
                snapshots.pop_front();
            }
            snapshots.push_back(snapshot);
        }

        self.collector
            .record_business_metric("system_cpu_percent", snapshot.cpu_percent, &[]);
        self.collector
            .record_business_metric("system_memory_percent", snapshot.memory_percent, &[]);
        self.collector
            .record_business_metric("system_disk_percent", snapshot.disk_percent, &[]);
        self.collector
            .record_business_metric("system_network_mbps", snapshot.network_mbps, &[]);
        self.collector.record_business_metric(
            "system_performance_score",
            self.calculate_performance_score(&snapshot),
            &[],
        );
    }

    /// Score a snapshot from 100 down, penalizing cpu/memory excess over
    /// their comfort thresholds. All-low snapshots score a full 100.
    pub fn calculate_performance_score(&self, snapshot: &PerformanceSnapshot) -> f64 {
        let mut score = 100.0;
        if snapshot.cpu_percent > self.config.cpu_threshold {
            score -= (snapshot.cpu_percent - self.config.cpu_threshold) * 2.0;
        }
        if snapshot.memory_percent > self.config.memory_threshold {
            score -= (snapshot.memory_percent - self.config.memory_threshold) * 2.0;
        }
        score.clamp(0.0, 100.0)
    }

    /// Average the last `window` snapshots and classify the primary
    /// bottleneck: the resource whose average most exceeds its own
    /// threshold. Exact ties break by CPU > memory > disk > network.
    pub fn detect_bottleneck(&self, window: usize) -> Option<BottleneckReport> {
        let snapshots = self.snapshots.lock();
        if snapshots.is_empty() {
            return None;
        }

        let considered: Vec<&PerformanceSnapshot> =
            snapshots.iter().rev().take(window).collect();
        let n = considered.len() as f64;
        let avg = |kind: ResourceKind| -> f64 {
            considered.iter().map(|s| s.resource(kind)).sum::<f64>() / n
        };

        let averages = [
            (ResourceKind::Cpu, avg(ResourceKind::Cpu)),
            (ResourceKind::Memory, avg(ResourceKind::Memory)),
            (ResourceKind::Disk, avg(ResourceKind::Disk)),
            (ResourceKind::Network, avg(ResourceKind::Network)),
        ];

        // Iteration is already in precedence order, so a strict comparison
        // keeps the earlier resource on ties.
        let mut primary: Option<(ResourceKind, f64)> = None;
        for (kind, average) in averages {
            let excess = average - self.threshold_for(kind);
            if excess > 0.0 && primary.map(|(_, best)| excess > best).unwrap_or(true) {
                primary = Some((kind, excess));
            }
        }

        let report = BottleneckReport {
            window: considered.len(),
            avg_cpu_percent: averages[0].1,
            avg_memory_percent: averages[1].1,
            avg_disk_percent: averages[2].1,
            avg_network_mbps: averages[3].1,
            primary_bottleneck: primary.map(|(kind, _)| kind),
        };

        if let Some(kind) = report.primary_bottleneck {
            let mut bottlenecks = self.bottlenecks.lock();
            if bottlenecks.len() == self.config.history_capacity {
                bottlenecks.pop_front();
            }
            bottlenecks.push_back(kind);
        }

        Some(report)
    }

    /// Compare the latest snapshot against the configured thresholds and
    /// raise collector-level alerts for every breached resource.
    pub async fn check_thresholds(&self) {
        let Some(latest) = self.snapshots.lock().back().copied() else {
            return;
        };

        for kind in [
            ResourceKind::Cpu,
            ResourceKind::Memory,
            ResourceKind::Disk,
            ResourceKind::Network,
        ] {
            let value = latest.resource(kind);
            let threshold = self.threshold_for(kind);
            if value <= threshold {
                continue;
            }

            let severity = if value >= threshold * CRITICAL_FACTOR {
                Severity::Critical
            } else {
                Severity::Warning
            };
            self.collector
                .raise_alert(
                    &format!("{kind}_threshold"),
                    severity,
                    &format!("{kind} at {value:.1} exceeds threshold {threshold:.1}"),
                    value,
                    threshold,
                )
                .await;
        }
    }

    /// Deduplicated recommendations from recent bottleneck history, capped
    /// at five entries.
    pub fn get_recommendations(&self) -> Vec<String> {
        let bottlenecks = self.bottlenecks.lock();
        let mut out: Vec<String> = Vec::new();

        for kind in bottlenecks.iter().rev() {
            let text = match kind {
                ResourceKind::Cpu => {
                    "CPU-bound: shed load or scale workers for this agent".to_string()
                }
                ResourceKind::Memory => {
                    "Memory-bound: lower buffer capacities or add memory".to_string()
                }
                ResourceKind::Disk => {
                    "Disk-bound: tighten retention or move storage roots".to_string()
                }
                ResourceKind::Network => {
                    "Network-bound: batch outbound calls or spread peers".to_string()
                }
            };
            if !out.contains(&text) {
                out.push(text);
            }
            if out.len() == 5 {
                break;
            }
        }

        out
    }

    /// Spawn the periodic sampling worker
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = interval(monitor.config.sample_interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let snapshot = monitor.sample();
                        monitor.record_snapshot(snapshot);
                        monitor.detect_bottleneck(BOTTLENECK_WINDOW);
                        monitor.check_thresholds().await;
                    }
                    _ = monitor.cancel.cancelled() => {
                        debug!("Performance monitor stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Signal the worker to stop
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::monitoring::MemoryAlertHandler;

    fn monitor() -> PerformanceMonitor {
        let collector = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());
        PerformanceMonitor::new(PerformanceConfig::default(), collector)
    }

    fn snapshot(cpu: f64, memory: f64, disk: f64, network: f64) -> PerformanceSnapshot {
        PerformanceSnapshot {
            timestamp: Utc::now(),
            cpu_percent: cpu,
            memory_percent: memory,
            disk_percent: disk,
            network_mbps: network,
        }
    }

    #[test]
    fn idle_host_scores_full_marks() {
        let monitor = monitor();
        assert_eq!(
            monitor.calculate_performance_score(&snapshot(10.0, 10.0, 10.0, 1.0)),
            100.0
        );
    }

    #[test]
    fn loaded_host_is_penalized() {
        let monitor = monitor();
        let score = monitor.calculate_performance_score(&snapshot(95.0, 60.0, 10.0, 1.0));
        assert!(score <= 70.0);
        assert!(score >= 0.0);
    }

    #[test]
    fn score_never_goes_negative() {
        let monitor = monitor();
        assert_eq!(
            monitor.calculate_performance_score(&snapshot(100.0, 100.0, 100.0, 1000.0)),
            0.0
        );
    }

    #[test]
    fn largest_excess_wins_bottleneck_classification() {
        let monitor = monitor();
        // cpu excess 15 over its 80 threshold, memory excess 5 over 85
        monitor.record_snapshot(snapshot(95.0, 90.0, 10.0, 1.0));

        let report = monitor.detect_bottleneck(6).unwrap();
        assert_eq!(report.primary_bottleneck, Some(ResourceKind::Cpu));
    }

    #[test]
    fn exact_ties_break_by_precedence() {
        let monitor = monitor();
        // Both excesses are exactly 10; CPU precedes memory.
        monitor.record_snapshot(snapshot(90.0, 95.0, 10.0, 1.0));

        let report = monitor.detect_bottleneck(6).unwrap();
        assert_eq!(report.primary_bottleneck, Some(ResourceKind::Cpu));
    }

    #[test]
    fn no_bottleneck_when_all_resources_are_comfortable() {
        let monitor = monitor();
        monitor.record_snapshot(snapshot(20.0, 30.0, 40.0, 5.0));

        let report = monitor.detect_bottleneck(6).unwrap();
        assert_eq!(report.primary_bottleneck, None);
        assert!(monitor.get_recommendations().is_empty());
    }

    #[tokio::test]
    async fn threshold_breach_raises_collector_alert() {
        let collector = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());
        let handler = Arc::new(MemoryAlertHandler::new());
        collector.register_handler(handler.clone());
        let monitor = PerformanceMonitor::new(PerformanceConfig::default(), collector.clone());

        monitor.record_snapshot(snapshot(99.0, 10.0, 10.0, 1.0));
        monitor.check_thresholds().await;

        let received = handler.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].rule_name, "cpu_threshold");
        assert_eq!(received[0].severity, Severity::Critical);
        assert!(collector.get_alert("cpu_threshold").is_some());
    }

    #[test]
    fn recommendations_are_deduplicated_and_capped() {
        let monitor = monitor();
        for _ in 0..10 {
            monitor.record_snapshot(snapshot(95.0, 10.0, 10.0, 1.0));
            monitor.detect_bottleneck(1);
        }
        monitor.record_snapshot(snapshot(10.0, 99.0, 10.0, 1.0));
        monitor.detect_bottleneck(1);

        let recommendations = monitor.get_recommendations();
        assert!(recommendations.len() <= 5);
        assert_eq!(
            recommendations
                .iter()
                .filter(|r| r.starts_with("CPU-bound"))
                .count(),
            1
        );
        assert!(recommendations.iter().any(|r| r.starts_with("Memory-bound")));
    }
}
