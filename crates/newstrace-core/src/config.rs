//! Configuration management for Newstrace

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logs::FlushStrategy;
use crate::models::AlertRule;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process identity (service/agent names stamped on telemetry)
    pub identity: IdentityConfig,

    /// Exposition server configuration
    pub server: ServerConfig,

    /// Trace pipeline configuration
    pub traces: TraceConfig,

    /// Log pipeline configuration
    pub logs: LogConfig,

    /// Metrics and alerting configuration
    pub metrics: MetricsConfig,

    /// Performance monitor configuration
    pub performance: PerformanceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("cannot parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, failing fast on inconsistent values
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.metrics.ema_alpha) || self.metrics.ema_alpha == 0.0 {
            return Err(Error::config(format!(
                "ema_alpha must be in (0, 1], got {}",
                self.metrics.ema_alpha
            )));
        }
        if self.logs.queue_capacity == 0 {
            return Err(Error::config("log queue_capacity must be non-zero"));
        }
        if self.traces.baseline_capacity == 0 {
            return Err(Error::config("trace baseline_capacity must be non-zero"));
        }
        for rule in &self.metrics.alert_rules {
            rule.validate()?;
        }
        Ok(())
    }
}

/// Identity of the owning agent process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Service name stamped on spans and log entries
    pub service_name: String,
    /// Agent name stamped on spans and log entries
    pub agent_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            service_name: "newstrace".to_string(),
            agent_name: "agent".to_string(),
        }
    }
}

/// Exposition server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// HTTP port for /metrics and /health
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9464,
        }
    }
}

/// Trace pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Storage root for persisted traces
    pub storage_root: String,

    /// Completed traces older than this many hours are evicted
    pub retention_hours: i64,

    /// Interval between retention sweeps
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Interval between drains of completed traces into processing/storage
    #[serde(with = "humantime_serde")]
    pub drain_interval: Duration,

    /// Ring buffer capacity per `service:operation` baseline key
    pub baseline_capacity: usize,

    /// Sliding window capacity for the analyzer's mean/std baselines
    pub analyzer_window: usize,

    /// Sigma multiplier for latency spike detection
    pub latency_sigma: f64,

    /// Multiple of the default latency used when no baseline exists yet
    pub default_latency_multiplier: f64,

    /// Assumed normal latency before baselines accumulate (ms)
    pub default_latency_ms: f64,

    /// error_count / total_spans ratio above which a trace is an error spike
    pub error_rate_threshold: f64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            storage_root: "data/traces".to_string(),
            retention_hours: 24,
            cleanup_interval: Duration::from_secs(300),
            drain_interval: Duration::from_secs(5),
            baseline_capacity: 256,
            analyzer_window: 1024,
            latency_sigma: 3.0,
            default_latency_multiplier: 5.0,
            default_latency_ms: 1000.0,
            error_rate_threshold: 0.5,
        }
    }
}

/// Log pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Storage root for bucket files and the field index
    pub storage_root: String,

    /// Bounded producer queue capacity
    pub queue_capacity: usize,

    /// Buffering strategy for the aggregator
    pub flush_strategy: FlushStrategy,

    /// Fields maintained in the query index
    pub indexed_fields: Vec<String>,

    /// Bucket files older than this many days are removed on cleanup
    pub retention_days: i64,

    /// Per-component error rate above which a spike anomaly is flagged
    pub error_rate_threshold: f64,

    /// Factor over the stored baseline mean that counts as degradation
    pub performance_margin: f64,

    /// Prior sightings before an error pattern counts as established
    pub novelty_threshold: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            storage_root: "data/logs".to_string(),
            queue_capacity: 4096,
            flush_strategy: FlushStrategy::SizeBased {
                max_batch_size: 100,
            },
            indexed_fields: vec!["level".to_string(), "agent_name".to_string()],
            retention_days: 7,
            error_rate_threshold: 0.5,
            performance_margin: 1.25,
            novelty_threshold: 1,
        }
    }
}

/// Metrics and alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Bounded in-memory history per metric name
    pub history_capacity: usize,

    /// Smoothing factor for EMA performance baselines
    pub ema_alpha: f64,

    /// Interval between alert rule evaluations
    #[serde(with = "humantime_serde")]
    pub evaluation_interval: Duration,

    /// Interval between history/alert cleanup sweeps
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// History entries and resolved alerts older than this are pruned
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    /// Declarative alert rules loaded at startup
    pub alert_rules: Vec<AlertRule>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1024,
            ema_alpha: 0.2,
            evaluation_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(300),
            retention: Duration::from_secs(3600),
            alert_rules: Vec::new(),
        }
    }
}

/// Performance monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Interval between host resource samples
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,

    /// Snapshots retained for bottleneck detection
    pub history_capacity: usize,

    /// CPU comfort threshold (percent)
    pub cpu_threshold: f64,

    /// Memory comfort threshold (percent)
    pub memory_threshold: f64,

    /// Disk usage comfort threshold (percent)
    pub disk_threshold: f64,

    /// Network comfort threshold (Mbps)
    pub network_threshold: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(10),
            history_capacity: 360,
            cpu_threshold: 80.0,
            memory_threshold: 85.0,
            disk_threshold: 90.0,
            network_threshold: 800.0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, ThresholdDirection};

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn bad_ema_alpha_fails_fast() {
        let mut config = Config::default();
        config.metrics.ema_alpha = 0.0;
        assert!(config.validate().is_err());

        config.metrics.ema_alpha = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inconsistent_rule_thresholds_fail_fast() {
        let mut config = Config::default();
        config.metrics.alert_rules.push(AlertRule {
            name: "cpu_high".to_string(),
            metric_name: "system_cpu_percent".to_string(),
            warning_threshold: 90.0,
            critical_threshold: 80.0,
            direction: ThresholdDirection::Above,
            severity: Severity::Warning,
            description: None,
        });
        assert!(config.validate().is_err());
    }
}
