//! Metric registry, EMA baselines, and threshold alerting
//!
//! Producer calls append to a bounded in-memory history and feed the
//! `metrics` facade for Prometheus exposition. A single worker evaluates
//! alert rules against the latest values and prunes old data.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge, histogram, Label};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::MetricsConfig;
use crate::error::Result;
use crate::models::{Alert, AlertRule, MetricSample, Severity};
use crate::monitoring::AlertHandler;

/// Base metric registry with alert-rule evaluation and alert lifecycle
pub struct MetricsCollector {
    config: MetricsConfig,
    history: RwLock<HashMap<String, VecDeque<MetricSample>>>,
    ema_baselines: RwLock<HashMap<String, f64>>,
    rules: RwLock<HashMap<String, AlertRule>>,
    alerts: RwLock<HashMap<String, Alert>>,
    handlers: RwLock<Vec<Arc<dyn AlertHandler>>>,
    prometheus: Option<PrometheusHandle>,
    cancel: CancellationToken,
}

impl MetricsCollector {
    /// Create a collector; fails fast on inconsistent alert rules.
    ///
    /// Installs the process-wide Prometheus recorder if none exists yet;
    /// further collectors share it and render nothing themselves.
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let mut rules = HashMap::new();
        for rule in &config.alert_rules {
            rule.validate()?;
            rules.insert(rule.name.clone(), rule.clone());
        }

        let prometheus = match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Prometheus recorder unavailable, exposition disabled");
                None
            }
        };

        Ok(Self {
            config,
            history: RwLock::new(HashMap::new()),
            ema_baselines: RwLock::new(HashMap::new()),
            rules: RwLock::new(rules),
            alerts: RwLock::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
            prometheus,
            cancel: CancellationToken::new(),
        })
    }

    /// Register an alert handler
    pub fn register_handler(&self, handler: Arc<dyn AlertHandler>) {
        self.handlers.write().push(handler);
    }

    fn push_history(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let mut history = self.history.write();
        let ring = history.entry(name.to_string()).or_default();
        if ring.len() == self.config.history_capacity {
            ring.pop_front();
        }
        ring.push_back(MetricSample {
            name: name.to_string(),
            value,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timestamp: Utc::now(),
        });
    }

    /// Record a business metric: bounded history plus exposition
    /// counter/gauge with matching label dimensions.
    pub fn record_business_metric(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.push_history(name, value, labels);

        let labels: Vec<Label> = labels
            .iter()
            .map(|(k, v)| Label::new(k.to_string(), v.to_string()))
            .collect();
        counter!(format!("{name}_total"), labels.clone()).increment(1);
        gauge!(name.to_string(), labels).set(value);
    }

    /// Record an operation duration and fold it into the EMA baseline:
    /// `baseline = alpha * value + (1 - alpha) * previous`, initialized to
    /// the first observation.
    pub fn record_performance_metric(&self, operation: &str, duration_ms: f64) {
        let metric_name = format!("{operation}_duration_ms");
        self.push_history(&metric_name, duration_ms, &[]);

        let mut baselines = self.ema_baselines.write();
        let alpha = self.config.ema_alpha;
        baselines
            .entry(operation.to_string())
            .and_modify(|prev| *prev = alpha * duration_ms + (1.0 - alpha) * *prev)
            .or_insert(duration_ms);

        histogram!(metric_name).record(duration_ms);
    }

    /// EMA baseline for an operation
    pub fn baseline(&self, operation: &str) -> Option<f64> {
        self.ema_baselines.read().get(operation).copied()
    }

    /// Latest recorded value for a metric
    pub fn current_value(&self, name: &str) -> Option<f64> {
        self.history
            .read()
            .get(name)
            .and_then(|ring| ring.back())
            .map(|sample| sample.value)
    }

    /// Recorded history for a metric
    pub fn history(&self, name: &str) -> Vec<MetricSample> {
        self.history
            .read()
            .get(name)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Add (or replace) an alert rule; fails fast on crossed thresholds
    pub fn add_alert_rule(&self, rule: AlertRule) -> Result<()> {
        rule.validate()?;
        self.rules.write().insert(rule.name.clone(), rule);
        Ok(())
    }

    /// Remove an alert rule; returns whether it existed
    pub fn remove_alert_rule(&self, name: &str) -> bool {
        self.rules.write().remove(name).is_some()
    }

    /// Evaluate every rule against the latest metric values, raising or
    /// escalating alerts as thresholds are breached.
    pub async fn evaluate_alert_rules(&self) {
        let rules: Vec<AlertRule> = self.rules.read().values().cloned().collect();

        for rule in rules {
            let Some(value) = self.current_value(&rule.metric_name) else {
                continue;
            };
            let Some(severity) = rule.check(value) else {
                continue;
            };
            let threshold = rule.threshold_for(severity);
            let message = format!(
                "{} breached its {:?} threshold: {value:.2} vs {threshold:.2}",
                rule.metric_name, severity
            );
            self.raise_alert(&rule.name, severity, &message, value, threshold)
                .await;
        }
    }

    /// Raise an alert for a rule key, deduplicating against the active set:
    /// a critical breach supersedes an existing warning in place, an equal
    /// or lower breach leaves the active alert untouched.
    pub async fn raise_alert(
        &self,
        rule_name: &str,
        severity: Severity,
        message: &str,
        value: f64,
        threshold: f64,
    ) {
        let new_alert = || Alert {
            rule_name: rule_name.to_string(),
            severity,
            message: message.to_string(),
            value,
            threshold,
            triggered_at: Utc::now(),
            resolved: false,
            resolved_at: None,
        };

        let to_dispatch = {
            let mut alerts = self.alerts.write();
            match alerts.entry(rule_name.to_string()) {
                Entry::Occupied(mut slot) if !slot.get().resolved => {
                    if severity > slot.get().severity {
                        let existing = slot.get_mut();
                        existing.severity = severity;
                        existing.value = value;
                        existing.threshold = threshold;
                        existing.message = message.to_string();
                        existing.triggered_at = Utc::now();
                        Some(existing.clone())
                    } else {
                        None
                    }
                }
                Entry::Occupied(mut slot) => {
                    let alert = new_alert();
                    slot.insert(alert.clone());
                    Some(alert)
                }
                Entry::Vacant(slot) => {
                    let alert = new_alert();
                    slot.insert(alert.clone());
                    Some(alert)
                }
            }
        };

        if let Some(alert) = to_dispatch {
            debug!(rule = rule_name, severity = ?alert.severity, "Alert raised");
            self.dispatch(&alert).await;
        }
    }

    /// Fire-and-forget delivery to every handler; failures are logged
    async fn dispatch(&self, alert: &Alert) {
        let handlers: Vec<Arc<dyn AlertHandler>> = self.handlers.read().clone();
        for handler in handlers {
            if let Err(e) = handler.handle(alert).await {
                error!(handler = handler.name(), error = %e, "Alert handler failed");
            }
        }
    }

    /// Resolve an active alert; returns whether one was resolved
    pub fn resolve_alert(&self, rule_name: &str) -> bool {
        let mut alerts = self.alerts.write();
        match alerts.get_mut(rule_name) {
            Some(alert) if !alert.resolved => {
                alert.resolve();
                true
            }
            _ => false,
        }
    }

    /// Currently unresolved alerts
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .values()
            .filter(|a| !a.resolved)
            .cloned()
            .collect()
    }

    /// The alert (resolved or not) currently held for a rule
    pub fn get_alert(&self, rule_name: &str) -> Option<Alert> {
        self.alerts.read().get(rule_name).cloned()
    }

    /// Prune history entries and resolved alerts older than the retention
    /// cutoff. Unresolved alerts and recent entries are untouched.
    pub fn cleanup_old_data(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(1));

        {
            let mut history = self.history.write();
            for ring in history.values_mut() {
                ring.retain(|sample| sample.timestamp >= cutoff);
            }
            history.retain(|_, ring| !ring.is_empty());
        }

        self.alerts.write().retain(|_, alert| {
            !(alert.resolved && alert.resolved_at.map(|t| t < cutoff).unwrap_or(false))
        });
    }

    /// Prometheus text exposition, when this collector owns the recorder
    pub fn render_prometheus(&self) -> Option<String> {
        self.prometheus.as_ref().map(|handle| handle.render())
    }

    /// Spawn the evaluation/cleanup worker
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            let mut evaluate_tick = interval(collector.config.evaluation_interval);
            let mut cleanup_tick = interval(collector.config.cleanup_interval);
            loop {
                tokio::select! {
                    _ = evaluate_tick.tick() => {
                        collector.evaluate_alert_rules().await;
                    }
                    _ = cleanup_tick.tick() => {
                        collector.cleanup_old_data();
                    }
                    _ = collector.cancel.cancelled() => {
                        debug!("Metrics worker stopped");
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
    use async_trait::async_trait;
    use crate::error::Error;
    use crate::models::ThresholdDirection;
    use crate::monitoring::MemoryAlertHandler;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(MetricsConfig::default()).unwrap()
    }

    fn above_rule(name: &str, metric: &str, warning: f64, critical: f64) -> AlertRule {
        AlertRule {
            name: name.to_string(),
            metric_name: metric.to_string(),
            warning_threshold: warning,
            critical_threshold: critical,
            direction: ThresholdDirection::Above,
            severity: Severity::Warning,
            description: None,
        }
    }

    #[test]
    fn ema_baseline_initializes_then_smooths() {
        let collector = collector();
        collector.record_performance_metric("summarize", 100.0);
        assert_eq!(collector.baseline("summarize"), Some(100.0));

        collector.record_performance_metric("summarize", 200.0);
        // alpha 0.2: 0.2 * 200 + 0.8 * 100
        assert_eq!(collector.baseline("summarize"), Some(120.0));
    }

    #[test]
    fn history_is_bounded() {
        let config = MetricsConfig {
            history_capacity: 3,
            ..MetricsConfig::default()
        };
        let collector = MetricsCollector::new(config).unwrap();
        for i in 0..5 {
            collector.record_business_metric("articles", i as f64, &[]);
        }

        let history = collector.history("articles");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].value, 2.0);
        assert_eq!(collector.current_value("articles"), Some(4.0));
    }

    #[tokio::test]
    async fn warning_then_critical_supersedes_without_duplicating() {
        let collector = collector();
        let handler = Arc::new(MemoryAlertHandler::new());
        collector.register_handler(handler.clone());
        collector
            .add_alert_rule(above_rule("queue_depth_high", "queue_depth", 10.0, 20.0))
            .unwrap();

        collector.record_business_metric("queue_depth", 15.0, &[]);
        collector.evaluate_alert_rules().await;

        let active = collector.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, Severity::Warning);

        collector.record_business_metric("queue_depth", 25.0, &[]);
        collector.evaluate_alert_rules().await;

        let active = collector.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, Severity::Critical);
        assert_eq!(active[0].value, 25.0);

        // Initial warning plus the escalation; steady-state re-breaches
        // do not dispatch again.
        assert_eq!(handler.received().len(), 2);
        collector.evaluate_alert_rules().await;
        assert_eq!(handler.received().len(), 2);
    }

    #[tokio::test]
    async fn below_direction_triggers_on_low_values() {
        let collector = collector();
        collector
            .add_alert_rule(AlertRule {
                name: "throughput_low".to_string(),
                metric_name: "articles_per_minute".to_string(),
                warning_threshold: 10.0,
                critical_threshold: 2.0,
                direction: ThresholdDirection::Below,
                severity: Severity::Warning,
                description: None,
            })
            .unwrap();

        collector.record_business_metric("articles_per_minute", 50.0, &[]);
        collector.evaluate_alert_rules().await;
        assert!(collector.active_alerts().is_empty());

        collector.record_business_metric("articles_per_minute", 1.0, &[]);
        collector.evaluate_alert_rules().await;
        let active = collector.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, Severity::Critical);
    }

    struct FailingHandler;

    #[async_trait]
    impl AlertHandler for FailingHandler {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, _alert: &Alert) -> crate::error::Result<()> {
            Err(Error::internal("handler exploded"))
        }
    }

    #[tokio::test]
    async fn handler_failures_are_isolated() {
        let collector = collector();
        let ok_handler = Arc::new(MemoryAlertHandler::new());
        collector.register_handler(Arc::new(FailingHandler));
        collector.register_handler(ok_handler.clone());

        collector.raise_alert("manual", Severity::Warning, "msg", 1.0, 0.5).await;
        assert_eq!(ok_handler.received().len(), 1);
    }

    #[tokio::test]
    async fn resolve_and_cleanup_lifecycle() {
        let config = MetricsConfig {
            retention: std::time::Duration::ZERO,
            ..MetricsConfig::default()
        };
        let collector = MetricsCollector::new(config).unwrap();

        collector.raise_alert("gone", Severity::Warning, "old", 1.0, 0.5).await;
        collector.raise_alert("kept", Severity::Warning, "live", 1.0, 0.5).await;
        assert!(collector.resolve_alert("gone"));
        assert!(!collector.resolve_alert("gone"));

        collector.record_business_metric("stale", 1.0, &[]);
        collector.cleanup_old_data();

        // Zero retention prunes resolved alerts and history immediately,
        // but never an unresolved alert.
        assert!(collector.get_alert("gone").is_none());
        assert!(collector.get_alert("kept").is_some());
        assert!(collector.history("stale").is_empty());
    }
}
