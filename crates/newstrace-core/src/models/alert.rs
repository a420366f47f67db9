//! Alert rule and alert data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Severity level shared by alerts and anomalies
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Warning
    #[default]
    Warning,
    /// Critical
    Critical,
}

/// Which side of the threshold triggers the rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    /// Trigger when the value reaches or exceeds the threshold
    Above,
    /// Trigger when the value falls to or below the threshold
    Below,
}

/// A declarative threshold rule governing when a metric value becomes an alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule name; also the key for the alert it raises
    pub name: String,

    /// Metric the rule watches
    pub metric_name: String,

    /// Threshold for a warning-level breach
    pub warning_threshold: f64,

    /// Threshold for a critical-level breach
    pub critical_threshold: f64,

    /// Direction of the comparison
    pub direction: ThresholdDirection,

    /// Severity assigned to warning-level breaches
    pub severity: Severity,

    /// Description of what this rule monitors
    pub description: Option<String>,
}

impl AlertRule {
    /// Check threshold consistency for the rule's direction
    pub fn validate(&self) -> Result<()> {
        let consistent = match self.direction {
            ThresholdDirection::Above => self.critical_threshold >= self.warning_threshold,
            ThresholdDirection::Below => self.critical_threshold <= self.warning_threshold,
        };
        if !consistent {
            return Err(Error::config(format!(
                "rule '{}': critical threshold {} is on the wrong side of warning threshold {} for direction {:?}",
                self.name, self.critical_threshold, self.warning_threshold, self.direction
            )));
        }
        Ok(())
    }

    /// Evaluate a value against the rule, returning the breached severity
    pub fn check(&self, value: f64) -> Option<Severity> {
        let breaches = |threshold: f64| match self.direction {
            ThresholdDirection::Above => value >= threshold,
            ThresholdDirection::Below => value <= threshold,
        };

        if breaches(self.critical_threshold) {
            Some(Severity::Critical)
        } else if breaches(self.warning_threshold) {
            Some(self.severity.max(Severity::Warning))
        } else {
            None
        }
    }

    /// Threshold matching a breach severity
    pub fn threshold_for(&self, severity: Severity) -> f64 {
        if severity == Severity::Critical {
            self.critical_threshold
        } else {
            self.warning_threshold
        }
    }
}

/// A triggered alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Rule that raised this alert
    pub rule_name: String,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Metric value that triggered the alert
    pub value: f64,

    /// Threshold that was breached
    pub threshold: f64,

    /// When the alert was triggered
    pub triggered_at: DateTime<Utc>,

    /// Whether the alert has been resolved
    pub resolved: bool,

    /// When the alert was resolved; set exactly once
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Mark the alert resolved; `resolved_at` is only ever set once
    pub fn resolve(&mut self) {
        self.resolved = true;
        if self.resolved_at.is_none() {
            self.resolved_at = Some(Utc::now());
        }
    }
}
