//! Anomaly and analysis result data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::Severity;

/// Kind of detected deviation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A span's duration far exceeded its baseline
    LatencySpike,
    /// Error ratio exceeded the anomaly threshold
    ErrorSpike,
    /// An error message pattern not previously observed
    NewErrorPattern,
    /// Current performance worse than the stored baseline
    PerformanceDegradation,
}

/// A detected deviation with its evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    /// What kind of deviation this is
    pub kind: AnomalyKind,

    /// How serious it is
    pub severity: Severity,

    /// Component the anomaly is attributed to (service, agent, operation)
    pub component: Option<String>,

    /// Observed value (duration, rate, occurrence count)
    pub observed: f64,

    /// Expected value per the baseline or threshold
    pub expected: f64,

    /// Human-readable description of the evidence
    pub description: String,

    /// When the anomaly was detected
    pub detected_at: DateTime<Utc>,
}

/// Kind of log analysis to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Per-component error rates
    ErrorRate,
    /// Latency statistics against stored baselines
    Performance,
    /// Novel error message patterns
    AnomalyDetection,
}

/// Outcome of a log analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Analysis that produced this result
    pub kind: AnalysisKind,

    /// Structured findings keyed by component or pattern
    pub findings: serde_json::Map<String, serde_json::Value>,

    /// Deviations flagged during the analysis
    pub anomalies: Vec<Anomaly>,

    /// Confidence in the findings, 0.0 when the analysis failed
    pub confidence: f64,

    /// Suggested follow-ups
    pub recommendations: Vec<String>,
}

impl AnalysisResult {
    /// Result for an analysis that failed internally: empty findings,
    /// zero confidence, and the failure surfaced as a recommendation.
    pub fn failed(kind: AnalysisKind, reason: impl std::fmt::Display) -> Self {
        Self {
            kind,
            findings: serde_json::Map::new(),
            anomalies: Vec::new(),
            confidence: 0.0,
            recommendations: vec![format!("Analysis failed: {reason}")],
        }
    }
}
