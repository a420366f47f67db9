//! Log analyses: error rates, latency statistics, novel error patterns
//!
//! Every analysis catches its own failures and degrades to a result with
//! empty findings and zero confidence; callers never see an error.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::json;
use tracing::warn;

use crate::config::LogConfig;
use crate::error::Result;
use crate::logs::LogStorage;
use crate::models::{
    AnalysisKind, AnalysisResult, Anomaly, AnomalyKind, LogEntry, LogLevel, LogQuery, Severity,
};

/// Smoothing for the stored per-component latency baselines
const BASELINE_ALPHA: f64 = 0.3;

/// Reads the log store and produces error-rate, performance, and
/// novel-pattern analyses.
pub struct LogAnalyzer {
    storage: Arc<LogStorage>,
    error_rate_threshold: f64,
    performance_margin: f64,
    novelty_threshold: usize,
    performance_baselines: Mutex<HashMap<String, f64>>,
    seen_patterns: Mutex<HashMap<String, usize>>,
    uuid_re: Regex,
    hex_re: Regex,
    digit_re: Regex,
}

impl LogAnalyzer {
    /// Create an analyzer over the given store
    pub fn new(storage: Arc<LogStorage>, config: &LogConfig) -> Self {
        Self {
            storage,
            error_rate_threshold: config.error_rate_threshold,
            performance_margin: config.performance_margin,
            novelty_threshold: config.novelty_threshold,
            performance_baselines: Mutex::new(HashMap::new()),
            seen_patterns: Mutex::new(HashMap::new()),
            uuid_re: Regex::new(
                r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
            )
            .expect("static pattern"),
            hex_re: Regex::new(r"\b[0-9a-fA-F]{8,}\b").expect("static pattern"),
            digit_re: Regex::new(r"\d+").expect("static pattern"),
        }
    }

    /// Run one analysis over the given time range. Never errors: internal
    /// failures produce a zero-confidence result instead.
    pub fn analyze_logs(
        &self,
        kind: AnalysisKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AnalysisResult {
        let outcome = match kind {
            AnalysisKind::ErrorRate => self.error_rate_analysis(start, end),
            AnalysisKind::Performance => self.performance_analysis(start, end),
            AnalysisKind::AnomalyDetection => self.anomaly_detection(start, end),
        };

        outcome.unwrap_or_else(|e| {
            warn!(kind = ?kind, error = %e, "Log analysis failed");
            AnalysisResult::failed(kind, e)
        })
    }

    fn entries_in(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<LogEntry>> {
        let result = self.storage.query_logs(&LogQuery {
            filters: Vec::new(),
            start_time: Some(start),
            end_time: Some(end),
            limit: usize::MAX,
            offset: 0,
        })?;
        Ok(result.entries)
    }

    fn error_rate_analysis(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<AnalysisResult> {
        let entries = self.entries_in(start, end)?;

        let mut per_component: HashMap<&str, (usize, usize)> = HashMap::new();
        for entry in &entries {
            let slot = per_component.entry(entry.agent_name.as_str()).or_insert((0, 0));
            slot.0 += 1;
            if entry.level == LogLevel::Error {
                slot.1 += 1;
            }
        }

        let mut findings = serde_json::Map::new();
        let mut anomalies = Vec::new();
        let mut recommendations = Vec::new();

        for (component, (total, errors)) in &per_component {
            let rate = *errors as f64 / *total as f64;
            findings.insert(
                component.to_string(),
                json!({
                    "total_count": total,
                    "error_count": errors,
                    "error_rate": rate,
                }),
            );

            if rate > self.error_rate_threshold {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::ErrorSpike,
                    severity: Severity::Critical,
                    component: Some(component.to_string()),
                    observed: rate,
                    expected: self.error_rate_threshold,
                    description: format!(
                        "spike in errors for '{component}': {errors}/{total} entries failed"
                    ),
                    detected_at: Utc::now(),
                });
                recommendations.push(format!(
                    "Review recent ERROR logs from '{component}' ({:.0}% failure rate)",
                    rate * 100.0
                ));
            }
        }

        Ok(AnalysisResult {
            kind: AnalysisKind::ErrorRate,
            findings,
            anomalies,
            confidence: confidence(entries.len()),
            recommendations,
        })
    }

    fn performance_analysis(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<AnalysisResult> {
        let entries = self.entries_in(start, end)?;

        let mut per_component: HashMap<&str, Vec<f64>> = HashMap::new();
        for entry in &entries {
            if let Some(duration) = entry.duration_ms {
                per_component
                    .entry(entry.agent_name.as_str())
                    .or_default()
                    .push(duration);
            }
        }

        let mut findings = serde_json::Map::new();
        let mut anomalies = Vec::new();
        let mut recommendations = Vec::new();
        let mut baselines = self.performance_baselines.lock();
        let mut samples = 0;

        for (component, mut durations) in per_component {
            durations.sort_by(|a, b| a.total_cmp(b));
            samples += durations.len();
            let mean = durations.iter().sum::<f64>() / durations.len() as f64;
            let p95_idx = ((0.95 * durations.len() as f64).floor() as usize)
                .min(durations.len() - 1);

            findings.insert(
                component.to_string(),
                json!({
                    "sample_count": durations.len(),
                    "mean_duration_ms": mean,
                    "p95_duration_ms": durations[p95_idx],
                }),
            );

            match baselines.get(component).copied() {
                Some(baseline) => {
                    if mean > baseline * self.performance_margin {
                        anomalies.push(Anomaly {
                            kind: AnomalyKind::PerformanceDegradation,
                            severity: Severity::Warning,
                            component: Some(component.to_string()),
                            observed: mean,
                            expected: baseline,
                            description: format!(
                                "'{component}' mean latency {mean:.0}ms exceeds baseline {baseline:.0}ms"
                            ),
                            detected_at: Utc::now(),
                        });
                        recommendations
                            .push(format!("Profile '{component}': latency is trending up"));
                    }
                    let updated = BASELINE_ALPHA * mean + (1.0 - BASELINE_ALPHA) * baseline;
                    baselines.insert(component.to_string(), updated);
                }
                None => {
                    baselines.insert(component.to_string(), mean);
                }
            }
        }

        Ok(AnalysisResult {
            kind: AnalysisKind::Performance,
            findings,
            anomalies,
            confidence: confidence(samples),
            recommendations,
        })
    }

    fn anomaly_detection(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<AnalysisResult> {
        let entries = self.entries_in(start, end)?;

        let mut findings = serde_json::Map::new();
        let mut anomalies = Vec::new();
        let mut seen = self.seen_patterns.lock();
        let mut error_count = 0;

        for entry in &entries {
            if entry.level != LogLevel::Error {
                continue;
            }
            error_count += 1;

            let pattern = self.normalize(&entry.message);
            let prior = seen.get(&pattern).copied().unwrap_or(0);
            if prior < self.novelty_threshold {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::NewErrorPattern,
                    severity: Severity::Warning,
                    component: Some(entry.agent_name.clone()),
                    observed: (prior + 1) as f64,
                    expected: self.novelty_threshold as f64,
                    description: format!("new error pattern: {pattern}"),
                    detected_at: Utc::now(),
                });
            }
            *seen.entry(pattern.clone()).or_insert(0) += 1;

            let count = seen.get(&pattern).copied().unwrap_or(0);
            findings.insert(pattern, json!(count));
        }

        let recommendations = if anomalies.is_empty() {
            Vec::new()
        } else {
            vec![format!(
                "Triage {} previously unseen error pattern(s)",
                anomalies.len()
            )]
        };

        Ok(AnalysisResult {
            kind: AnalysisKind::AnomalyDetection,
            findings,
            anomalies,
            confidence: confidence(error_count),
            recommendations,
        })
    }

    /// Strip identifiers so messages differing only in ids share a pattern
    fn normalize(&self, message: &str) -> String {
        let message = self.uuid_re.replace_all(message, "<id>");
        let message = self.hex_re.replace_all(&message, "<id>");
        self.digit_re.replace_all(&message, "<n>").into_owned()
    }
}

/// Confidence grows smoothly with sample count and is 0 with no data
fn confidence(samples: usize) -> f64 {
    samples as f64 / (samples as f64 + 5.0)
}
