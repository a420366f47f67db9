//! Baseline-driven anomaly detection over processed traces

use std::collections::{BTreeMap, HashMap};
use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::TraceConfig;
use crate::models::{
    Anomaly, AnomalyKind, Severity, StatBaseline, TraceAnalysis, TraceData, TrendPoint,
};

struct WindowSample {
    service: String,
    key: String,
    duration_ms: f64,
    timestamp: DateTime<Utc>,
}

/// Detects latency and error-rate anomalies against rolling mean/std baselines
pub struct TraceAnalyzer {
    config: TraceConfig,
    baselines: Mutex<HashMap<String, StatBaseline>>,
    window: Mutex<VecDeque<WindowSample>>,
}

impl TraceAnalyzer {
    /// Create an analyzer with the configured window and thresholds
    pub fn new(config: TraceConfig) -> Self {
        Self {
            config,
            baselines: Mutex::new(HashMap::new()),
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Inspect a trace and its analysis for anomalies, then fold the trace's
    /// durations into the sliding window for future baselines.
    pub fn analyze(&self, trace: &TraceData, analysis: &TraceAnalysis) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        let now = Utc::now();

        {
            let baselines = self.baselines.lock();
            for span in &trace.spans {
                let Some(duration) = span.duration_ms else {
                    continue;
                };
                let key = span.baseline_key();

                let (threshold, expected) = match baselines.get(&key) {
                    Some(baseline) if baseline.sample_count >= 2 => {
                        let t = baseline.mean + self.config.latency_sigma * baseline.std_dev;
                        (t, t)
                    }
                    _ => {
                        let t =
                            self.config.default_latency_ms * self.config.default_latency_multiplier;
                        (t, t)
                    }
                };

                if duration > threshold {
                    // Spikes on the critical path hurt end-to-end latency directly.
                    let severity = if analysis.critical_path.contains(&span.span_id) {
                        Severity::Critical
                    } else {
                        Severity::Warning
                    };
                    anomalies.push(Anomaly {
                        kind: AnomalyKind::LatencySpike,
                        severity,
                        component: Some(key.clone()),
                        observed: duration,
                        expected,
                        description: format!(
                            "span '{}' took {duration:.0}ms, expected at most {expected:.0}ms",
                            span.operation_name
                        ),
                        detected_at: now,
                    });
                }
            }
        }

        let error_rate = trace.error_rate();
        if trace.total_spans > 0 && error_rate > self.config.error_rate_threshold {
            anomalies.push(Anomaly {
                kind: AnomalyKind::ErrorSpike,
                severity: Severity::Critical,
                component: None,
                observed: error_rate,
                expected: self.config.error_rate_threshold,
                description: format!(
                    "{} of {} spans failed ({:.0}%)",
                    trace.error_count,
                    trace.total_spans,
                    error_rate * 100.0
                ),
                detected_at: now,
            });
        }

        self.record_samples(trace);
        anomalies
    }

    fn record_samples(&self, trace: &TraceData) {
        let mut window = self.window.lock();
        for span in &trace.spans {
            let Some(duration) = span.duration_ms else {
                continue;
            };
            if window.len() == self.config.analyzer_window {
                window.pop_front();
            }
            window.push_back(WindowSample {
                service: span.service_name.clone(),
                key: span.baseline_key(),
                duration_ms: duration,
                timestamp: span.started_at,
            });
        }
    }

    /// Recompute the mean/std baselines from the sliding window
    pub fn update_baselines(&self) {
        let window = self.window.lock();
        let mut grouped: HashMap<&str, Vec<f64>> = HashMap::new();
        for sample in window.iter() {
            grouped
                .entry(sample.key.as_str())
                .or_default()
                .push(sample.duration_ms);
        }

        let mut baselines = HashMap::with_capacity(grouped.len());
        for (key, durations) in grouped {
            let n = durations.len() as f64;
            let mean = durations.iter().sum::<f64>() / n;
            let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
            baselines.insert(
                key.to_string(),
                StatBaseline {
                    mean,
                    std_dev: variance.sqrt(),
                    sample_count: durations.len(),
                },
            );
        }

        debug!(keys = baselines.len(), "Trace baselines updated");
        *self.baselines.lock() = baselines;
    }

    /// Current baseline for a `service:operation` key
    pub fn baseline(&self, key: &str) -> Option<StatBaseline> {
        self.baselines.lock().get(key).copied()
    }

    /// Per-minute latency trend for one service over the lookback window.
    /// Empty when fewer than two samples are available.
    pub fn analyze_trends(&self, service: &str, lookback: Duration) -> Vec<TrendPoint> {
        let since = Utc::now() - lookback;
        let window = self.window.lock();

        let samples: Vec<&WindowSample> = window
            .iter()
            .filter(|s| s.service == service && s.timestamp >= since)
            .collect();
        if samples.len() < 2 {
            return Vec::new();
        }

        let mut buckets: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();
        for sample in samples {
            let bucket = sample.timestamp
                - Duration::seconds(sample.timestamp.timestamp() % 60)
                - Duration::nanoseconds(i64::from(sample.timestamp.timestamp_subsec_nanos()));
            let entry = buckets.entry(bucket).or_insert((0.0, 0));
            entry.0 += sample.duration_ms;
            entry.1 += 1;
        }

        buckets
            .into_iter()
            .map(|(timestamp, (sum, count))| TrendPoint {
                timestamp,
                mean_duration_ms: sum / count as f64,
                sample_count: count,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::{Span, SpanStatus, TraceStatus};

    fn span(id: &str, op: &str, duration: f64, status: SpanStatus) -> Span {
        Span {
            span_id: id.to_string(),
            trace_id: "t1".to_string(),
            parent_span_id: None,
            operation_name: op.to_string(),
            service_name: "sentiment".to_string(),
            agent_name: "agent".to_string(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            duration_ms: Some(duration),
            status,
            attributes: serde_json::json!({}),
            events: Vec::new(),
        }
    }

    fn trace(spans: Vec<Span>) -> TraceData {
        let mut trace = TraceData {
            trace_id: "t1".to_string(),
            root_span_id: spans[0].span_id.clone(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            duration_ms: Some(100.0),
            service_count: 0,
            total_spans: 0,
            error_count: 0,
            status: TraceStatus::Completed,
            spans,
        };
        trace.recompute_aggregates();
        trace
    }

    fn empty_analysis(trace: &TraceData) -> TraceAnalysis {
        TraceAnalysis {
            trace_id: trace.trace_id.clone(),
            span_count: trace.total_spans,
            critical_path: Vec::new(),
            bottlenecks: Vec::new(),
            service_dependencies: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn latency_spike_against_learned_baseline() {
        let analyzer = TraceAnalyzer::new(TraceConfig::default());

        // mean 100, std ~8.2 -> threshold ~124.5 at 3 sigma
        let history = trace(vec![
            span("a", "score", 90.0, SpanStatus::Ok),
            span("b", "score", 100.0, SpanStatus::Ok),
            span("c", "score", 110.0, SpanStatus::Ok),
        ]);
        analyzer.analyze(&history, &empty_analysis(&history));
        analyzer.update_baselines();

        let fast = trace(vec![span("d", "score", 120.0, SpanStatus::Ok)]);
        assert!(analyzer.analyze(&fast, &empty_analysis(&fast)).is_empty());

        let slow = trace(vec![span("e", "score", 200.0, SpanStatus::Ok)]);
        let anomalies = analyzer.analyze(&slow, &empty_analysis(&slow));
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::LatencySpike);
        assert_eq!(anomalies[0].observed, 200.0);
    }

    #[test]
    fn latency_spike_without_baseline_uses_global_default() {
        let config = TraceConfig {
            default_latency_ms: 100.0,
            default_latency_multiplier: 5.0,
            ..TraceConfig::default()
        };
        let analyzer = TraceAnalyzer::new(config);

        let slow = trace(vec![span("a", "cold_op", 600.0, SpanStatus::Ok)]);
        let anomalies = analyzer.analyze(&slow, &empty_analysis(&slow));
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].expected, 500.0);
    }

    #[test]
    fn error_spike_on_high_failure_ratio() {
        let analyzer = TraceAnalyzer::new(TraceConfig::default());
        let failing = trace(vec![
            span("a", "fetch", 10.0, SpanStatus::Error),
            span("b", "fetch", 10.0, SpanStatus::Error),
            span("c", "fetch", 10.0, SpanStatus::Ok),
        ]);

        let anomalies = analyzer.analyze(&failing, &empty_analysis(&failing));
        let spike = anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::ErrorSpike)
            .expect("error spike expected");
        assert!((spike.observed - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn trends_need_at_least_two_samples() {
        let analyzer = TraceAnalyzer::new(TraceConfig::default());
        assert!(analyzer.analyze_trends("sentiment", Duration::hours(1)).is_empty());

        let one = trace(vec![span("a", "score", 50.0, SpanStatus::Ok)]);
        analyzer.analyze(&one, &empty_analysis(&one));
        assert!(analyzer.analyze_trends("sentiment", Duration::hours(1)).is_empty());

        let two = trace(vec![span("b", "score", 70.0, SpanStatus::Ok)]);
        analyzer.analyze(&two, &empty_analysis(&two));
        let points = analyzer.analyze_trends("sentiment", Duration::hours(1));
        assert!(!points.is_empty());
        let total: usize = points.iter().map(|p| p.sample_count).sum();
        assert_eq!(total, 2);
    }
}
