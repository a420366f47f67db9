//! Trace processing: critical path, bottlenecks, dependency graph
//!
//! The processor derives a [`TraceAnalysis`] from each completed trace and
//! maintains rolling p95 baselines per `service:operation` key in a capped
//! ring buffer.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::TraceConfig;
use crate::models::{
    Bottleneck, BottleneckSeverity, ServiceDependency, Span, TraceAnalysis, TraceData,
};

/// Span-count/duration signature used for similar-trace lookup
#[derive(Debug, Clone, Copy)]
struct TraceSignature {
    span_count: usize,
    duration_ms: f64,
}

/// Derives analyses from completed traces and maintains rolling baselines
pub struct TraceProcessor {
    baseline_capacity: usize,
    durations: Mutex<HashMap<String, VecDeque<f64>>>,
    p95: Mutex<HashMap<String, f64>>,
    signatures: Mutex<HashMap<String, TraceSignature>>,
}

impl TraceProcessor {
    /// Create a processor with the configured ring buffer capacity
    pub fn new(config: &TraceConfig) -> Self {
        Self {
            baseline_capacity: config.baseline_capacity,
            durations: Mutex::new(HashMap::new()),
            p95: Mutex::new(HashMap::new()),
            signatures: Mutex::new(HashMap::new()),
        }
    }

    /// Analyze one trace: critical path, bottlenecks against the baselines
    /// accumulated so far, service dependencies, and recommendations.
    /// The trace's own durations roll into the baselines afterwards.
    pub fn process_trace(&self, trace: &TraceData) -> TraceAnalysis {
        let children = child_index(trace);
        let critical_path = critical_path(trace, &children);
        let bottlenecks = self.detect_bottlenecks(trace);
        let service_dependencies = dependency_edges(trace);
        let recommendations = recommendations(trace, &critical_path, &bottlenecks);

        for span in &trace.spans {
            if let Some(duration) = span.duration_ms {
                self.record_duration(&span.baseline_key(), duration);
            }
        }
        self.signatures.lock().insert(
            trace.trace_id.clone(),
            TraceSignature {
                span_count: trace.total_spans,
                duration_ms: trace.duration_ms.unwrap_or(0.0),
            },
        );

        debug!(
            trace_id = %trace.trace_id,
            path_len = critical_path.len(),
            bottlenecks = bottlenecks.len(),
            "Trace processed"
        );

        TraceAnalysis {
            trace_id: trace.trace_id.clone(),
            span_count: trace.total_spans,
            critical_path,
            bottlenecks,
            service_dependencies,
            recommendations,
        }
    }

    fn detect_bottlenecks(&self, trace: &TraceData) -> Vec<Bottleneck> {
        let p95 = self.p95.lock();
        let mut found = Vec::new();

        for span in &trace.spans {
            let Some(duration) = span.duration_ms else {
                continue;
            };
            let Some(&baseline) = p95.get(&span.baseline_key()) else {
                continue;
            };
            if baseline <= 0.0 {
                continue;
            }

            let severity = if duration > baseline * 3.0 {
                BottleneckSeverity::High
            } else if duration > baseline * 2.0 {
                BottleneckSeverity::Medium
            } else {
                continue;
            };

            found.push(Bottleneck {
                span_id: span.span_id.clone(),
                operation_name: span.operation_name.clone(),
                service_name: span.service_name.clone(),
                duration_ms: duration,
                baseline_p95_ms: baseline,
                severity,
            });
        }

        found
    }

    /// Push a duration into the ring buffer for `key` and recompute its p95.
    /// Recomputation over an unchanged buffer is idempotent.
    pub fn record_duration(&self, key: &str, duration_ms: f64) {
        let mut durations = self.durations.lock();
        let ring = durations.entry(key.to_string()).or_default();
        if ring.len() == self.baseline_capacity {
            ring.pop_front();
        }
        ring.push_back(duration_ms);

        let mut sorted: Vec<f64> = ring.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        self.p95
            .lock()
            .insert(key.to_string(), percentile_95(&sorted));
    }

    /// Current p95 baseline for a `service:operation` key
    pub fn baseline_p95(&self, key: &str) -> Option<f64> {
        self.p95.lock().get(key).copied()
    }

    /// Rank previously processed traces by signature similarity to the
    /// given trace. Returns `(trace_id, similarity)` pairs, best first.
    pub fn find_similar_traces(&self, trace_id: &str) -> Vec<(String, f64)> {
        let signatures = self.signatures.lock();
        let Some(&target) = signatures.get(trace_id) else {
            return Vec::new();
        };

        let mut ranked: Vec<(String, f64)> = signatures
            .iter()
            .filter(|(id, _)| id.as_str() != trace_id)
            .map(|(id, sig)| (id.clone(), similarity(target, *sig)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// `sorted[floor(0.95 * n)]`, clamped to the last index
fn percentile_95(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((0.95 * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

fn similarity(a: TraceSignature, b: TraceSignature) -> f64 {
    let span_sim = ratio(a.span_count as f64, b.span_count as f64);
    let duration_sim = ratio(a.duration_ms, b.duration_ms);
    0.5 * span_sim + 0.5 * duration_sim
}

fn ratio(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max <= 0.0 {
        1.0
    } else {
        a.min(b) / max
    }
}

fn child_index(trace: &TraceData) -> HashMap<&str, Vec<&Span>> {
    let mut children: HashMap<&str, Vec<&Span>> = HashMap::new();
    for span in &trace.spans {
        if let Some(parent) = span.parent_span_id.as_deref() {
            children.entry(parent).or_default().push(span);
        }
    }
    children
}

/// Root-to-leaf span id sequence maximizing cumulative duration
fn critical_path(trace: &TraceData, children: &HashMap<&str, Vec<&Span>>) -> Vec<String> {
    let spans_by_id: HashMap<&str, &Span> = trace
        .spans
        .iter()
        .map(|s| (s.span_id.as_str(), s))
        .collect();
    if !spans_by_id.contains_key(trace.root_span_id.as_str()) {
        return Vec::new();
    }

    let mut memo: HashMap<&str, f64> = HashMap::new();
    let mut path = Vec::new();
    let mut current = trace.root_span_id.as_str();

    loop {
        path.push(current.to_string());
        let Some(kids) = children.get(current) else {
            break;
        };
        let next = kids.iter().max_by(|a, b| {
            subtree_duration(a.span_id.as_str(), &spans_by_id, children, &mut memo).total_cmp(
                &subtree_duration(b.span_id.as_str(), &spans_by_id, children, &mut memo),
            )
        });
        match next {
            Some(span) => current = span.span_id.as_str(),
            None => break,
        }
    }

    path
}

/// `path_duration(span) = duration + max(path_duration(child), default 0)`
fn subtree_duration<'a>(
    span_id: &'a str,
    spans_by_id: &HashMap<&'a str, &'a Span>,
    children: &HashMap<&'a str, Vec<&'a Span>>,
    memo: &mut HashMap<&'a str, f64>,
) -> f64 {
    if let Some(&cached) = memo.get(span_id) {
        return cached;
    }

    let own = spans_by_id
        .get(span_id)
        .and_then(|s| s.duration_ms)
        .unwrap_or(0.0);
    let best_child = children
        .get(span_id)
        .map(|kids| {
            kids.iter()
                .map(|k| subtree_duration(k.span_id.as_str(), spans_by_id, children, memo))
                .fold(0.0, f64::max)
        })
        .unwrap_or(0.0);

    let total = own + best_child;
    memo.insert(span_id, total);
    total
}

/// Merge every cross-service parent-child pair into `(source, target)` edges
fn dependency_edges(trace: &TraceData) -> Vec<ServiceDependency> {
    let spans_by_id: HashMap<&str, &Span> = trace
        .spans
        .iter()
        .map(|s| (s.span_id.as_str(), s))
        .collect();

    let mut edges: HashMap<(String, String), u64> = HashMap::new();
    for span in &trace.spans {
        let Some(parent_id) = span.parent_span_id.as_deref() else {
            continue;
        };
        let Some(parent) = spans_by_id.get(parent_id) else {
            continue;
        };
        if parent.service_name != span.service_name {
            *edges
                .entry((parent.service_name.clone(), span.service_name.clone()))
                .or_insert(0) += 1;
        }
    }

    let mut result: Vec<ServiceDependency> = edges
        .into_iter()
        .map(|((source, target), call_count)| ServiceDependency {
            source,
            target,
            call_count,
        })
        .collect();
    result.sort_by(|a, b| {
        b.call_count
            .cmp(&a.call_count)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.target.cmp(&b.target))
    });
    result
}

fn recommendations(
    trace: &TraceData,
    critical_path: &[String],
    bottlenecks: &[Bottleneck],
) -> Vec<String> {
    let mut out = Vec::new();

    for b in bottlenecks {
        if b.severity == BottleneckSeverity::High {
            out.push(format!(
                "Investigate '{}' in service '{}': {:.0}ms against a p95 of {:.0}ms",
                b.operation_name, b.service_name, b.duration_ms, b.baseline_p95_ms
            ));
        }
    }

    if let Some(total) = trace.duration_ms.filter(|d| *d > 0.0) {
        for span_id in critical_path {
            let Some(span) = trace.span(span_id) else {
                continue;
            };
            if span.duration_ms.unwrap_or(0.0) / total > 0.5 && span.span_id != trace.root_span_id
            {
                out.push(format!(
                    "'{}' dominates the critical path of '{}' traces",
                    span.operation_name, span.service_name
                ));
                break;
            }
        }
    }

    out.truncate(5);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::{SpanStatus, TraceStatus};

    fn span(id: &str, parent: Option<&str>, service: &str, op: &str, duration: f64) -> Span {
        Span {
            span_id: id.to_string(),
            trace_id: "t1".to_string(),
            parent_span_id: parent.map(str::to_string),
            operation_name: op.to_string(),
            service_name: service.to_string(),
            agent_name: "agent".to_string(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            duration_ms: Some(duration),
            status: SpanStatus::Ok,
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
            duration_ms: spans[0].duration_ms,
            service_count: 0,
            total_spans: 0,
            error_count: 0,
            status: TraceStatus::Completed,
            spans,
        };
        trace.recompute_aggregates();
        trace
    }

    #[test]
    fn critical_path_of_root_and_child() {
        let processor = TraceProcessor::new(&TraceConfig::default());
        let trace = trace(vec![
            span("root", None, "ingest", "fetch", 30.0),
            span("child", Some("root"), "ingest", "parse", 20.0),
        ]);

        let analysis = processor.process_trace(&trace);
        assert_eq!(analysis.span_count, 2);
        assert_eq!(analysis.critical_path, vec!["root", "child"]);
    }

    #[test]
    fn critical_path_picks_heaviest_subtree() {
        let processor = TraceProcessor::new(&TraceConfig::default());
        // "fast" is the longer direct child, but "slow"'s subtree dominates.
        let trace = trace(vec![
            span("root", None, "ingest", "fetch", 10.0),
            span("fast", Some("root"), "ingest", "headers", 25.0),
            span("slow", Some("root"), "ingest", "body", 20.0),
            span("leaf", Some("slow"), "ingest", "decode", 15.0),
        ]);

        let analysis = processor.process_trace(&trace);
        assert_eq!(analysis.critical_path, vec!["root", "slow", "leaf"]);
    }

    #[test]
    fn p95_uses_floor_index_and_is_idempotent() {
        let processor = TraceProcessor::new(&TraceConfig::default());
        for v in 1..=100 {
            processor.record_duration("svc:op", v as f64);
        }
        // floor(0.95 * 100) = 95 -> 96.0 in the sorted 1..=100 sequence
        assert_eq!(processor.baseline_p95("svc:op"), Some(96.0));

        // Recomputing over the same window must not drift.
        processor.record_duration("other:op", 1.0);
        assert_eq!(processor.baseline_p95("svc:op"), Some(96.0));
    }

    #[test]
    fn p95_of_single_sample_clamps_to_last_index() {
        let processor = TraceProcessor::new(&TraceConfig::default());
        processor.record_duration("svc:op", 100.0);
        assert_eq!(processor.baseline_p95("svc:op"), Some(100.0));
    }

    #[test]
    fn bottleneck_severity_thresholds() {
        let processor = TraceProcessor::new(&TraceConfig::default());
        processor.record_duration("ingest:fetch", 100.0);

        let trace = trace(vec![
            span("root", None, "ingest", "fetch", 350.0),
            span("medium", Some("root"), "ingest", "fetch", 250.0),
            span("fine", Some("root"), "ingest", "fetch", 150.0),
        ]);
        let analysis = processor.process_trace(&trace);

        assert_eq!(analysis.bottlenecks.len(), 2);
        let by_id: HashMap<&str, BottleneckSeverity> = analysis
            .bottlenecks
            .iter()
            .map(|b| (b.span_id.as_str(), b.severity))
            .collect();
        assert_eq!(by_id["root"], BottleneckSeverity::High);
        assert_eq!(by_id["medium"], BottleneckSeverity::Medium);
        assert!(!by_id.contains_key("fine"));
    }

    #[test]
    fn cross_service_edges_are_merged() {
        let processor = TraceProcessor::new(&TraceConfig::default());
        let trace = trace(vec![
            span("root", None, "ingest", "fetch", 50.0),
            span("a", Some("root"), "sentiment", "score", 10.0),
            span("b", Some("root"), "sentiment", "score", 10.0),
            span("c", Some("root"), "ingest", "parse", 5.0),
        ]);

        let analysis = processor.process_trace(&trace);
        assert_eq!(
            analysis.service_dependencies,
            vec![ServiceDependency {
                source: "ingest".to_string(),
                target: "sentiment".to_string(),
                call_count: 2,
            }]
        );
    }

    #[test]
    fn similar_traces_rank_by_signature() {
        let processor = TraceProcessor::new(&TraceConfig::default());

        let mut near = trace(vec![
            span("root", None, "ingest", "fetch", 30.0),
            span("child", Some("root"), "ingest", "parse", 20.0),
        ]);
        near.trace_id = "near".to_string();
        for s in &mut near.spans {
            s.trace_id = "near".to_string();
        }

        let mut far = trace(vec![span("root", None, "ingest", "fetch", 500.0)]);
        far.trace_id = "far".to_string();
        far.duration_ms = Some(500.0);

        let target = trace(vec![
            span("root", None, "ingest", "fetch", 30.0),
            span("child", Some("root"), "ingest", "parse", 25.0),
        ]);

        processor.process_trace(&near);
        processor.process_trace(&far);
        processor.process_trace(&target);

        let ranked = processor.find_similar_traces("t1");
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "near");
        assert!(ranked[0].1 > ranked[1].1);
    }
}
