//! Trace data model and derived analysis types

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::span::{Span, SpanStatus};

/// Status of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    /// Trace is still collecting spans
    #[default]
    Active,
    /// Root span has ended and the trace is closed
    Completed,
}

/// A trace is the full tree of spans for one logical operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceData {
    /// Trace ID
    pub trace_id: String,

    /// Root span ID
    pub root_span_id: String,

    /// Spans in insertion order
    pub spans: Vec<Span>,

    /// When the trace started
    pub started_at: DateTime<Utc>,

    /// When the trace ended (if completed)
    pub ended_at: Option<DateTime<Utc>>,

    /// Total duration in milliseconds
    pub duration_ms: Option<f64>,

    /// Number of distinct services across the spans
    pub service_count: usize,

    /// Number of spans; always equals `spans.len()`
    pub total_spans: usize,

    /// Number of spans with error status
    pub error_count: usize,

    /// Lifecycle status
    pub status: TraceStatus,
}

impl TraceData {
    /// Recompute span/error/service aggregates from the span list
    pub fn recompute_aggregates(&mut self) {
        self.total_spans = self.spans.len();
        self.error_count = self
            .spans
            .iter()
            .filter(|s| s.status == SpanStatus::Error)
            .count();
        self.service_count = self
            .spans
            .iter()
            .map(|s| s.service_name.as_str())
            .collect::<HashSet<_>>()
            .len();
    }

    /// Check if the trace has any errors
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    /// Ratio of failed spans to total spans
    pub fn error_rate(&self) -> f64 {
        if self.total_spans == 0 {
            0.0
        } else {
            self.error_count as f64 / self.total_spans as f64
        }
    }

    /// Find a span by ID
    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.span_id == span_id)
    }
}

/// Severity of a detected bottleneck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BottleneckSeverity {
    /// Duration more than twice the baseline
    Medium,
    /// Duration more than three times the baseline
    High,
}

/// A span whose duration significantly exceeds its rolling baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    /// Offending span
    pub span_id: String,
    /// Operation of the offending span
    pub operation_name: String,
    /// Service of the offending span
    pub service_name: String,
    /// Observed duration
    pub duration_ms: f64,
    /// p95 baseline the duration was compared against
    pub baseline_p95_ms: f64,
    /// Classification
    pub severity: BottleneckSeverity,
}

/// A cross-service call edge in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDependency {
    /// Calling service
    pub source: String,
    /// Called service
    pub target: String,
    /// Number of parent-child pairs merged into this edge
    pub call_count: u64,
}

/// Derived analysis of a single trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceAnalysis {
    /// Trace this analysis describes
    pub trace_id: String,
    /// Number of spans analyzed
    pub span_count: usize,
    /// Root-to-leaf span sequence maximizing cumulative duration
    pub critical_path: Vec<String>,
    /// Spans exceeding their rolling baselines
    pub bottlenecks: Vec<Bottleneck>,
    /// Cross-service call edges
    pub service_dependencies: Vec<ServiceDependency>,
    /// Actionable follow-ups derived from the analysis
    pub recommendations: Vec<String>,
}

/// A point in a latency trend series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Bucket timestamp
    pub timestamp: DateTime<Utc>,
    /// Mean span duration within the bucket
    pub mean_duration_ms: f64,
    /// Spans contributing to the bucket
    pub sample_count: usize,
}

/// Query parameters for listing stored traces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceQuery {
    /// Only traces with (or without) errors
    pub has_errors: Option<bool>,

    /// Only traces touching this service
    pub service: Option<String>,

    /// Only traces started at or after this time
    pub start_time: Option<DateTime<Utc>>,

    /// Only traces started before this time
    pub end_time: Option<DateTime<Utc>>,

    /// Maximum number of results
    pub limit: usize,

    /// Offset for pagination
    pub offset: usize,
}

impl Default for TraceQuery {
    fn default() -> Self {
        Self {
            has_errors: None,
            service: None,
            start_time: None,
            end_time: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// Paged result of a trace query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceQueryResult {
    /// Matching traces within the requested page
    pub traces: Vec<TraceData>,
    /// Total matches before paging
    pub total_count: usize,
}

/// Counts reported by the trace store
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TraceStorageStats {
    /// Persisted traces
    pub total_traces: usize,
    /// Spans across all persisted traces
    pub total_spans: usize,
}
