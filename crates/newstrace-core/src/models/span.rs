//! Span data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// Operation completed successfully
    #[default]
    Ok,
    /// Operation failed
    Error,
}

/// A span represents a single timed operation within a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Span ID
    pub span_id: String,

    /// Trace ID this span belongs to
    pub trace_id: String,

    /// Parent span ID (None for the root span and orphan spans)
    pub parent_span_id: Option<String>,

    /// Name of the operation
    pub operation_name: String,

    /// Service that generated this span
    pub service_name: String,

    /// Agent that generated this span
    pub agent_name: String,

    /// When the operation started
    pub started_at: DateTime<Utc>,

    /// When the operation ended (if completed)
    pub ended_at: Option<DateTime<Utc>>,

    /// Duration in milliseconds
    pub duration_ms: Option<f64>,

    /// Status of the operation
    pub status: SpanStatus,

    /// Additional attributes
    pub attributes: serde_json::Value,

    /// Events that occurred during the span
    pub events: Vec<SpanEvent>,
}

/// An event that occurred during a span
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    /// Event name
    pub name: String,

    /// When the event occurred
    pub timestamp: DateTime<Utc>,

    /// Event attributes
    pub attributes: serde_json::Value,
}

/// Handle to an open span, held by producers between start and end calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    /// Trace the span belongs to
    pub trace_id: String,
    /// Span ID
    pub span_id: String,
}

impl Span {
    /// Calculate duration from start and end times
    pub fn calculate_duration(&mut self) {
        if let Some(ended_at) = self.ended_at {
            let duration = ended_at - self.started_at;
            self.duration_ms = Some(duration.num_milliseconds() as f64);
        }
    }

    /// Check if this span has ended
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Baseline key grouping spans of the same kind
    pub fn baseline_key(&self) -> String {
        format!("{}:{}", self.service_name, self.operation_name)
    }

    /// Context handle for this span
    pub fn context(&self) -> SpanContext {
        SpanContext {
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
        }
    }
}
