//! Span and trace lifecycle collection
//!
//! The collector owns the active/completed trace maps for one agent process.
//! Producer calls are non-blocking and never surface errors into callers;
//! an unknown context is logged and ignored.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TraceConfig;
use crate::models::{Span, SpanContext, SpanStatus, TraceData, TraceStatus};

/// Collects spans into traces and manages their lifecycle
pub struct TraceCollector {
    service_name: String,
    agent_name: String,
    config: TraceConfig,
    active_traces: DashMap<String, TraceData>,
    completed_traces: DashMap<String, TraceData>,
    current_trace: Mutex<Option<String>>,
    cancel: CancellationToken,
}

impl TraceCollector {
    /// Create a new collector stamped with the owning process identity
    pub fn new(config: TraceConfig, service_name: &str, agent_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            agent_name: agent_name.to_string(),
            config,
            active_traces: DashMap::new(),
            completed_traces: DashMap::new(),
            current_trace: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn new_span(
        &self,
        trace_id: &str,
        parent_span_id: Option<String>,
        operation_name: &str,
        attributes: serde_json::Value,
    ) -> Span {
        Span {
            span_id: Self::new_id(),
            trace_id: trace_id.to_string(),
            parent_span_id,
            operation_name: operation_name.to_string(),
            service_name: self.service_name.clone(),
            agent_name: self.agent_name.clone(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            status: SpanStatus::Ok,
            attributes,
            events: Vec::new(),
        }
    }

    /// Open a new trace with its root span and register it as active
    pub fn start_trace(&self, operation_name: &str, attributes: serde_json::Value) -> SpanContext {
        let trace_id = Self::new_id();
        let root = self.new_span(&trace_id, None, operation_name, attributes);
        let ctx = root.context();

        let trace = TraceData {
            trace_id: trace_id.clone(),
            root_span_id: root.span_id.clone(),
            started_at: root.started_at,
            ended_at: None,
            duration_ms: None,
            service_count: 1,
            total_spans: 1,
            error_count: 0,
            status: TraceStatus::Active,
            spans: vec![root],
        };

        self.active_traces.insert(trace_id.clone(), trace);
        *self.current_trace.lock() = Some(trace_id);

        debug!(trace_id = %ctx.trace_id, operation = operation_name, "Trace started");
        ctx
    }

    /// Open a child span under the given parent, or an orphan span of the
    /// current trace when no parent is given. Returns `None` when there is
    /// no trace to attach to.
    pub fn start_span(
        &self,
        operation_name: &str,
        parent: Option<&SpanContext>,
        attributes: serde_json::Value,
    ) -> Option<SpanContext> {
        let (trace_id, parent_span_id) = match parent {
            Some(ctx) => (ctx.trace_id.clone(), Some(ctx.span_id.clone())),
            None => match self.current_trace.lock().clone() {
                Some(trace_id) => (trace_id, None),
                None => {
                    warn!(operation = operation_name, "No trace to attach span to");
                    return None;
                }
            },
        };

        let mut trace = match self.active_traces.get_mut(&trace_id) {
            Some(trace) => trace,
            None => {
                warn!(trace_id = %trace_id, operation = operation_name, "Trace is not active");
                return None;
            }
        };

        let span = self.new_span(&trace_id, parent_span_id, operation_name, attributes);
        let ctx = span.context();
        trace.spans.push(span);
        trace.total_spans = trace.spans.len();

        Some(ctx)
    }

    /// Close a span: set end time, duration, status, and merge attributes.
    /// Closing the root span completes the trace.
    pub fn end_span(&self, ctx: &SpanContext, status: SpanStatus, attributes: serde_json::Value) {
        let root_ended = {
            let mut trace = match self.active_traces.get_mut(&ctx.trace_id) {
                Some(trace) => trace,
                None => {
                    warn!(trace_id = %ctx.trace_id, span_id = %ctx.span_id, "end_span on unknown trace");
                    return;
                }
            };

            let root_span_id = trace.root_span_id.clone();
            let Some(span) = trace.spans.iter_mut().find(|s| s.span_id == ctx.span_id) else {
                warn!(trace_id = %ctx.trace_id, span_id = %ctx.span_id, "end_span on unknown span");
                return;
            };

            if span.is_ended() {
                warn!(span_id = %ctx.span_id, "Span already ended");
                return;
            }

            span.ended_at = Some(Utc::now());
            span.calculate_duration();
            span.status = status;
            merge_attributes(&mut span.attributes, attributes);

            root_span_id == ctx.span_id
        };

        if root_ended {
            self.complete_trace(&ctx.trace_id);
        }
    }

    fn complete_trace(&self, trace_id: &str) {
        let Some((_, mut trace)) = self.active_traces.remove(trace_id) else {
            return;
        };

        let ended_at = trace
            .span(&trace.root_span_id)
            .and_then(|root| root.ended_at)
            .unwrap_or_else(Utc::now);
        trace.ended_at = Some(ended_at);
        trace.duration_ms = Some((ended_at - trace.started_at).num_milliseconds() as f64);
        trace.status = TraceStatus::Completed;
        trace.recompute_aggregates();

        debug!(
            trace_id = %trace_id,
            spans = trace.total_spans,
            errors = trace.error_count,
            "Trace completed"
        );

        self.completed_traces.insert(trace_id.to_string(), trace);

        let mut current = self.current_trace.lock();
        if current.as_deref() == Some(trace_id) {
            *current = None;
        }
    }

    /// Remove completed traces older than the configured retention.
    /// Active traces are never touched. Returns the number removed.
    pub fn cleanup_old_traces(&self) -> usize {
        let cutoff = Utc::now() - Duration::hours(self.config.retention_hours);
        let expired: Vec<String> = self
            .completed_traces
            .iter()
            .filter(|entry| entry.ended_at.map(|t| t < cutoff).unwrap_or(false))
            .map(|entry| entry.trace_id.clone())
            .collect();

        for trace_id in &expired {
            self.completed_traces.remove(trace_id);
        }

        if !expired.is_empty() {
            debug!(removed = expired.len(), "Evicted old completed traces");
        }
        expired.len()
    }

    /// Take all completed traces out of the collector, e.g. for persistence
    pub fn drain_completed(&self) -> Vec<TraceData> {
        let ids: Vec<String> = self
            .completed_traces
            .iter()
            .map(|entry| entry.trace_id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| self.completed_traces.remove(id).map(|(_, trace)| trace))
            .collect()
    }

    /// Look up a trace by id in either map
    pub fn get_trace(&self, trace_id: &str) -> Option<TraceData> {
        self.active_traces
            .get(trace_id)
            .map(|t| t.value().clone())
            .or_else(|| {
                self.completed_traces
                    .get(trace_id)
                    .map(|t| t.value().clone())
            })
    }

    /// Number of currently active traces
    pub fn active_count(&self) -> usize {
        self.active_traces.len()
    }

    /// Number of completed traces awaiting drain or eviction
    pub fn completed_count(&self) -> usize {
        self.completed_traces.len()
    }

    /// Spawn the timer-driven retention sweep
    pub fn spawn_retention_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = interval(collector.config.cleanup_interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        collector.cleanup_old_traces();
                    }
                    _ = collector.cancel.cancelled() => {
                        debug!("Trace retention worker stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Signal background workers to stop
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

fn merge_attributes(existing: &mut serde_json::Value, incoming: serde_json::Value) {
    let serde_json::Value::Object(new) = incoming else {
        return;
    };
    match existing {
        serde_json::Value::Object(map) => {
            for (k, v) in new {
                map.insert(k, v);
            }
        }
        other => *other = serde_json::Value::Object(new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collector() -> TraceCollector {
        TraceCollector::new(TraceConfig::default(), "ingest", "crawler-1")
    }

    #[test]
    fn root_span_closure_completes_the_trace() {
        let collector = collector();
        let root = collector.start_trace("fetch_article", json!({"url": "http://example.com"}));
        let child = collector
            .start_span("parse_html", Some(&root), json!({}))
            .unwrap();

        assert_eq!(collector.active_count(), 1);

        collector.end_span(&child, SpanStatus::Ok, json!({}));
        collector.end_span(&root, SpanStatus::Ok, json!({}));

        assert_eq!(collector.active_count(), 0);
        assert_eq!(collector.completed_count(), 1);

        let trace = collector.get_trace(&root.trace_id).unwrap();
        assert_eq!(trace.status, TraceStatus::Completed);
        assert_eq!(trace.total_spans, 2);
        assert_eq!(trace.error_count, 0);
        assert!(trace.duration_ms.is_some());
    }

    #[test]
    fn error_spans_are_counted() {
        let collector = collector();
        let root = collector.start_trace("fact_check", json!({}));
        let child = collector
            .start_span("lookup_claim", Some(&root), json!({}))
            .unwrap();

        collector.end_span(&child, SpanStatus::Error, json!({"reason": "timeout"}));
        collector.end_span(&root, SpanStatus::Ok, json!({}));

        let trace = collector.get_trace(&root.trace_id).unwrap();
        assert_eq!(trace.error_count, 1);
        assert!(trace.has_errors());
    }

    #[test]
    fn orphan_span_attaches_to_current_trace() {
        let collector = collector();
        let root = collector.start_trace("synthesize", json!({}));
        let orphan = collector.start_span("cache_lookup", None, json!({})).unwrap();

        assert_eq!(orphan.trace_id, root.trace_id);

        let trace = collector.get_trace(&root.trace_id).unwrap();
        let span = trace.span(&orphan.span_id).unwrap();
        assert_eq!(span.parent_span_id, None);
    }

    #[test]
    fn span_without_any_trace_is_a_noop() {
        let collector = collector();
        assert!(collector.start_span("stray", None, json!({})).is_none());
    }

    #[test]
    fn cleanup_removes_only_old_completed_traces() {
        let config = TraceConfig {
            retention_hours: 0,
            ..TraceConfig::default()
        };
        let collector = TraceCollector::new(config, "ingest", "crawler-1");

        let done = collector.start_trace("done", json!({}));
        collector.end_span(&done, SpanStatus::Ok, json!({}));
        let _active = collector.start_trace("still_running", json!({}));

        // Retention of zero hours makes every completed trace stale.
        let removed = collector.cleanup_old_traces();
        assert_eq!(removed, 1);
        assert_eq!(collector.completed_count(), 0);
        assert_eq!(collector.active_count(), 1);
    }

    #[test]
    fn drain_takes_completed_traces() {
        let collector = collector();
        let root = collector.start_trace("publish", json!({}));
        collector.end_span(&root, SpanStatus::Ok, json!({}));

        let drained = collector.drain_completed();
        assert_eq!(drained.len(), 1);
        assert_eq!(collector.completed_count(), 0);
    }
}
