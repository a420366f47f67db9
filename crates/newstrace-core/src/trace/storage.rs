//! File-backed trace persistence
//!
//! One JSON record per trace id under the configured root. Malformed files
//! are skipped (and logged) by queries so a single bad record cannot take
//! down the store.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{TraceData, TraceQuery, TraceQueryResult, TraceStorageStats};

const TRACE_PREFIX: &str = "trace_";

/// Durable trace store keyed by trace id
pub struct TraceStorage {
    root: PathBuf,
}

impl TraceStorage {
    /// Open (or create) a trace store under `root`. Fails fast when the
    /// path cannot be used as a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| Error::config(format!("invalid trace storage root {}: {e}", root.display())))?;
        if !root.is_dir() {
            return Err(Error::config(format!(
                "trace storage root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    fn path_for(&self, trace_id: &str) -> PathBuf {
        self.root.join(format!("{TRACE_PREFIX}{trace_id}.json"))
    }

    /// Persist one trace, overwriting any previous record for its id
    pub fn store_trace(&self, trace: &TraceData) -> Result<()> {
        let payload = serde_json::to_vec(trace)?;
        fs::write(self.path_for(&trace.trace_id), payload)?;
        debug!(trace_id = %trace.trace_id, "Trace stored");
        Ok(())
    }

    /// Load a trace by id
    pub fn get_trace(&self, trace_id: &str) -> Result<Option<TraceData>> {
        let path = self.path_for(trace_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Delete a trace record; returns whether it existed
    pub fn delete_trace(&self, trace_id: &str) -> Result<bool> {
        let path = self.path_for(trace_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    /// Run a structured query over the stored traces
    pub fn query_traces(&self, query: &TraceQuery) -> Result<TraceQueryResult> {
        let mut matches: Vec<TraceData> = self
            .read_all()?
            .into_iter()
            .filter(|trace| Self::matches(trace, query))
            .collect();

        matches.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let total_count = matches.len();
        let traces: Vec<TraceData> = matches
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        Ok(TraceQueryResult {
            traces,
            total_count,
        })
    }

    fn matches(trace: &TraceData, query: &TraceQuery) -> bool {
        if let Some(has_errors) = query.has_errors {
            if trace.has_errors() != has_errors {
                return false;
            }
        }
        if let Some(service) = &query.service {
            if !trace.spans.iter().any(|s| &s.service_name == service) {
                return false;
            }
        }
        if let Some(start) = query.start_time {
            if trace.started_at < start {
                return false;
            }
        }
        if let Some(end) = query.end_time {
            if trace.started_at >= end {
                return false;
            }
        }
        true
    }

    /// Delete traces that ended more than `retention_days` ago.
    /// Returns the number removed.
    pub fn cleanup(&self, retention_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let mut removed = 0;

        for trace in self.read_all()? {
            let reference = trace.ended_at.unwrap_or(trace.started_at);
            if reference < cutoff && self.delete_trace(&trace.trace_id)? {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, retention_days, "Trace retention sweep");
        }
        Ok(removed)
    }

    /// Totals across the store
    pub fn get_stats(&self) -> Result<TraceStorageStats> {
        let traces = self.read_all()?;
        Ok(TraceStorageStats {
            total_traces: traces.len(),
            total_spans: traces.iter().map(|t| t.total_spans).sum(),
        })
    }

    fn read_all(&self) -> Result<Vec<TraceData>> {
        let mut traces = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(TRACE_PREFIX) || !name.ends_with(".json") {
                continue;
            }
            match fs::read(&path).map_err(Error::from).and_then(|raw| {
                serde_json::from_slice::<TraceData>(&raw).map_err(Error::from)
            }) {
                Ok(trace) => traces.push(trace),
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping unreadable trace record"),
            }
        }
        Ok(traces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::{Span, SpanStatus, TraceStatus};

    fn trace(id: &str, service: &str, errors: usize) -> TraceData {
        let spans: Vec<Span> = (0..2)
            .map(|i| Span {
                span_id: format!("{id}-s{i}"),
                trace_id: id.to_string(),
                parent_span_id: (i > 0).then(|| format!("{id}-s0")),
                operation_name: "op".to_string(),
                service_name: service.to_string(),
                agent_name: "agent".to_string(),
                started_at: Utc::now(),
                ended_at: Some(Utc::now()),
                duration_ms: Some(10.0),
                status: if i < errors {
                    SpanStatus::Error
                } else {
                    SpanStatus::Ok
                },
                attributes: serde_json::json!({}),
                events: Vec::new(),
            })
            .collect();

        let mut trace = TraceData {
            trace_id: id.to_string(),
            root_span_id: format!("{id}-s0"),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            duration_ms: Some(20.0),
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
    fn store_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TraceStorage::new(dir.path()).unwrap();

        let t = trace("abc", "ingest", 0);
        storage.store_trace(&t).unwrap();

        let loaded = storage.get_trace("abc").unwrap().unwrap();
        assert_eq!(loaded.trace_id, "abc");
        assert_eq!(loaded.total_spans, 2);

        assert!(storage.get_trace("missing").unwrap().is_none());
    }

    #[test]
    fn query_filters_by_errors_and_service() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TraceStorage::new(dir.path()).unwrap();

        storage.store_trace(&trace("ok", "ingest", 0)).unwrap();
        storage.store_trace(&trace("bad", "sentiment", 1)).unwrap();

        let errors = storage
            .query_traces(&TraceQuery {
                has_errors: Some(true),
                ..TraceQuery::default()
            })
            .unwrap();
        assert_eq!(errors.total_count, 1);
        assert_eq!(errors.traces[0].trace_id, "bad");

        let by_service = storage
            .query_traces(&TraceQuery {
                service: Some("ingest".to_string()),
                ..TraceQuery::default()
            })
            .unwrap();
        assert_eq!(by_service.total_count, 1);
        assert_eq!(by_service.traces[0].trace_id, "ok");
    }

    #[test]
    fn query_pages_with_total_count() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TraceStorage::new(dir.path()).unwrap();
        for i in 0..5 {
            storage.store_trace(&trace(&format!("t{i}"), "ingest", 0)).unwrap();
        }

        let page = storage
            .query_traces(&TraceQuery {
                limit: 2,
                offset: 2,
                ..TraceQuery::default()
            })
            .unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.traces.len(), 2);
    }

    #[test]
    fn cleanup_removes_only_stale_traces() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TraceStorage::new(dir.path()).unwrap();

        let mut old = trace("old", "ingest", 0);
        old.ended_at = Some(Utc::now() - Duration::days(3));
        storage.store_trace(&old).unwrap();
        storage.store_trace(&trace("fresh", "ingest", 0)).unwrap();

        let removed = storage.cleanup(1).unwrap();
        assert_eq!(removed, 1);
        assert!(storage.get_trace("old").unwrap().is_none());
        assert!(storage.get_trace("fresh").unwrap().is_some());
    }

    #[test]
    fn stats_count_traces_and_spans() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TraceStorage::new(dir.path()).unwrap();
        storage.store_trace(&trace("a", "ingest", 0)).unwrap();
        storage.store_trace(&trace("b", "ingest", 0)).unwrap();

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.total_traces, 2);
        assert_eq!(stats.total_spans, 4);
    }
}
