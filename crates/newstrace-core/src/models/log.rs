//! Log entry data model and query language

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity level of a log entry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Diagnostic detail
    Debug,
    /// Normal operation
    #[default]
    Info,
    /// Something unexpected but recoverable
    Warning,
    /// Operation failed
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A structured log entry, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was produced
    pub timestamp: DateTime<Utc>,

    /// Severity level
    pub level: LogLevel,

    /// Logger that produced the entry
    pub logger_name: String,

    /// Human-readable message
    pub message: String,

    /// Agent that produced the entry
    pub agent_name: String,

    /// Endpoint the entry relates to, if any
    pub endpoint: Option<String>,

    /// Duration of the logged operation, if any
    pub duration_ms: Option<f64>,

    /// Free-form extra data
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LogEntry {
    /// Look up a field by name, covering both typed fields and extra data
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "timestamp" => Some(serde_json::Value::String(self.timestamp.to_rfc3339())),
            "level" => Some(serde_json::Value::String(self.level.to_string())),
            "logger_name" => Some(serde_json::Value::String(self.logger_name.clone())),
            "message" => Some(serde_json::Value::String(self.message.clone())),
            "agent_name" => Some(serde_json::Value::String(self.agent_name.clone())),
            "endpoint" => self
                .endpoint
                .as_ref()
                .map(|e| serde_json::Value::String(e.clone())),
            "duration_ms" => self.duration_ms.and_then(|d| {
                serde_json::Number::from_f64(d).map(serde_json::Value::Number)
            }),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// Comparison operator for a log query filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOperator {
    /// Exact match
    Equals,
    /// Substring match
    Contains,
    /// Value is a member of the provided set
    In,
    /// Regular expression match
    Regex,
}

/// A single field filter within a log query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilter {
    /// Field to match on
    pub field: String,
    /// How to compare
    pub operator: QueryOperator,
    /// Value to compare against (an array for `In`)
    pub value: serde_json::Value,
}

impl LogFilter {
    /// Convenience constructor
    pub fn new(
        field: impl Into<String>,
        operator: QueryOperator,
        value: serde_json::Value,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// Structured query over stored log entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogQuery {
    /// Field filters, all of which must match
    pub filters: Vec<LogFilter>,

    /// Only entries at or after this time
    pub start_time: Option<DateTime<Utc>>,

    /// Only entries before this time
    pub end_time: Option<DateTime<Utc>>,

    /// Maximum number of results
    pub limit: usize,

    /// Offset for pagination
    pub offset: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            start_time: None,
            end_time: None,
            limit: 1000,
            offset: 0,
        }
    }
}

/// Paged result of a log query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogQueryResult {
    /// Matching entries within the requested page
    pub entries: Vec<LogEntry>,
    /// Total matches before paging
    pub total_count: usize,
    /// Whether more matches exist past this page
    pub has_more: bool,
}

/// Counts reported by the log store
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LogStorageStats {
    /// Bucket files on disk
    pub file_count: usize,
    /// Entries across all bucket files
    pub entry_count: usize,
}
