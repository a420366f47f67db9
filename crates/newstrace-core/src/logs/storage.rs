//! Time-bucketed, optionally indexed log persistence
//!
//! Batches land in hourly bucket files (`logs_<yyyymmdd_HH>.json`, one JSON
//! line per entry). Configured fields are indexed (value -> bucket files) so
//! exact-match queries skip buckets that cannot contain a hit.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::logs::StorageBackend;
use crate::models::{LogEntry, LogFilter, LogQuery, LogQueryResult, LogStorageStats, QueryOperator};

const BUCKET_PREFIX: &str = "logs_";
const INDEX_DIR: &str = "index";

type FieldIndex = HashMap<String, BTreeSet<String>>;

/// Durable log store with hourly buckets and a field index
pub struct LogStorage {
    root: PathBuf,
    indexed_fields: Vec<String>,
    index: Mutex<HashMap<String, FieldIndex>>,
}

impl LogStorage {
    /// Open (or create) a log store under `root`. Fails fast when the path
    /// cannot be used as a directory.
    pub fn new(root: impl AsRef<Path>, indexed_fields: Vec<String>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(INDEX_DIR))
            .map_err(|e| Error::config(format!("invalid log storage root {}: {e}", root.display())))?;

        let mut index = HashMap::new();
        for field in &indexed_fields {
            let path = root.join(INDEX_DIR).join(format!("{field}.json"));
            let loaded: FieldIndex = match fs::read(&path) {
                Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                    warn!(%field, error = %e, "Discarding unreadable index");
                    FieldIndex::new()
                }),
                Err(_) => FieldIndex::new(),
            };
            index.insert(field.clone(), loaded);
        }

        Ok(Self {
            root,
            indexed_fields,
            index: Mutex::new(index),
        })
    }

    fn bucket_name(timestamp: DateTime<Utc>) -> String {
        format!("{BUCKET_PREFIX}{}.json", timestamp.format("%Y%m%d_%H"))
    }

    fn parse_bucket(name: &str) -> Option<DateTime<Utc>> {
        let stem = name.strip_prefix(BUCKET_PREFIX)?.strip_suffix(".json")?;
        let (date, hour) = stem.split_once('_')?;
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
        let hour: u32 = hour.parse().ok()?;
        Some(date.and_hms_opt(hour, 0, 0)?.and_utc())
    }

    /// Append a batch, grouping entries into hourly buckets and updating
    /// the field index. Returns the number of entries written.
    pub fn store_batch(&self, batch: &[LogEntry]) -> Result<usize> {
        let mut by_bucket: HashMap<String, Vec<&LogEntry>> = HashMap::new();
        for entry in batch {
            by_bucket
                .entry(Self::bucket_name(entry.timestamp))
                .or_default()
                .push(entry);
        }

        let mut index = self.index.lock();
        for (bucket, entries) in &by_bucket {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.root.join(bucket))?;
            for entry in entries {
                writeln!(file, "{}", serde_json::to_string(entry)?)?;

                for field in &self.indexed_fields {
                    if let Some(value) = entry.field(field) {
                        index
                            .get_mut(field)
                            .expect("index initialized for every configured field")
                            .entry(value_string(&value))
                            .or_default()
                            .insert(bucket.clone());
                    }
                }
            }
        }
        self.persist_index(&index)?;

        debug!(entries = batch.len(), buckets = by_bucket.len(), "Log batch stored");
        Ok(batch.len())
    }

    fn persist_index(&self, index: &HashMap<String, FieldIndex>) -> Result<()> {
        for (field, map) in index {
            let path = self.root.join(INDEX_DIR).join(format!("{field}.json"));
            fs::write(path, serde_json::to_vec(map)?)?;
        }
        Ok(())
    }

    fn bucket_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(BUCKET_PREFIX) && name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Candidate buckets for a query: time-range pruned, then narrowed by
    /// the index for exact-match filters on indexed fields.
    fn candidate_files(&self, query: &LogQuery) -> Result<Vec<String>> {
        let mut files = self.bucket_files()?;

        files.retain(|name| {
            let Some(bucket_start) = Self::parse_bucket(name) else {
                return true;
            };
            let bucket_end = bucket_start + Duration::hours(1);
            if let Some(start) = query.start_time {
                if bucket_end <= start {
                    return false;
                }
            }
            if let Some(end) = query.end_time {
                if bucket_start >= end {
                    return false;
                }
            }
            true
        });

        let index = self.index.lock();
        for filter in &query.filters {
            if filter.operator != QueryOperator::Equals {
                continue;
            }
            let Some(field_index) = index.get(&filter.field) else {
                continue;
            };
            match field_index.get(&value_string(&filter.value)) {
                Some(buckets) => files.retain(|name| buckets.contains(name)),
                None => return Ok(Vec::new()),
            }
        }

        Ok(files)
    }

    /// Run a structured query over stored entries
    pub fn query_logs(&self, query: &LogQuery) -> Result<LogQueryResult> {
        let prepared: Vec<PreparedFilter> = query
            .filters
            .iter()
            .map(PreparedFilter::new)
            .collect::<Result<_>>()?;

        let mut matches = Vec::new();
        for name in self.candidate_files(query)? {
            let file = fs::File::open(self.root.join(&name))?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                let entry: LogEntry = match serde_json::from_str(&line) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(bucket = %name, error = %e, "Skipping malformed log line");
                        continue;
                    }
                };

                if let Some(start) = query.start_time {
                    if entry.timestamp < start {
                        continue;
                    }
                }
                if let Some(end) = query.end_time {
                    if entry.timestamp >= end {
                        continue;
                    }
                }
                if prepared.iter().all(|f| f.matches(&entry)) {
                    matches.push(entry);
                }
            }
        }

        let total_count = matches.len();
        let entries: Vec<LogEntry> = matches
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        let has_more = query.offset + entries.len() < total_count;

        Ok(LogQueryResult {
            entries,
            total_count,
            has_more,
        })
    }

    /// Delete buckets older than `retention_days`; returns buckets removed
    pub fn cleanup_old_logs(&self, retention_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let mut removed = Vec::new();

        for name in self.bucket_files()? {
            let Some(bucket_start) = Self::parse_bucket(&name) else {
                continue;
            };
            if bucket_start + Duration::hours(1) <= cutoff {
                fs::remove_file(self.root.join(&name))?;
                removed.push(name);
            }
        }

        if !removed.is_empty() {
            let mut index = self.index.lock();
            for field_index in index.values_mut() {
                for buckets in field_index.values_mut() {
                    for name in &removed {
                        buckets.remove(name);
                    }
                }
                field_index.retain(|_, buckets| !buckets.is_empty());
            }
            self.persist_index(&index)?;
            debug!(removed = removed.len(), retention_days, "Log retention sweep");
        }

        Ok(removed.len())
    }

    /// File and entry counts across the store
    pub fn get_storage_stats(&self) -> Result<LogStorageStats> {
        let files = self.bucket_files()?;
        let mut entry_count = 0;
        for name in &files {
            let file = fs::File::open(self.root.join(name))?;
            entry_count += BufReader::new(file).lines().count();
        }
        Ok(LogStorageStats {
            file_count: files.len(),
            entry_count,
        })
    }
}

#[async_trait]
impl StorageBackend for LogStorage {
    fn name(&self) -> &str {
        "log-storage"
    }

    async fn store(&self, batch: &[LogEntry]) -> bool {
        match self.store_batch(batch) {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Log batch write failed");
                false
            }
        }
    }
}

enum Matcher {
    Equals(serde_json::Value),
    Contains(String),
    In(Vec<serde_json::Value>),
    Regex(Regex),
}

struct PreparedFilter {
    field: String,
    matcher: Matcher,
}

impl PreparedFilter {
    /// Validate a filter up front; a bad operator/value combination is a
    /// programmer error and fails the whole query.
    fn new(filter: &LogFilter) -> Result<Self> {
        let matcher = match filter.operator {
            QueryOperator::Equals => Matcher::Equals(filter.value.clone()),
            QueryOperator::Contains => match filter.value.as_str() {
                Some(needle) => Matcher::Contains(needle.to_string()),
                None => {
                    return Err(Error::validation(format!(
                        "contains filter on '{}' requires a string value",
                        filter.field
                    )))
                }
            },
            QueryOperator::In => match filter.value.as_array() {
                Some(values) => Matcher::In(values.clone()),
                None => {
                    return Err(Error::validation(format!(
                        "in filter on '{}' requires an array value",
                        filter.field
                    )))
                }
            },
            QueryOperator::Regex => match filter.value.as_str() {
                Some(pattern) => Matcher::Regex(Regex::new(pattern).map_err(|e| {
                    Error::validation(format!("invalid regex on '{}': {e}", filter.field))
                })?),
                None => {
                    return Err(Error::validation(format!(
                        "regex filter on '{}' requires a string pattern",
                        filter.field
                    )))
                }
            },
        };

        Ok(Self {
            field: filter.field.clone(),
            matcher,
        })
    }

    fn matches(&self, entry: &LogEntry) -> bool {
        let Some(value) = entry.field(&self.field) else {
            return false;
        };
        match &self.matcher {
            Matcher::Equals(expected) => {
                value == *expected || value_string(&value) == value_string(expected)
            }
            Matcher::Contains(needle) => value_string(&value).contains(needle.as_str()),
            Matcher::In(candidates) => candidates
                .iter()
                .any(|c| value == *c || value_string(&value) == value_string(c)),
            Matcher::Regex(regex) => regex.is_match(&value_string(&value)),
        }
    }
}

fn value_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use crate::models::LogLevel;

    fn entry(level: LogLevel, message: &str, agent: &str, age: Duration) -> LogEntry {
        LogEntry {
            timestamp: Utc::now() - age,
            level,
            logger_name: "ingest".to_string(),
            message: message.to_string(),
            agent_name: agent.to_string(),
            endpoint: None,
            duration_ms: None,
            extra: serde_json::Map::new(),
        }
    }

    fn storage(dir: &Path) -> LogStorage {
        LogStorage::new(dir, vec!["level".to_string(), "agent_name".to_string()]).unwrap()
    }

    #[test]
    fn round_trip_with_level_filter() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        storage
            .store_batch(&[
                entry(LogLevel::Info, "started", "svcA", Duration::zero()),
                entry(LogLevel::Error, "broken pipe", "svcA", Duration::zero()),
            ])
            .unwrap();

        let result = storage
            .query_logs(&LogQuery {
                filters: vec![LogFilter::new("level", QueryOperator::Equals, json!("ERROR"))],
                ..LogQuery::default()
            })
            .unwrap();

        assert_eq!(result.total_count, 1);
        assert_eq!(result.entries[0].message, "broken pipe");
        assert!(!result.has_more);
    }

    #[test]
    fn cleanup_keeps_todays_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        storage
            .store_batch(&[
                entry(LogLevel::Info, "old", "svcA", Duration::days(2)),
                entry(LogLevel::Info, "fresh", "svcA", Duration::zero()),
            ])
            .unwrap();
        assert_eq!(storage.get_storage_stats().unwrap().file_count, 2);

        let removed = storage.cleanup_old_logs(1).unwrap();
        assert_eq!(removed, 1);

        let stats = storage.get_storage_stats().unwrap();
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.entry_count, 1);

        let result = storage.query_logs(&LogQuery::default()).unwrap();
        assert_eq!(result.entries[0].message, "fresh");
    }

    #[test]
    fn contains_in_and_regex_operators() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        storage
            .store_batch(&[
                entry(LogLevel::Error, "timeout fetching feed 42", "crawler", Duration::zero()),
                entry(LogLevel::Warning, "retrying feed 42", "crawler", Duration::zero()),
                entry(LogLevel::Info, "done", "publisher", Duration::zero()),
            ])
            .unwrap();

        let contains = storage
            .query_logs(&LogQuery {
                filters: vec![LogFilter::new("message", QueryOperator::Contains, json!("feed"))],
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(contains.total_count, 2);

        let level_in = storage
            .query_logs(&LogQuery {
                filters: vec![LogFilter::new(
                    "level",
                    QueryOperator::In,
                    json!(["ERROR", "WARNING"]),
                )],
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(level_in.total_count, 2);

        let regex = storage
            .query_logs(&LogQuery {
                filters: vec![LogFilter::new(
                    "message",
                    QueryOperator::Regex,
                    json!(r"feed \d+$"),
                )],
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(regex.total_count, 2);
    }

    #[test]
    fn invalid_operator_arguments_fail_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        let bad_regex = storage.query_logs(&LogQuery {
            filters: vec![LogFilter::new("message", QueryOperator::Regex, json!("((("))],
            ..LogQuery::default()
        });
        assert!(matches!(bad_regex, Err(Error::Validation(_))));

        let bad_in = storage.query_logs(&LogQuery {
            filters: vec![LogFilter::new("level", QueryOperator::In, json!("ERROR"))],
            ..LogQuery::default()
        });
        assert!(matches!(bad_in, Err(Error::Validation(_))));
    }

    #[test]
    fn pagination_reports_has_more() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        let batch: Vec<LogEntry> = (0..5)
            .map(|i| entry(LogLevel::Info, &format!("m{i}"), "svcA", Duration::zero()))
            .collect();
        storage.store_batch(&batch).unwrap();

        let page = storage
            .query_logs(&LogQuery {
                limit: 2,
                offset: 0,
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.total_count, 5);
        assert!(page.has_more);

        let last = storage
            .query_logs(&LogQuery {
                limit: 2,
                offset: 4,
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(last.entries.len(), 1);
        assert!(!last.has_more);
    }

    #[test]
    fn index_prunes_buckets_for_exact_matches() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        storage
            .store_batch(&[entry(LogLevel::Info, "only info", "svcA", Duration::zero())])
            .unwrap();

        // The index knows no ERROR bucket exists, so the query short-circuits.
        let result = storage
            .query_logs(&LogQuery {
                filters: vec![LogFilter::new("level", QueryOperator::Equals, json!("ERROR"))],
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(result.total_count, 0);

        // Index survives a reopen.
        drop(storage);
        let reopened = LogStorage::new(
            dir.path(),
            vec!["level".to_string(), "agent_name".to_string()],
        )
        .unwrap();
        let result = reopened
            .query_logs(&LogQuery {
                filters: vec![LogFilter::new("level", QueryOperator::Equals, json!("INFO"))],
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(result.total_count, 1);
    }
}
