//! Non-blocking log production with a bounded queue and sync fallback
//!
//! Producers call [`LogCollector::log`] from any task; entries ride a
//! bounded channel to a single worker that invokes handlers and forwards
//! to the aggregator. A full queue falls back to synchronous emission so
//! no entry is silently dropped.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::{IdentityConfig, LogConfig};
use crate::error::Result;
use crate::logs::LogAggregator;
use crate::models::{LogEntry, LogLevel};

/// Receives every collected log entry (console, file, custom sinks)
pub trait LogHandler: Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Emit one entry; implementations handle their own failures
    fn handle(&self, entry: &LogEntry);
}

/// Writes entries as single lines to stdout
pub struct ConsoleHandler;

impl LogHandler for ConsoleHandler {
    fn name(&self) -> &str {
        "console"
    }

    fn handle(&self, entry: &LogEntry) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(
            out,
            "{} {:7} [{}] {}",
            entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            entry.level.to_string(),
            entry.agent_name,
            entry.message
        );
    }
}

/// Appends entries as JSON lines to a file
pub struct FileHandler {
    file: Mutex<File>,
}

impl FileHandler {
    /// Open (or create) the target file for appending
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogHandler for FileHandler {
    fn name(&self) -> &str {
        "file"
    }

    fn handle(&self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(line) => {
                let mut file = self.file.lock();
                if let Err(e) = writeln!(file, "{line}") {
                    error!(error = %e, "File handler write failed");
                }
            }
            Err(e) => error!(error = %e, "File handler serialization failed"),
        }
    }
}

/// Collects entries in memory; the custom-handler seam used by tests
#[derive(Default)]
pub struct MemoryLogHandler {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogHandler {
    /// Create an empty collecting handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries handled so far
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }
}

impl LogHandler for MemoryLogHandler {
    fn name(&self) -> &str {
        "memory"
    }

    fn handle(&self, entry: &LogEntry) {
        self.entries.lock().push(entry.clone());
    }
}

/// Non-blocking log producer with a bounded queue and a single drain worker
pub struct LogCollector {
    logger_name: String,
    agent_name: String,
    tx: mpsc::Sender<LogEntry>,
    rx: Mutex<Option<mpsc::Receiver<LogEntry>>>,
    handlers: RwLock<Vec<Arc<dyn LogHandler>>>,
    aggregator: Arc<LogAggregator>,
    cancel: CancellationToken,
}

impl LogCollector {
    /// Create a collector feeding the given aggregator
    pub fn new(config: &LogConfig, identity: &IdentityConfig, aggregator: Arc<LogAggregator>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        Self {
            logger_name: identity.service_name.clone(),
            agent_name: identity.agent_name.clone(),
            tx,
            rx: Mutex::new(Some(rx)),
            handlers: RwLock::new(Vec::new()),
            aggregator,
            cancel: CancellationToken::new(),
        }
    }

    /// Register a handler invoked for every entry
    pub fn register_handler(&self, handler: Arc<dyn LogHandler>) {
        self.handlers.write().push(handler);
    }

    fn build_entry(
        &self,
        level: LogLevel,
        message: &str,
        mut extra: serde_json::Map<String, serde_json::Value>,
    ) -> LogEntry {
        let endpoint = extra
            .remove("endpoint")
            .and_then(|v| v.as_str().map(str::to_string));
        let duration_ms = extra.remove("duration_ms").and_then(|v| v.as_f64());

        LogEntry {
            timestamp: Utc::now(),
            level,
            logger_name: self.logger_name.clone(),
            message: message.to_string(),
            agent_name: self.agent_name.clone(),
            endpoint,
            duration_ms,
            extra,
        }
    }

    /// Construct an entry and enqueue it without blocking. On a full queue
    /// the entry is emitted synchronously instead of being dropped.
    pub fn log(
        &self,
        level: LogLevel,
        message: &str,
        extra: serde_json::Map<String, serde_json::Value>,
    ) {
        let entry = self.build_entry(level, message, extra);
        if let Err(send_error) = self.tx.try_send(entry) {
            let entry = match send_error {
                mpsc::error::TrySendError::Full(entry) => {
                    debug!("Log queue full, emitting synchronously");
                    entry
                }
                mpsc::error::TrySendError::Closed(entry) => {
                    warn!("Log worker stopped, emitting synchronously");
                    entry
                }
            };
            self.emit_sync(entry);
        }
    }

    fn emit_sync(&self, entry: LogEntry) {
        let handlers: Vec<Arc<dyn LogHandler>> = self.handlers.read().clone();
        for handler in handlers {
            handler.handle(&entry);
        }
        self.aggregator.enqueue(entry);
    }

    /// Log at DEBUG level
    pub fn debug(&self, message: &str, extra: serde_json::Map<String, serde_json::Value>) {
        self.log(LogLevel::Debug, message, extra);
    }

    /// Log at INFO level
    pub fn info(&self, message: &str, extra: serde_json::Map<String, serde_json::Value>) {
        self.log(LogLevel::Info, message, extra);
    }

    /// Log at WARNING level
    pub fn warning(&self, message: &str, extra: serde_json::Map<String, serde_json::Value>) {
        self.log(LogLevel::Warning, message, extra);
    }

    /// Log at ERROR level
    pub fn error(&self, message: &str, extra: serde_json::Map<String, serde_json::Value>) {
        self.log(LogLevel::Error, message, extra);
    }

    /// Log an error value with its source chain serialized into extra data
    pub fn log_error(
        &self,
        err: &(dyn std::error::Error + 'static),
        mut context: serde_json::Map<String, serde_json::Value>,
    ) {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(serde_json::Value::String(cause.to_string()));
            source = cause.source();
        }
        context.insert(
            "error".to_string(),
            serde_json::Value::String(err.to_string()),
        );
        context.insert("error_chain".to_string(), serde_json::Value::Array(chain));
        self.log(LogLevel::Error, &err.to_string(), context);
    }

    async fn dispatch(&self, entry: LogEntry) {
        let handlers: Vec<Arc<dyn LogHandler>> = self.handlers.read().clone();
        for handler in handlers {
            handler.handle(&entry);
        }
        self.aggregator.add(entry).await;
    }

    /// Spawn the single drain worker. On shutdown the queue is drained
    /// before the worker exits so no accepted entry is lost.
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        let mut rx = {
            let mut guard = collector.rx.lock();
            match guard.take() {
                Some(rx) => rx,
                None => {
                    error!("Log worker already started");
                    return tokio::spawn(async {});
                }
            }
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => {
                        match received {
                            Some(entry) => collector.dispatch(entry).await,
                            None => break,
                        }
                    }
                    _ = collector.cancel.cancelled() => {
                        while let Ok(entry) = rx.try_recv() {
                            collector.dispatch(entry).await;
                        }
                        break;
                    }
                }
            }
            debug!("Log worker stopped");
        })
    }

    /// Signal the worker to drain and stop
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
