//! Strategy-driven log buffering and delivery to storage backends

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::LogEntry;

/// Destination for flushed log batches
///
/// Implementations report success as a bool and handle their own errors;
/// a failed batch is dropped and the next flush carries fresh data.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name used in flush diagnostics
    fn name(&self) -> &str;

    /// Persist one batch; returns false on failure
    async fn store(&self, batch: &[LogEntry]) -> bool;
}

/// Policy governing when buffered entries are flushed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlushStrategy {
    /// Flush when the oldest buffered entry is at least this old
    TimeWindow {
        /// Maximum buffering delay
        #[serde(with = "humantime_serde")]
        window: Duration,
    },
    /// Flush as soon as the buffer reaches this many entries
    SizeBased {
        /// Batch size triggering a flush
        max_batch_size: usize,
    },
    /// Flush as soon as this many events are buffered
    EventCount {
        /// Event count triggering a flush
        max_events: usize,
    },
}

#[derive(Default)]
struct Buffer {
    entries: Vec<LogEntry>,
    first_at: Option<Instant>,
}

/// Buffers log entries and fans flushed batches out to registered backends
pub struct LogAggregator {
    strategy: FlushStrategy,
    buffer: Mutex<Buffer>,
    backends: RwLock<Vec<Arc<dyn StorageBackend>>>,
    cancel: CancellationToken,
}

impl LogAggregator {
    /// Create an aggregator with the given flush strategy
    pub fn new(strategy: FlushStrategy) -> Self {
        Self {
            strategy,
            buffer: Mutex::new(Buffer::default()),
            backends: RwLock::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a storage backend to receive flushed batches
    pub fn register_backend(&self, backend: Arc<dyn StorageBackend>) {
        self.backends.write().push(backend);
    }

    /// Number of currently buffered entries
    pub fn buffered(&self) -> usize {
        self.buffer.lock().entries.len()
    }

    /// Buffer an entry without flushing. Used on the synchronous fallback
    /// path where awaiting is not an option; the worker tick or shutdown
    /// flush picks the entry up later.
    pub fn enqueue(&self, entry: LogEntry) {
        let mut buffer = self.buffer.lock();
        if buffer.first_at.is_none() {
            buffer.first_at = Some(Instant::now());
        }
        buffer.entries.push(entry);
    }

    /// Buffer an entry and flush immediately when the strategy says so
    pub async fn add(&self, entry: LogEntry) {
        let should_flush = {
            let mut buffer = self.buffer.lock();
            if buffer.first_at.is_none() {
                buffer.first_at = Some(Instant::now());
            }
            buffer.entries.push(entry);

            match &self.strategy {
                FlushStrategy::SizeBased { max_batch_size } => {
                    buffer.entries.len() >= *max_batch_size
                }
                FlushStrategy::EventCount { max_events } => buffer.entries.len() >= *max_events,
                FlushStrategy::TimeWindow { window } => buffer
                    .first_at
                    .map(|t| t.elapsed() >= *window)
                    .unwrap_or(false),
            }
        };

        if should_flush {
            self.flush().await;
        }
    }

    /// Deliver the buffered batch to every backend and clear the buffer.
    /// A no-op on an empty buffer. Returns the number of entries flushed.
    pub async fn flush(&self) -> usize {
        let batch = {
            let mut buffer = self.buffer.lock();
            buffer.first_at = None;
            std::mem::take(&mut buffer.entries)
        };
        if batch.is_empty() {
            return 0;
        }

        let backends: Vec<Arc<dyn StorageBackend>> = self.backends.read().clone();
        for backend in backends {
            if !backend.store(&batch).await {
                warn!(
                    backend = backend.name(),
                    entries = batch.len(),
                    "Backend rejected log batch"
                );
            }
        }

        debug!(entries = batch.len(), "Log batch flushed");
        batch.len()
    }

    /// Spawn the periodic flush loop. For time-window buffering this ticks
    /// at the window; otherwise it only waits for shutdown to final-flush.
    pub fn spawn_flush_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            match aggregator.strategy {
                FlushStrategy::TimeWindow { window } => {
                    let mut tick = interval(window);
                    loop {
                        tokio::select! {
                            _ = tick.tick() => {
                                aggregator.flush().await;
                            }
                            _ = aggregator.cancel.cancelled() => break,
                        }
                    }
                }
                _ => aggregator.cancel.cancelled().await,
            }
            aggregator.flush().await;
            debug!("Log aggregator stopped");
        })
    }

    /// Final flush, then stop the background loop
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.flush().await;
    }
}

/// In-memory backend for tests and embedding
#[derive(Default)]
pub struct MemoryBackend {
    batches: Mutex<Vec<Vec<LogEntry>>>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches stored so far
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// All entries stored so far, flattened
    pub fn entries(&self) -> Vec<LogEntry> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(&self, batch: &[LogEntry]) -> bool {
        self.batches.lock().push(batch.to_vec());
        true
    }
}
