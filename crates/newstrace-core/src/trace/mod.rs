//! Trace pipeline: collection, processing, analysis, and persistence

mod analyzer;
mod collector;
mod processor;
mod storage;

pub use analyzer::TraceAnalyzer;
pub use collector::TraceCollector;
pub use processor::TraceProcessor;
pub use storage::TraceStorage;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{IdentityConfig, TraceConfig};
use crate::error::Result;
use crate::models::TraceData;

/// Wires collector, processor, analyzer, and storage into one pipeline with
/// a single background consumer draining completed traces.
pub struct TracePipeline {
    config: TraceConfig,
    collector: Arc<TraceCollector>,
    processor: Arc<TraceProcessor>,
    analyzer: Arc<TraceAnalyzer>,
    storage: Arc<TraceStorage>,
    cancel: CancellationToken,
}

impl TracePipeline {
    /// Build the pipeline; fails fast on an unusable storage root
    pub fn new(config: TraceConfig, identity: &IdentityConfig) -> Result<Self> {
        let collector = Arc::new(TraceCollector::new(
            config.clone(),
            &identity.service_name,
            &identity.agent_name,
        ));
        let processor = Arc::new(TraceProcessor::new(&config));
        let analyzer = Arc::new(TraceAnalyzer::new(config.clone()));
        let storage = Arc::new(TraceStorage::new(&config.storage_root)?);

        Ok(Self {
            config,
            collector,
            processor,
            analyzer,
            storage,
            cancel: CancellationToken::new(),
        })
    }

    /// The span ingestion surface
    pub fn collector(&self) -> Arc<TraceCollector> {
        Arc::clone(&self.collector)
    }

    /// The per-trace analysis engine
    pub fn processor(&self) -> Arc<TraceProcessor> {
        Arc::clone(&self.processor)
    }

    /// The baseline anomaly detector
    pub fn analyzer(&self) -> Arc<TraceAnalyzer> {
        Arc::clone(&self.analyzer)
    }

    /// The durable trace store
    pub fn storage(&self) -> Arc<TraceStorage> {
        Arc::clone(&self.storage)
    }

    fn handle_completed(&self, traces: Vec<TraceData>) {
        for trace in traces {
            let analysis = self.processor.process_trace(&trace);
            for anomaly in self.analyzer.analyze(&trace, &analysis) {
                warn!(
                    trace_id = %trace.trace_id,
                    kind = ?anomaly.kind,
                    observed = anomaly.observed,
                    expected = anomaly.expected,
                    "Trace anomaly: {}",
                    anomaly.description
                );
            }
            if let Err(e) = self.storage.store_trace(&trace) {
                // Dropped on write failure; the trace is gone but the
                // pipeline keeps serving fresh data.
                error!(trace_id = %trace.trace_id, error = %e, "Failed to persist trace");
            }
        }
    }

    /// Spawn the drain/analyze/persist worker and the retention sweep
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let retention = self.collector.spawn_retention_worker();

        let pipeline = Arc::clone(self);
        let drain = tokio::spawn(async move {
            let mut drain_tick = interval(pipeline.config.drain_interval);
            let mut baseline_tick = interval(pipeline.config.cleanup_interval);
            info!("Trace pipeline started");

            loop {
                tokio::select! {
                    _ = drain_tick.tick() => {
                        pipeline.handle_completed(pipeline.collector.drain_completed());
                    }
                    _ = baseline_tick.tick() => {
                        pipeline.analyzer.update_baselines();
                    }
                    _ = pipeline.cancel.cancelled() => {
                        // Final drain so in-flight completed traces land on disk.
                        pipeline.handle_completed(pipeline.collector.drain_completed());
                        debug!("Trace pipeline stopped");
                        break;
                    }
                }
            }
        });

        vec![retention, drain]
    }

    /// Signal all pipeline workers to stop after a final drain
    pub fn shutdown(&self) {
        self.collector.shutdown();
        self.cancel.cancel();
    }
}
