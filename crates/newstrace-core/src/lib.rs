//! # Newstrace
//!
//! Observability engine for news-processing agent fleets.
//!
//! Newstrace gives each agent process its own distributed-trace collection
//! and analysis, structured-log aggregation with a file-backed query store,
//! and metrics collection with adaptive baselines and threshold alerting.
//!
//! ## Architecture
//!
//! - **Traces**: span lifecycle, critical-path analysis, rolling p95
//!   baselines, anomaly detection, file-backed storage
//! - **Logs**: non-blocking collection, strategy-driven aggregation,
//!   time-bucketed indexed storage, error/performance/pattern analyses
//! - **Monitoring**: metric registry with EMA baselines, alert rules with
//!   async handler dispatch, host resource bottleneck detection
//! - **API**: per-process Prometheus exposition and health endpoint
//!
//! Each agent process owns its own instances; coordination across the
//! fleet happens only through shared sinks (files, scrape endpoints).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod error;
pub mod logs;
pub mod models;
pub mod monitoring;
pub mod trace;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::api::HttpServer;
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::logs::{LogAggregator, LogAnalyzer, LogCollector, LogStorage};
    pub use crate::models::*;
    pub use crate::monitoring::{CustomMetrics, MetricsCollector, PerformanceMonitor};
    pub use crate::trace::{TraceAnalyzer, TraceCollector, TracePipeline, TraceProcessor, TraceStorage};
}
