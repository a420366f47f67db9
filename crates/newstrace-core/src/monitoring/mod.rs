//! Metrics collection, adaptive baselines, alerting, and host monitoring

mod collector;
mod custom;
mod handlers;
mod performance;

pub use collector::MetricsCollector;
pub use custom::{CustomMetrics, ProcessingStats, QualityMetric};
pub use handlers::{AlertHandler, MemoryAlertHandler, TracingAlertHandler, WebhookAlertHandler};
pub use performance::{BottleneckReport, PerformanceMonitor};
