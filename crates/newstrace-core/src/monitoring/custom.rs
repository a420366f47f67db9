//! Domain metrics for the news-processing pipeline

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::monitoring::MetricsCollector;

/// Quality dimensions scored for processed content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMetric {
    /// Factual accuracy score
    Accuracy,
    /// Topical relevance score
    Relevance,
    /// Recency of the underlying sources
    Freshness,
    /// Confidence of the sentiment classification
    SentimentConfidence,
}

impl QualityMetric {
    fn as_str(&self) -> &'static str {
        match self {
            QualityMetric::Accuracy => "accuracy",
            QualityMetric::Relevance => "relevance",
            QualityMetric::Freshness => "freshness",
            QualityMetric::SentimentConfidence => "sentiment_confidence",
        }
    }
}

/// Aggregated processing totals
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Content items ingested
    pub content_ingested: u64,
    /// Processing stages recorded
    pub stages_recorded: u64,
    /// Quality observations recorded
    pub quality_assessments: u64,
    /// Mean stage duration across all recorded stages
    pub avg_stage_duration_ms: f64,
    /// Content items with a running processing timer
    pub active_timers: usize,
}

#[derive(Default)]
struct Counts {
    ingested: u64,
    stages: u64,
    assessments: u64,
    total_stage_ms: f64,
}

/// Thin domain layer over [`MetricsCollector`] for content processing
pub struct CustomMetrics {
    collector: Arc<MetricsCollector>,
    timers: Mutex<HashMap<String, Instant>>,
    counts: Mutex<Counts>,
}

impl CustomMetrics {
    /// Create the domain layer over a collector
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self {
            collector,
            timers: Mutex::new(HashMap::new()),
            counts: Mutex::new(Counts::default()),
        }
    }

    /// Count an ingested content item and start its processing timer
    pub fn record_content_ingestion(
        &self,
        content_type: &str,
        source_type: &str,
        source: &str,
        content_id: &str,
    ) {
        self.collector.record_business_metric(
            "content_ingested",
            1.0,
            &[
                ("content_type", content_type),
                ("source_type", source_type),
                ("source", source),
            ],
        );
        self.timers
            .lock()
            .insert(content_id.to_string(), Instant::now());
        self.counts.lock().ingested += 1;
    }

    /// Record one processing stage for a content item. With no explicit
    /// duration, the elapsed time since ingestion is used; an explicit
    /// duration always wins.
    pub fn record_processing_stage(&self, content_id: &str, stage: &str, duration_ms: Option<f64>) {
        let duration_ms = duration_ms.or_else(|| {
            self.timers
                .lock()
                .get(content_id)
                .map(|started| started.elapsed().as_secs_f64() * 1000.0)
        });

        let Some(duration_ms) = duration_ms else {
            warn!(content_id, stage, "No timer or duration for processing stage");
            return;
        };

        self.collector
            .record_performance_metric(&format!("stage_{stage}"), duration_ms);

        let mut counts = self.counts.lock();
        counts.stages += 1;
        counts.total_stage_ms += duration_ms;
    }

    /// Drop the processing timer for a finished content item
    pub fn complete_content(&self, content_id: &str) {
        self.timers.lock().remove(content_id);
    }

    /// Record quality observations for a content type
    pub fn record_quality_assessment(&self, content_type: &str, scores: &[(QualityMetric, f64)]) {
        for (metric, score) in scores {
            self.collector.record_business_metric(
                &format!("quality_{}", metric.as_str()),
                *score,
                &[("content_type", content_type)],
            );
        }
        self.counts.lock().assessments += scores.len() as u64;
    }

    /// Aggregate processing totals
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let counts = self.counts.lock();
        ProcessingStats {
            content_ingested: counts.ingested,
            stages_recorded: counts.stages,
            quality_assessments: counts.assessments,
            avg_stage_duration_ms: if counts.stages == 0 {
                0.0
            } else {
                counts.total_stage_ms / counts.stages as f64
            },
            active_timers: self.timers.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;

    fn metrics() -> CustomMetrics {
        let collector = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());
        CustomMetrics::new(collector)
    }

    #[test]
    fn ingestion_starts_a_timer_and_counts() {
        let metrics = metrics();
        metrics.record_content_ingestion("article", "rss", "reuters", "c-1");

        let stats = metrics.get_processing_stats();
        assert_eq!(stats.content_ingested, 1);
        assert_eq!(stats.active_timers, 1);

        metrics.complete_content("c-1");
        assert_eq!(metrics.get_processing_stats().active_timers, 0);
    }

    #[test]
    fn explicit_stage_duration_overrides_the_timer() {
        let metrics = metrics();
        metrics.record_content_ingestion("article", "rss", "reuters", "c-1");
        metrics.record_processing_stage("c-1", "dedupe", Some(42.0));

        let history = metrics.collector.history("stage_dedupe_duration_ms");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, 42.0);
    }

    #[test]
    fn stage_without_timer_or_duration_is_skipped() {
        let metrics = metrics();
        metrics.record_processing_stage("never-ingested", "dedupe", None);

        assert_eq!(metrics.get_processing_stats().stages_recorded, 0);
        assert!(metrics.collector.history("stage_dedupe_duration_ms").is_empty());
    }

    #[test]
    fn stage_uses_elapsed_time_from_ingestion() {
        let metrics = metrics();
        metrics.record_content_ingestion("article", "rss", "reuters", "c-1");
        metrics.record_processing_stage("c-1", "sentiment", None);

        let stats = metrics.get_processing_stats();
        assert_eq!(stats.stages_recorded, 1);
        assert!(stats.avg_stage_duration_ms >= 0.0);
    }

    #[test]
    fn quality_scores_are_recorded_per_metric() {
        let metrics = metrics();
        metrics.record_quality_assessment(
            "article",
            &[
                (QualityMetric::Accuracy, 0.92),
                (QualityMetric::Relevance, 0.81),
            ],
        );

        assert_eq!(metrics.get_processing_stats().quality_assessments, 2);
        let accuracy = metrics.collector.history("quality_accuracy");
        assert_eq!(accuracy.len(), 1);
        assert_eq!(accuracy[0].value, 0.92);
        assert_eq!(accuracy[0].labels[0], ("content_type".to_string(), "article".to_string()));
    }
}
