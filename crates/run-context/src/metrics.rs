//! Metric savers
//!
//! Metric values are sanitized before they are stored: non-finite floats
//! become `Null`, because downstream consumers read them as JSON.

use async_trait::async_trait;
use harness_core::{Result, SaveMetric, ScopedResource};
use parking_lot::Mutex;
use std::sync::Arc;

/// Interface for saving training metrics
#[async_trait]
pub trait MetricSaver: Send + Sync {
    /// Save a batch of metrics
    async fn save_metrics(&self, metrics: Vec<SaveMetric>) -> Result<()>;

    /// Scoped-resource capability query
    fn as_scoped(self: Arc<Self>) -> Option<Arc<dyn ScopedResource>> {
        None
    }
}

/// Replace non-finite values in every metric with `Null`
pub fn encode_metrics(metrics: Vec<SaveMetric>) -> Vec<SaveMetric> {
    metrics
        .into_iter()
        .map(|m| SaveMetric {
            global_step: m.global_step,
            tag: m.tag,
            value: m.value.sanitized(),
        })
        .collect()
}

/// Accumulates metrics in memory
#[derive(Debug, Default)]
pub struct MemoryMetricSaver {
    metrics: Mutex<Vec<SaveMetric>>,
}

impl MemoryMetricSaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every metric saved so far, in save order
    pub fn metrics(&self) -> Vec<SaveMetric> {
        self.metrics.lock().clone()
    }
}

#[async_trait]
impl MetricSaver for MemoryMetricSaver {
    async fn save_metrics(&self, metrics: Vec<SaveMetric>) -> Result<()> {
        let encoded = encode_metrics(metrics);
        self.metrics.lock().extend(encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::MetricValue;

    #[tokio::test]
    async fn test_non_finite_values_are_stored_as_null() {
        let saver = MemoryMetricSaver::new();
        saver
            .save_metrics(vec![
                SaveMetric::new(1, "train/loss", f64::INFINITY),
                SaveMetric::new(1, "train/acc", 0.95),
                SaveMetric::new(2, "train/loss", f64::NAN),
                SaveMetric::new(2, "hist", vec![1.0, f64::NEG_INFINITY]),
            ])
            .await
            .unwrap();

        let stored = saver.metrics();
        assert_eq!(stored.len(), 4);
        assert!(stored[0].value.is_null());
        assert_eq!(stored[1].value, MetricValue::Float(0.95));
        assert!(stored[2].value.is_null());
        assert_eq!(
            stored[3].value,
            MetricValue::List(vec![MetricValue::Float(1.0), MetricValue::Null])
        );
        assert_eq!(stored[0].value.to_json(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_saves_accumulate() {
        let saver = MemoryMetricSaver::new();
        saver.save_metrics(vec![SaveMetric::new(1, "a", 1i64)]).await.unwrap();
        saver.save_metrics(vec![SaveMetric::new(2, "a", 2i64)]).await.unwrap();

        let steps: Vec<_> = saver.metrics().iter().map(|m| m.global_step).collect();
        assert_eq!(steps, vec![1, 2]);
    }
}
