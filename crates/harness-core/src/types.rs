//! Core type definitions for the training-run harness

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Unique identifier types
pub type RunId = String;
pub type CheckpointId = String;
pub type ModelId = String;
pub type SnapshotId = String;

/// Training step counter
pub type Step = u64;

/// Handle given to the body of a checkpoint write scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveCheckpointData {
    /// Directory where the checkpoint's files should be written
    pub dir: PathBuf,
}

/// Resolved checkpoint details, read-only to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCheckpointData {
    /// Directory that contains the checkpoint's files
    pub dir: PathBuf,

    /// Unique checkpoint identifier
    pub id: CheckpointId,

    /// Global step the checkpoint was taken at
    pub global_step: Step,

    /// Run that produced the checkpoint
    pub run_id: RunId,
}

/// Loaded model details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadModelData {
    /// Directory that contains the model's files
    pub dir: PathBuf,

    /// Unique model identifier
    pub id: ModelId,
}

/// JSON-shaped metric value
///
/// Unlike `serde_json::Value` this can carry non-finite floats, which is what
/// training code produces when a loss diverges. Sinks call [`MetricValue::sanitized`]
/// before storing or transmitting a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<MetricValue>),
    Map(BTreeMap<String, MetricValue>),
}

impl MetricValue {
    /// Replace every non-finite float, at any depth, with `Null`
    pub fn sanitized(self) -> Self {
        match self {
            MetricValue::Float(f) if !f.is_finite() => MetricValue::Null,
            MetricValue::List(items) => {
                MetricValue::List(items.into_iter().map(MetricValue::sanitized).collect())
            }
            MetricValue::Map(entries) => MetricValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.sanitized()))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Convert to a JSON value. Non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetricValue::Null => serde_json::Value::Null,
            MetricValue::Bool(b) => serde_json::Value::Bool(*b),
            MetricValue::Int(i) => serde_json::Value::from(*i),
            MetricValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            MetricValue::String(s) => serde_json::Value::String(s.clone()),
            MetricValue::List(items) => {
                serde_json::Value::Array(items.iter().map(MetricValue::to_json).collect())
            }
            MetricValue::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetricValue::Null)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<f32> for MetricValue {
    fn from(value: f32) -> Self {
        MetricValue::Float(value as f64)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Bool(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::String(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::String(value)
    }
}

impl<T: Into<MetricValue>> From<Vec<T>> for MetricValue {
    fn from(values: Vec<T>) -> Self {
        MetricValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Training run metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMetric {
    /// Global step at which this metric was measured
    pub global_step: Step,

    /// Metric name
    pub tag: String,

    /// Metric value
    pub value: MetricValue,
}

impl SaveMetric {
    pub fn new(global_step: Step, tag: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        Self {
            global_step,
            tag: tag.into(),
            value: value.into(),
        }
    }
}

/// Training run progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveProgress {
    /// Name of the task progress is reported on (e.g. "Evaluation")
    pub operation: String,

    /// Current value of the operation's progress
    pub value: f64,

    /// Expected final value of the operation's progress
    pub final_value: f64,

    /// Units the progress is measured in
    pub units: String,
}

/// A dataset snapshot split selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: SnapshotId,
    pub split: Option<String>,
}

/// Minimal metadata stored next to a datum; extra fields are preserved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatumMetadata {
    /// Unique identifier for the datum
    pub id: String,

    /// Timestamp when the datum was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    /// Additional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Run configuration reference to a dataset snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSnapshotRef {
    pub snapshot_id: SnapshotId,

    /// train, val, or test
    #[serde(default)]
    pub split: Option<String>,
}

/// Run configuration reference to a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub model_id: ModelId,
}

/// Run configuration reference to a checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub checkpoint_id: CheckpointId,
}

/// Schema for cataloging a checkpoint as a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalogConfig {
    /// Artifact type or framework of the model (`pytorch`, `huggingface`, ...)
    pub artifact_type: String,

    /// Mapping from class labels to integer ids
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_labels: Option<HashMap<String, i64>>,

    /// Object key suffixes from the checkpoint to include in the model
    pub copy_key_suffixes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_nested_non_finite() {
        let mut map = BTreeMap::new();
        map.insert("loss".to_string(), MetricValue::Float(f64::NAN));
        map.insert("acc".to_string(), MetricValue::Float(0.5));
        let value = MetricValue::List(vec![
            MetricValue::Float(f64::INFINITY),
            MetricValue::Map(map),
            MetricValue::Int(3),
        ]);

        let json = value.sanitized().to_json();
        assert_eq!(
            json,
            serde_json::json!([null, {"acc": 0.5, "loss": null}, 3])
        );
    }

    #[test]
    fn test_metric_value_deserializes_untagged() {
        let value: MetricValue = serde_json::from_str(r#"{"a": [1, 2.5, "x", true, null]}"#).unwrap();
        let MetricValue::Map(map) = value else {
            panic!("expected a map");
        };
        assert_eq!(
            map["a"],
            MetricValue::List(vec![
                MetricValue::Int(1),
                MetricValue::Float(2.5),
                MetricValue::String("x".to_string()),
                MetricValue::Bool(true),
                MetricValue::Null,
            ])
        );
    }

    #[test]
    fn test_datum_metadata_keeps_extra_fields() {
        let meta: DatumMetadata =
            serde_json::from_str(r#"{"id": "d1", "label": "cat", "created_at": "2024-01-01"}"#)
                .unwrap();
        assert_eq!(meta.id, "d1");
        assert_eq!(meta.created_at.as_deref(), Some("2024-01-01"));
        assert_eq!(meta.extra["label"], "cat");
    }

    #[test]
    fn test_model_catalog_config() {
        let config: ModelCatalogConfig = serde_json::from_str(
            r#"{"artifact_type": "pytorch", "copy_key_suffixes": ["model.pth"]}"#,
        )
        .unwrap();
        assert_eq!(config.artifact_type, "pytorch");
        assert!(config.class_labels.is_none());
    }
}
