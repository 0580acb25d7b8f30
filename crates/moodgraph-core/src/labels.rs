//! Label vocabulary and per-label decision thresholds.
//!
//! The label set defines the index space shared by every score vector a
//! model produces. Thresholds are aligned positionally with it. Both come
//! from a checkpoint and are immutable once loaded.

use std::collections::HashSet;

use serde::Serialize;

use crate::CoreError;

/// GoEmotions taxonomy, in training order. Used when a checkpoint carries no labels.
pub const GO_EMOTIONS: &[&str] = &[
    "admiration",
    "amusement",
    "anger",
    "annoyance",
    "approval",
    "caring",
    "confusion",
    "curiosity",
    "desire",
    "disappointment",
    "disapproval",
    "disgust",
    "embarrassment",
    "excitement",
    "fear",
    "gratitude",
    "grief",
    "joy",
    "love",
    "nervousness",
    "optimism",
    "pride",
    "realization",
    "relief",
    "remorse",
    "sadness",
    "surprise",
    "neutral",
];

/// Threshold applied to every label when a checkpoint carries none.
pub const DEFAULT_THRESHOLD: f32 = 0.3;

/// Evaluation metrics attached to a model variant. Passed through untouched.
pub type Metrics = serde_json::Map<String, serde_json::Value>;

/// Ordered label names. Index `i` names position `i` of every score vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    /// Build a label set, rejecting empty or duplicated vocabularies.
    pub fn new(names: Vec<String>) -> Result<Self, CoreError> {
        if names.is_empty() {
            return Err(CoreError::EmptyLabels);
        }
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(CoreError::DuplicateLabel(name.clone()));
            }
        }
        Ok(Self { names })
    }

    /// The 28-label GoEmotions set.
    pub fn go_emotions() -> Self {
        Self {
            names: GO_EMOTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.names
    }
}

/// Per-label decision thresholds, aligned with a [`LabelSet`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ThresholdVector {
    values: Vec<f32>,
}

impl ThresholdVector {
    /// Align `values` with `labels`. Lengths must match.
    pub fn new(values: Vec<f32>, labels: &LabelSet) -> Result<Self, CoreError> {
        if values.len() != labels.len() {
            return Err(CoreError::ThresholdMismatch {
                labels: labels.len(),
                thresholds: values.len(),
            });
        }
        Ok(Self { values })
    }

    /// [`DEFAULT_THRESHOLD`] for every label.
    pub fn uniform(labels: &LabelSet) -> Self {
        Self {
            values: vec![DEFAULT_THRESHOLD; labels.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}
