//! Per-request prediction output for the two model variants.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::decision::decide;
use crate::labels::{LabelSet, Metrics, ThresholdVector};
use crate::CoreError;

/// The two competing architectures served side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Graph-augmented classifier: label embeddings refined over a label graph.
    Coteg,
    /// Encoder plus a single linear head. The ablation control.
    Baseline,
}

impl Variant {
    /// Request order: CoTEG first, then baseline.
    pub const ALL: [Variant; 2] = [Variant::Coteg, Variant::Baseline];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coteg => "coteg",
            Self::Baseline => "baseline",
        }
    }

    /// Position of this variant in [`Variant::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Self::Coteg => 0,
            Self::Baseline => 1,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision output of one variant for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Selected labels, in label-index order.
    pub predicted: Vec<String>,
    /// Probability for every label, selected or not.
    pub scores: BTreeMap<String, f32>,
    /// Threshold used for every label.
    pub thresholds: BTreeMap<String, f32>,
    pub metrics: Metrics,
}

impl PredictionResult {
    /// Apply the threshold decision to aggregated probabilities and label them.
    pub fn from_probabilities(
        probs: &[f32],
        labels: &LabelSet,
        thresholds: &ThresholdVector,
        metrics: &Metrics,
    ) -> Result<Self, CoreError> {
        if probs.len() != labels.len() {
            return Err(CoreError::ScoreMismatch {
                labels: labels.len(),
                scores: probs.len(),
            });
        }
        if thresholds.len() != labels.len() {
            return Err(CoreError::ThresholdMismatch {
                labels: labels.len(),
                thresholds: thresholds.len(),
            });
        }

        let predicted = decide(probs, thresholds)
            .into_iter()
            .filter_map(|i| labels.get(i).map(str::to_string))
            .collect();

        let scores = labels
            .iter()
            .zip(probs)
            .map(|(l, &p)| (l.to_string(), p))
            .collect();

        let thresholds = labels
            .iter()
            .zip(thresholds.as_slice())
            .map(|(l, &t)| (l.to_string(), t))
            .collect();

        Ok(Self {
            predicted,
            scores,
            thresholds,
            metrics: metrics.clone(),
        })
    }
}

/// Response body of the prediction endpoint.
///
/// A variant that could not be served is omitted rather than failing the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coteg: Option<PredictionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<PredictionResult>,
}

impl PredictResponse {
    pub fn insert(&mut self, variant: Variant, result: PredictionResult) {
        match variant {
            Variant::Coteg => self.coteg = Some(result),
            Variant::Baseline => self.baseline = Some(result),
        }
    }

    pub fn get(&self, variant: Variant) -> Option<&PredictionResult> {
        match variant {
            Variant::Coteg => self.coteg.as_ref(),
            Variant::Baseline => self.baseline.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.coteg.is_none() && self.baseline.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelSet {
        LabelSet::new(vec!["joy".into(), "fear".into(), "anger".into()]).unwrap()
    }

    #[test]
    fn result_reports_every_label() {
        let labels = labels();
        let thr = ThresholdVector::new(vec![0.5, 0.3, 0.3], &labels).unwrap();
        let mut metrics = Metrics::new();
        metrics.insert("macro_f1".into(), serde_json::json!(0.52));

        let result =
            PredictionResult::from_probabilities(&[0.9, 0.31, 0.1], &labels, &thr, &metrics)
                .unwrap();

        assert_eq!(result.predicted, vec!["joy", "fear"]);
        assert_eq!(result.scores.len(), 3);
        assert_eq!(result.thresholds.len(), 3);
        assert_eq!(result.thresholds["joy"], 0.5);
        assert_eq!(result.scores["anger"], 0.1);
        assert_eq!(result.metrics["macro_f1"], serde_json::json!(0.52));
    }

    #[test]
    fn result_rejects_misaligned_scores() {
        let labels = labels();
        let thr = ThresholdVector::uniform(&labels);
        let err = PredictionResult::from_probabilities(&[0.1, 0.2], &labels, &thr, &Metrics::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::ScoreMismatch { labels: 3, scores: 2 }));
    }

    #[test]
    fn response_omits_missing_variant() {
        let labels = labels();
        let thr = ThresholdVector::uniform(&labels);
        let result =
            PredictionResult::from_probabilities(&[0.0; 3], &labels, &thr, &Metrics::new())
                .unwrap();

        let mut response = PredictResponse::default();
        response.insert(Variant::Baseline, result);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("coteg").is_none());
        assert!(json["baseline"]["predicted"].as_array().unwrap().is_empty());
        assert_eq!(json["baseline"]["scores"].as_object().unwrap().len(), 3);
    }

    #[test]
    fn variant_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Variant::Coteg).unwrap(), "\"coteg\"");
        assert_eq!(Variant::Baseline.to_string(), "baseline");
    }
}
