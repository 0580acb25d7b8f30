//! The two classifier architectures behind one `forward` contract.
//!
//! Both run the same kind of backbone to get a sentence vector. The baseline
//! projects it with a single linear head. CoTEG instead scores it against a
//! table of label embeddings refined by one graph-convolution step over a
//! learned label adjacency matrix, so co-occurring emotions can pull on each
//! other.

use std::sync::Mutex;

use moodgraph_core::Variant;
use tracing::info;

use crate::ModelError;
use crate::encoder::{Encoding, TextEncoder};
use crate::layers::{LayerNorm, Linear, LinearLayer, dot, relu_in_place};
use crate::weights::{LoadReport, WeightLoader};

/// Added to each adjacency row sum before normalising.
const ADJ_EPS: f32 = 1e-6;

/// Numeric precision a resident model holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Full,
    Int8,
}

/// A resident classifier: token ids in, one logit per label out.
pub trait EmotionModel: Send + Sync {
    fn variant(&self) -> Variant;

    fn num_labels(&self) -> usize;

    fn precision(&self) -> Precision;

    fn forward(&self, encoding: &Encoding) -> Result<Vec<f32>, ModelError>;
}

/// Run the backbone under its lock and check the width it returned.
fn encode(
    encoder: &Mutex<Box<dyn TextEncoder>>,
    encoding: &Encoding,
    hidden_dim: usize,
) -> Result<Vec<f32>, ModelError> {
    let mut encoder = encoder
        .lock()
        .map_err(|_| ModelError::inference("encoder lock poisoned"))?;
    let pooled = encoder.encode(encoding)?;
    if pooled.len() != hidden_dim {
        return Err(ModelError::inference(format!(
            "encoder returned {} values, expected {hidden_dim}",
            pooled.len()
        )));
    }
    Ok(pooled)
}

/// Encoder plus linear classifier.
pub struct BaselineModel {
    encoder: Mutex<Box<dyn TextEncoder>>,
    classifier: LinearLayer,
    hidden_dim: usize,
    num_labels: usize,
}

impl BaselineModel {
    /// Build from weight state. Expects `classifier.weight` `[N, H]` and `classifier.bias` `[N]`.
    pub fn from_weights(
        encoder: Box<dyn TextEncoder>,
        num_labels: usize,
        hidden_dim: usize,
        weights: &mut WeightLoader,
    ) -> Self {
        let mut classifier = Linear::zeros(hidden_dim, num_labels);
        if let Some(w) = weights.take("classifier.weight", &[num_labels, hidden_dim]) {
            let b = weights
                .take("classifier.bias", &[num_labels])
                .unwrap_or_else(|| vec![0.0; num_labels]);
            classifier = Linear::new(w, b, hidden_dim, num_labels);
        } else if let Some(b) = weights.take("classifier.bias", &[num_labels]) {
            classifier = Linear::new(vec![0.0; hidden_dim * num_labels], b, hidden_dim, num_labels);
        }

        Self {
            encoder: Mutex::new(encoder),
            classifier: LinearLayer::Full(classifier),
            hidden_dim,
            num_labels,
        }
    }

    /// Quantize the classifier head to int8. One-way.
    pub fn quantize(self) -> Self {
        Self {
            classifier: self.classifier.quantize(),
            ..self
        }
    }
}

impl EmotionModel for BaselineModel {
    fn variant(&self) -> Variant {
        Variant::Baseline
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn precision(&self) -> Precision {
        if self.classifier.is_quantized() {
            Precision::Int8
        } else {
            Precision::Full
        }
    }

    fn forward(&self, encoding: &Encoding) -> Result<Vec<f32>, ModelError> {
        let text = encode(&self.encoder, encoding, self.hidden_dim)?;
        Ok(self.classifier.forward(&text))
    }
}

/// Encoder plus graph-refined label embeddings.
pub struct CotegModel {
    encoder: Mutex<Box<dyn TextEncoder>>,
    label_embeddings: Vec<f32>,
    gcn_linear: LinearLayer,
    gcn_norm: LayerNorm,
    adjacency: Vec<f32>,
    /// `[N, H]` label vectors after the graph step. Depends only on weights.
    refined: Vec<f32>,
    hidden_dim: usize,
    num_labels: usize,
}

impl CotegModel {
    /// Build from weight state.
    ///
    /// Missing parameters keep their initial values: zero embeddings and
    /// linear weights, unit layer norm, identity adjacency.
    pub fn from_weights(
        encoder: Box<dyn TextEncoder>,
        num_labels: usize,
        hidden_dim: usize,
        weights: &mut WeightLoader,
    ) -> Self {
        let (n, h) = (num_labels, hidden_dim);

        let label_embeddings = weights
            .take("label_embeddings.weight", &[n, h])
            .unwrap_or_else(|| vec![0.0; n * h]);

        let gcn_w = weights
            .take("gcn.linear.weight", &[h, h])
            .unwrap_or_else(|| vec![0.0; h * h]);
        let gcn_b = weights
            .take("gcn.linear.bias", &[h])
            .unwrap_or_else(|| vec![0.0; h]);

        let gamma = weights
            .take("gcn.norm.weight", &[h])
            .unwrap_or_else(|| vec![1.0; h]);
        let beta = weights
            .take("gcn.norm.bias", &[h])
            .unwrap_or_else(|| vec![0.0; h]);

        let adjacency = weights
            .take("A", &[n, n])
            .unwrap_or_else(|| identity(n));

        let mut model = Self {
            encoder: Mutex::new(encoder),
            label_embeddings,
            gcn_linear: LinearLayer::Full(Linear::new(gcn_w, gcn_b, h, h)),
            gcn_norm: LayerNorm::new(gamma, beta),
            adjacency,
            refined: Vec::new(),
            hidden_dim,
            num_labels,
        };
        model.refined = model.refine_labels();
        model
    }

    /// Quantize the graph linear layer to int8 and recompute the refined labels. One-way.
    pub fn quantize(self) -> Self {
        let mut model = Self {
            gcn_linear: self.gcn_linear.quantize(),
            ..self
        };
        model.refined = model.refine_labels();
        model
    }

    /// Row-normalised rectified adjacency: `relu(A) / (rowsum + eps)`.
    fn propagation_matrix(&self) -> Vec<f32> {
        let n = self.num_labels;
        let mut p = self.adjacency.clone();
        relu_in_place(&mut p);
        for row in p.chunks_exact_mut(n) {
            let denom = row.iter().sum::<f32>() + ADJ_EPS;
            for v in row.iter_mut() {
                *v /= denom;
            }
        }
        p
    }

    /// `LayerNorm(relu(P · linear(E)) + E)` for every label row.
    fn refine_labels(&self) -> Vec<f32> {
        let (n, h) = (self.num_labels, self.hidden_dim);
        let p = self.propagation_matrix();

        let transformed: Vec<Vec<f32>> = self
            .label_embeddings
            .chunks_exact(h)
            .map(|e| self.gcn_linear.forward(e))
            .collect();

        let mut refined = Vec::with_capacity(n * h);
        for (i, e) in self.label_embeddings.chunks_exact(h).enumerate() {
            let weights = &p[i * n..(i + 1) * n];
            let mut row = vec![0.0f32; h];
            for (&w, t) in weights.iter().zip(&transformed) {
                if w != 0.0 {
                    for (r, &v) in row.iter_mut().zip(t) {
                        *r += w * v;
                    }
                }
            }
            relu_in_place(&mut row);
            for (r, &x) in row.iter_mut().zip(e) {
                *r += x;
            }
            self.gcn_norm.forward_in_place(&mut row);
            refined.extend(row);
        }
        refined
    }
}

impl EmotionModel for CotegModel {
    fn variant(&self) -> Variant {
        Variant::Coteg
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn precision(&self) -> Precision {
        if self.gcn_linear.is_quantized() {
            Precision::Int8
        } else {
            Precision::Full
        }
    }

    fn forward(&self, encoding: &Encoding) -> Result<Vec<f32>, ModelError> {
        let text = encode(&self.encoder, encoding, self.hidden_dim)?;
        Ok(self
            .refined
            .chunks_exact(self.hidden_dim)
            .map(|label| dot(&text, label))
            .collect())
    }
}

fn identity(n: usize) -> Vec<f32> {
    let mut m = vec![0.0; n * n];
    for i in 0..n {
        m[i * n + i] = 1.0;
    }
    m
}

/// A model built from weights, before any quantization.
pub enum FullPrecisionModel {
    Baseline(BaselineModel),
    Coteg(CotegModel),
}

impl FullPrecisionModel {
    /// Construct the architecture for `variant` and apply the weight state.
    ///
    /// The encoder must report the same hidden width the heads are built for.
    pub fn build(
        variant: Variant,
        encoder: Box<dyn TextEncoder>,
        num_labels: usize,
        hidden_dim: usize,
        mut weights: WeightLoader,
    ) -> Result<(Self, LoadReport), ModelError> {
        if encoder.hidden_dim() != hidden_dim {
            return Err(ModelError::load(
                variant,
                format!(
                    "encoder hidden width {} does not match configured {hidden_dim}",
                    encoder.hidden_dim()
                ),
            ));
        }

        let model = match variant {
            Variant::Baseline => Self::Baseline(BaselineModel::from_weights(
                encoder,
                num_labels,
                hidden_dim,
                &mut weights,
            )),
            Variant::Coteg => Self::Coteg(CotegModel::from_weights(
                encoder,
                num_labels,
                hidden_dim,
                &mut weights,
            )),
        };
        let report = weights.finish()?;
        Ok((model, report))
    }

    /// Consume into an int8 model. The full-precision weights are dropped.
    pub fn quantize(self) -> Box<dyn EmotionModel> {
        let model: Box<dyn EmotionModel> = match self {
            Self::Baseline(m) => Box::new(m.quantize()),
            Self::Coteg(m) => Box::new(m.quantize()),
        };
        info!(variant = %model.variant(), "quantized to int8");
        model
    }

    /// Keep full precision.
    pub fn into_model(self) -> Box<dyn EmotionModel> {
        match self {
            Self::Baseline(m) => Box::new(m),
            Self::Coteg(m) => Box::new(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashingEncoder;
    use crate::weights::{LoadMode, StateDict, TensorData};

    const H: usize = 4;

    fn encoding() -> Encoding {
        Encoding {
            input_ids: vec![0, 42, 7, 2, 1, 1],
            attention_mask: vec![1, 1, 1, 1, 0, 0],
        }
    }

    fn tensor(shape: &[usize], values: Vec<f32>) -> TensorData {
        TensorData::new(shape.to_vec(), values)
    }

    fn loader(variant: Variant, entries: Vec<(&str, TensorData)>) -> WeightLoader {
        let state: StateDict = entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        WeightLoader::new(variant, state, LoadMode::Lenient)
    }

    #[test]
    fn baseline_is_linear_over_pooled_vector() {
        let weights = loader(
            Variant::Baseline,
            vec![
                ("classifier.weight", tensor(&[2, H], vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0])),
                ("classifier.bias", tensor(&[2], vec![0.5, -0.5])),
            ],
        );
        let (model, report) = FullPrecisionModel::build(
            Variant::Baseline,
            Box::new(HashingEncoder::new(H)),
            2,
            H,
            weights,
        )
        .unwrap();
        assert!(report.is_clean());
        let model = model.into_model();

        let mut enc = HashingEncoder::new(H);
        let pooled = enc.encode(&encoding()).unwrap();
        let logits = model.forward(&encoding()).unwrap();
        assert!((logits[0] - (pooled[0] + 0.5)).abs() < 1e-6);
        assert!((logits[1] - (pooled[1] - 0.5)).abs() < 1e-6);
        assert_eq!(model.precision(), Precision::Full);
    }

    #[test]
    fn coteg_identity_graph_with_zero_linear_is_layer_norm_of_embeddings() {
        // With gcn.linear = 0 and no bias, relu(P·0) = 0, so G = LayerNorm(E).
        let e = vec![
            1.0, 2.0, 3.0, 4.0, //
            -1.0, 0.0, 1.0, 0.0,
        ];
        let weights = loader(
            Variant::Coteg,
            vec![("label_embeddings.weight", tensor(&[2, H], e.clone()))],
        );
        let (model, report) =
            FullPrecisionModel::build(Variant::Coteg, Box::new(HashingEncoder::new(H)), 2, H, weights)
                .unwrap();
        assert_eq!(report.missing.len(), 5);
        let model = model.into_model();

        let mut expected = e.clone();
        let norm = LayerNorm::identity(H);
        for row in expected.chunks_exact_mut(H) {
            norm.forward_in_place(row);
        }

        let pooled = HashingEncoder::new(H).encode(&encoding()).unwrap();
        let logits = model.forward(&encoding()).unwrap();
        for (j, row) in expected.chunks_exact(H).enumerate() {
            assert!((logits[j] - dot(&pooled, row)).abs() < 1e-5);
        }
    }

    struct FixedEncoder(Vec<f32>);

    impl TextEncoder for FixedEncoder {
        fn hidden_dim(&self) -> usize {
            self.0.len()
        }

        fn encode(&mut self, _encoding: &Encoding) -> Result<Vec<f32>, ModelError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn coteg_graph_step_matches_hand_computed_logits() {
        // E·Wᵀ+b = [[2,0,1],[0,-1,1]], P = [[0.25,0.75],[0,1]].
        // relu(P·T) + E = [[1.5,0,1],[0,1,1]], then LayerNorm and dot with t.
        let weights = loader(
            Variant::Coteg,
            vec![
                ("label_embeddings.weight", tensor(&[2, 3], vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0])),
                (
                    "gcn.linear.weight",
                    tensor(&[3, 3], vec![2.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0]),
                ),
                ("gcn.linear.bias", tensor(&[3], vec![0.0, 0.0, 1.0])),
                ("gcn.norm.weight", tensor(&[3], vec![1.0; 3])),
                ("gcn.norm.bias", tensor(&[3], vec![0.0; 3])),
                ("A", tensor(&[2, 2], vec![1.0, 3.0, 0.0, 1.0])),
            ],
        );
        let (model, report) = FullPrecisionModel::build(
            Variant::Coteg,
            Box::new(FixedEncoder(vec![1.0, 2.0, 3.0])),
            2,
            3,
            weights,
        )
        .unwrap();
        assert!(report.is_clean());

        let FullPrecisionModel::Coteg(m) = model else {
            panic!("expected coteg");
        };
        let expected_refined = [1.069045, -1.336306, 0.267261, -1.414214, 0.707107, 0.707107];
        for (got, want) in m.refined.iter().zip(expected_refined) {
            assert!((got - want).abs() < 1e-3, "refined {:?}", m.refined);
        }

        let logits = m.forward(&encoding()).unwrap();
        assert!((logits[0] - -0.801783).abs() < 1e-3, "{logits:?}");
        assert!((logits[1] - 2.121320).abs() < 1e-3, "{logits:?}");
    }

    #[test]
    fn adjacency_is_rectified_and_row_normalized() {
        let weights = loader(
            Variant::Coteg,
            vec![("A", tensor(&[2, 2], vec![2.0, -3.0, 1.0, 1.0]))],
        );
        let (model, _) =
            FullPrecisionModel::build(Variant::Coteg, Box::new(HashingEncoder::new(H)), 2, H, weights)
                .unwrap();
        let FullPrecisionModel::Coteg(m) = model else {
            panic!("expected coteg");
        };
        let p = m.propagation_matrix();
        assert!((p[0] - 2.0 / (2.0 + ADJ_EPS)).abs() < 1e-6);
        assert_eq!(p[1], 0.0);
        assert!((p[2] - 0.5).abs() < 1e-5);
        assert!((p[3] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn zero_adjacency_row_does_not_divide_by_zero() {
        let weights = loader(Variant::Coteg, vec![("A", tensor(&[2, 2], vec![0.0; 4]))]);
        let (model, _) =
            FullPrecisionModel::build(Variant::Coteg, Box::new(HashingEncoder::new(H)), 2, H, weights)
                .unwrap();
        let logits = model.into_model().forward(&encoding()).unwrap();
        assert!(logits.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn quantize_changes_precision() {
        let weights = loader(
            Variant::Coteg,
            vec![
                ("label_embeddings.weight", tensor(&[3, H], (0..12).map(|i| i as f32 * 0.1).collect())),
                ("gcn.linear.weight", tensor(&[H, H], (0..16).map(|i| (i as f32 - 8.0) * 0.05).collect())),
            ],
        );
        let (full, _) =
            FullPrecisionModel::build(Variant::Coteg, Box::new(HashingEncoder::new(H)), 3, H, weights)
                .unwrap();
        let model = full.quantize();
        assert_eq!(model.precision(), Precision::Int8);
        assert_eq!(model.num_labels(), 3);
        assert_eq!(model.forward(&encoding()).unwrap().len(), 3);
    }

    #[test]
    fn hidden_width_mismatch_is_load_error() {
        let weights = loader(Variant::Baseline, vec![]);
        let err = FullPrecisionModel::build(
            Variant::Baseline,
            Box::new(HashingEncoder::new(8)),
            2,
            H,
            weights,
        )
        .err()
        .unwrap();
        assert!(matches!(err, ModelError::Load { .. }));
    }
}
