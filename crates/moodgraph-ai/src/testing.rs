//! Deterministic in-process backend and checkpoint fixtures.
//!
//! Lets lifecycle, pipeline and server tests run without ONNX Runtime or
//! downloaded models. Scores are meaningless but stable: the same text
//! always yields the same vector.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use moodgraph_core::{Metrics, Variant};
use safetensors::tensor::{Dtype, TensorView};

use crate::ModelError;
use crate::checkpoint::{CheckpointMeta, checkpoint_file};
use crate::encoder::{Backend, Encoding, TextEncoder, Tokenize};

const CLS_ID: i64 = 0;
const PAD_ID: i64 = 1;
const EOS_ID: i64 = 2;
const VOCAB: u64 = 50_000;

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Deterministic value in `[-1, 1)`.
fn unit(seed: u64) -> f32 {
    (splitmix64(seed) >> 40) as f32 / (1u64 << 23) as f32 - 1.0
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Whitespace tokenizer hashing words into a fixed vocabulary.
#[derive(Debug, Clone)]
pub struct HashingTokenizer {
    max_length: usize,
}

impl HashingTokenizer {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Tokenize for HashingTokenizer {
    fn encode(&self, text: &str) -> Result<Encoding, ModelError> {
        let mut ids = vec![CLS_ID];
        ids.extend(
            text.split_whitespace()
                .map(|w| (fnv1a(w) % VOCAB) as i64 + 3)
                .take(self.max_length.saturating_sub(2)),
        );
        ids.push(EOS_ID);

        let used = ids.len();
        ids.resize(self.max_length, PAD_ID);
        let mut mask = vec![1; used];
        mask.resize(self.max_length, 0);

        Ok(Encoding {
            input_ids: ids,
            attention_mask: mask,
        })
    }
}

/// Mean of per-token pseudo-random vectors over the attended tokens.
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    hidden_dim: usize,
    fail: bool,
}

impl HashingEncoder {
    pub fn new(hidden_dim: usize) -> Self {
        Self {
            hidden_dim,
            fail: false,
        }
    }

    /// An encoder whose every call fails.
    pub fn failing(hidden_dim: usize) -> Self {
        Self {
            hidden_dim,
            fail: true,
        }
    }
}

impl TextEncoder for HashingEncoder {
    fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    fn encode(&mut self, encoding: &Encoding) -> Result<Vec<f32>, ModelError> {
        if self.fail {
            return Err(ModelError::inference("simulated encoder failure"));
        }
        let mut pooled = vec![0.0f32; self.hidden_dim];
        let mut count = 0.0f32;
        for (&id, &m) in encoding.input_ids.iter().zip(&encoding.attention_mask) {
            if m == 0 {
                continue;
            }
            for (d, p) in pooled.iter_mut().enumerate() {
                *p += unit((id as u64) << 16 | d as u64);
            }
            count += 1.0;
        }
        if count > 0.0 {
            for p in &mut pooled {
                *p /= count;
            }
        }
        Ok(pooled)
    }
}

/// Backend handing out hashing tokenizers and encoders, with load counters.
#[derive(Debug, Default)]
pub struct MockBackend {
    hidden_dim: usize,
    missing_encoders: Vec<Variant>,
    failing_encoders: Vec<Variant>,
    broken_tokenizer: bool,
    tokenizer_loads: AtomicUsize,
    encoder_loads: AtomicUsize,
}

impl MockBackend {
    pub fn new(hidden_dim: usize) -> Self {
        Self {
            hidden_dim,
            ..Default::default()
        }
    }

    /// Report the encoder for `variant` as absent from disk.
    pub fn without_encoder(mut self, variant: Variant) -> Self {
        self.missing_encoders.push(variant);
        self
    }

    /// Make every forward pass of `variant` fail.
    pub fn with_failing_encoder(mut self, variant: Variant) -> Self {
        self.failing_encoders.push(variant);
        self
    }

    /// Report `tokenizer.json` as present but unparseable.
    pub fn with_broken_tokenizer(mut self) -> Self {
        self.broken_tokenizer = true;
        self
    }

    pub fn tokenizer_loads(&self) -> usize {
        self.tokenizer_loads.load(Ordering::SeqCst)
    }

    pub fn encoder_loads(&self) -> usize {
        self.encoder_loads.load(Ordering::SeqCst)
    }
}

impl Backend for MockBackend {
    fn load_tokenizer(
        &self,
        model_dir: &Path,
        max_length: usize,
    ) -> Result<Arc<dyn Tokenize>, ModelError> {
        self.tokenizer_loads.fetch_add(1, Ordering::SeqCst);
        if self.broken_tokenizer {
            return Err(ModelError::artifact(
                model_dir.join(crate::encoder::TOKENIZER_FILE),
                "expected value at line 1 column 1",
            ));
        }
        Ok(Arc::new(HashingTokenizer::new(max_length)))
    }

    fn load_encoder(
        &self,
        model_dir: &Path,
        variant: Variant,
        _prefer_quantized: bool,
    ) -> Result<Box<dyn TextEncoder>, ModelError> {
        if self.missing_encoders.contains(&variant) {
            return Err(ModelError::Configuration(
                model_dir.join(crate::encoder::encoder_file(variant, false)),
            ));
        }
        self.encoder_loads.fetch_add(1, Ordering::SeqCst);
        if self.failing_encoders.contains(&variant) {
            Ok(Box::new(HashingEncoder::failing(self.hidden_dim)))
        } else {
            Ok(Box::new(HashingEncoder::new(self.hidden_dim)))
        }
    }
}

/// What to put in a fixture checkpoint.
#[derive(Debug, Clone)]
pub struct FixtureSpec {
    pub labels: Vec<String>,
    pub hidden_dim: usize,
    pub write_labels: bool,
    pub thresholds: Option<Vec<f32>>,
    pub metrics: Option<Metrics>,
    pub key_prefix: String,
    pub extra_tensors: Vec<(String, Vec<usize>)>,
    pub seed: u64,
}

impl FixtureSpec {
    pub fn new(labels: Vec<String>, hidden_dim: usize) -> Self {
        Self {
            labels,
            hidden_dim,
            write_labels: true,
            thresholds: None,
            metrics: None,
            key_prefix: String::new(),
            extra_tensors: Vec::new(),
            seed: 7,
        }
    }

    pub fn with_thresholds(mut self, thr: Vec<f32>) -> Self {
        self.thresholds = Some(thr);
        self
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics
            .get_or_insert_with(Metrics::new)
            .insert(name.to_string(), serde_json::json!(value));
        self
    }

    /// Size the weights for the labels but leave `labels` out of the metadata.
    pub fn without_label_metadata(mut self) -> Self {
        self.write_labels = false;
        self
    }

    /// Prefix every tensor name, as legacy exporters do.
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    pub fn with_extra_tensor(mut self, name: &str, shape: Vec<usize>) -> Self {
        self.extra_tensors.push((name.to_string(), shape));
        self
    }

    fn tensors(&self, variant: Variant) -> Vec<(String, Vec<usize>)> {
        let (n, h) = (self.labels.len(), self.hidden_dim);
        let mut out: Vec<(String, Vec<usize>)> = match variant {
            Variant::Baseline => vec![
                ("classifier.weight".into(), vec![n, h]),
                ("classifier.bias".into(), vec![n]),
            ],
            Variant::Coteg => vec![
                ("label_embeddings.weight".into(), vec![n, h]),
                ("gcn.linear.weight".into(), vec![h, h]),
                ("gcn.linear.bias".into(), vec![h]),
                ("gcn.norm.weight".into(), vec![h]),
                ("gcn.norm.bias".into(), vec![h]),
                ("A".into(), vec![n, n]),
            ],
        };
        let backbone = match variant {
            Variant::Baseline => "transformer.embeddings.LayerNorm.weight",
            Variant::Coteg => "text_encoder.transformer.embeddings.LayerNorm.weight",
        };
        out.push((backbone.into(), vec![h]));
        out.extend(self.extra_tensors.iter().cloned());
        out
    }
}

/// Write `<variant>_model.safetensors` into `dir`.
pub fn write_checkpoint(
    dir: &Path,
    variant: Variant,
    spec: &FixtureSpec,
) -> Result<PathBuf, ModelError> {
    let n = spec.labels.len();

    let mut data: Vec<(String, Vec<u8>, Vec<usize>)> = Vec::new();
    for (t, (name, shape)) in spec.tensors(variant).into_iter().enumerate() {
        let len: usize = shape.iter().product();
        let values: Vec<f32> = if name == "A" {
            // Identity plus small positive off-diagonal coupling.
            (0..len)
                .map(|i| if i / n == i % n { 1.0 } else { 0.1 * (unit(spec.seed ^ i as u64) + 1.0) })
                .collect()
        } else if name.ends_with("norm.weight") {
            vec![1.0; len]
        } else {
            (0..len)
                .map(|i| 0.5 * unit(spec.seed.wrapping_mul(31).wrapping_add((t * 10_000 + i) as u64)))
                .collect()
        };
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        data.push((format!("{}{name}", spec.key_prefix), bytes, shape));
    }

    let views = data
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| ModelError::load(variant, e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let meta = CheckpointMeta {
        labels: spec.write_labels.then(|| spec.labels.clone()),
        thresholds: spec.thresholds.clone(),
        metrics: spec.metrics.clone(),
    };
    let metadata: HashMap<String, String> = meta.to_raw();

    let bytes = safetensors::serialize(views, Some(metadata))
        .map_err(|e| ModelError::load(variant, e))?;

    let path = dir.join(checkpoint_file(variant));
    std::fs::write(&path, bytes)?;
    Ok(path)
}

/// Write both checkpoints with the same labels.
pub fn write_both(dir: &Path, labels: &[&str], hidden_dim: usize) -> Result<(), ModelError> {
    let labels: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
    let n = labels.len();
    write_checkpoint(
        dir,
        Variant::Coteg,
        &FixtureSpec::new(labels.clone(), hidden_dim)
            .with_thresholds(vec![0.45; n])
            .with_metric("macro_f1", 0.53),
    )?;
    write_checkpoint(
        dir,
        Variant::Baseline,
        &FixtureSpec::new(labels, hidden_dim)
            .with_thresholds(vec![0.4; n])
            .with_metric("macro_f1", 0.49),
    )?;
    Ok(())
}
