//! ONNX Runtime backbone and HuggingFace tokenizer.
//!
//! Each variant ships its fine-tuned RoBERTa encoder as an ONNX graph taking
//! `input_ids` and `attention_mask` and returning `last_hidden_state`. The
//! sentence representation is the first (`<s>`) token of that output.

use std::path::Path;
use std::sync::Arc;

use moodgraph_core::Variant;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::info;

use crate::ModelError;
use crate::encoder::{
    Backend, Encoding, TOKENIZER_FILE, TextEncoder, Tokenize, encoder_file,
};

/// Pad tokens tried in order when `tokenizer.json` carries no padding config.
const PAD_TOKENS: &[&str] = &["<pad>", "[PAD]"];

/// Loads encoders and the tokenizer from files in the model directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxBackend;

impl Backend for OnnxBackend {
    fn load_tokenizer(
        &self,
        model_dir: &Path,
        max_length: usize,
    ) -> Result<Arc<dyn Tokenize>, ModelError> {
        Ok(Arc::new(HfTokenizer::load(
            &model_dir.join(TOKENIZER_FILE),
            max_length,
        )?))
    }

    fn load_encoder(
        &self,
        model_dir: &Path,
        variant: Variant,
        prefer_quantized: bool,
    ) -> Result<Box<dyn TextEncoder>, ModelError> {
        let int8 = model_dir.join(encoder_file(variant, true));
        let path = if prefer_quantized && int8.exists() {
            int8
        } else {
            model_dir.join(encoder_file(variant, false))
        };
        Ok(Box::new(OnnxEncoder::load(&path, variant)?))
    }
}

/// Tokenizer configured for fixed-length output.
pub struct HfTokenizer {
    tokenizer: Tokenizer,
}

impl HfTokenizer {
    pub fn load(path: &Path, max_length: usize) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::Configuration(path.to_path_buf()));
        }

        let mut tokenizer =
            Tokenizer::from_file(path).map_err(|e| ModelError::artifact(path, e))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| ModelError::artifact(path, format!("truncation: {e}")))?;

        // Pad every input to exactly `max_length`, with the vocabulary's own pad token.
        let padding = match tokenizer.get_padding() {
            Some(existing) => tokenizers::PaddingParams {
                strategy: tokenizers::PaddingStrategy::Fixed(max_length),
                ..existing.clone()
            },
            None => {
                let (pad_token, pad_id) = PAD_TOKENS
                    .iter()
                    .find_map(|t| tokenizer.token_to_id(t).map(|id| (t.to_string(), id)))
                    .ok_or_else(|| ModelError::artifact(path, "vocabulary has no pad token"))?;
                tokenizers::PaddingParams {
                    strategy: tokenizers::PaddingStrategy::Fixed(max_length),
                    pad_id,
                    pad_token,
                    ..Default::default()
                }
            }
        };
        tokenizer.with_padding(Some(padding));

        info!(max_length, tokenizer = %path.display(), "loaded tokenizer");
        Ok(Self { tokenizer })
    }
}

impl Tokenize for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Encoding, ModelError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ModelError::inference(format!("tokenize: {e}")))?;

        Ok(Encoding {
            input_ids: encoding.get_ids().iter().map(|&id| id as i64).collect(),
            attention_mask: encoding
                .get_attention_mask()
                .iter()
                .map(|&m| m as i64)
                .collect(),
        })
    }
}

/// One variant's backbone session.
pub struct OnnxEncoder {
    session: Session,
    hidden_dim: usize,
}

impl OnnxEncoder {
    pub fn load(path: &Path, variant: Variant) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::Configuration(path.to_path_buf()));
        }

        let session = open_session(path)
            .map_err(|e| ModelError::load(variant, format!("onnx session: {e}")))?;

        // Infer hidden width from the output shape.
        let hidden_dim = infer_dim(session.outputs()[0].dtype()).unwrap_or(768);

        info!(%variant, hidden_dim, model = %path.display(), "loaded encoder");
        Ok(Self {
            session,
            hidden_dim,
        })
    }
}

impl TextEncoder for OnnxEncoder {
    fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    fn encode(&mut self, encoding: &Encoding) -> Result<Vec<f32>, ModelError> {
        let seq_len = encoding.len();
        let shape = [1i64, seq_len as i64];

        let ids = Tensor::from_array((shape, encoding.input_ids.clone().into_boxed_slice()))
            .map_err(ModelError::inference)?;
        let mask = Tensor::from_array((shape, encoding.attention_mask.clone().into_boxed_slice()))
            .map_err(ModelError::inference)?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask,
            ])
            .map_err(ModelError::inference)?;

        // last_hidden_state: [1, seq_len, hidden].
        let (output_shape, output_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(ModelError::inference)?;
        let dims: &[i64] = output_shape;
        if dims.len() != 3 || dims[0] != 1 || dims[2] as usize != self.hidden_dim {
            return Err(ModelError::inference(format!(
                "unexpected output shape: {dims:?}, expected [1, {seq_len}, {}]",
                self.hidden_dim
            )));
        }

        // First-token pooling: row 0 of the sequence.
        Ok(output_data[..self.hidden_dim].to_vec())
    }
}

fn open_session(path: &Path) -> ort::Result<Session> {
    Ok(Session::builder()?.commit_from_file(path)?)
}

fn infer_dim(output_type: &ort::value::ValueType) -> Option<usize> {
    match output_type {
        ort::value::ValueType::Tensor { shape, .. } => shape
            .last()
            .and_then(|&d| if d > 0 { Some(d as usize) } else { None }),
        _ => None,
    }
}
