//! Seams to the black-box tokenizer and transformer backbone.
//!
//! The backbone is never reimplemented here. A [`Backend`] hands out a
//! [`Tokenize`] implementation and one [`TextEncoder`] per variant; the ONNX
//! Runtime backend lives in [`crate::onnx`], and a deterministic in-process
//! backend for tests in [`crate::testing`].

use std::path::Path;
use std::sync::Arc;

use moodgraph_core::Variant;

use crate::ModelError;

/// Fixed sequence length for every tokenized chunk.
pub const MAX_SEQ_LEN: usize = 128;

/// Token ids and attention mask for one input, padded or truncated to a fixed length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

impl Encoding {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Text to fixed-length token ids.
pub trait Tokenize: Send + Sync {
    fn encode(&self, text: &str) -> Result<Encoding, ModelError>;
}

/// Transformer backbone producing a sentence representation.
///
/// Implementations pool the first token of the final hidden states.
pub trait TextEncoder: Send {
    fn hidden_dim(&self) -> usize;

    fn encode(&mut self, encoding: &Encoding) -> Result<Vec<f32>, ModelError>;
}

/// Factory for the black-box pieces, resolved against a model directory.
pub trait Backend: Send + Sync {
    fn load_tokenizer(
        &self,
        model_dir: &Path,
        max_length: usize,
    ) -> Result<Arc<dyn Tokenize>, ModelError>;

    /// Load the encoder for `variant`. `prefer_quantized` selects an int8
    /// export when one is available.
    fn load_encoder(
        &self,
        model_dir: &Path,
        variant: Variant,
        prefer_quantized: bool,
    ) -> Result<Box<dyn TextEncoder>, ModelError>;
}

/// Encoder graph file name for a variant.
pub fn encoder_file(variant: Variant, quantized: bool) -> String {
    if quantized {
        format!("{variant}_encoder.int8.onnx")
    } else {
        format!("{variant}_encoder.onnx")
    }
}

pub const TOKENIZER_FILE: &str = "tokenizer.json";
