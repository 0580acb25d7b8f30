//! Model loading, residency and inference for Moodgraph.
//!
//! Checkpoints are read from safetensors files, assembled into one of two
//! classifier architectures, optionally quantized to int8, and kept resident
//! or released according to the configured [`Strategy`]. The transformer
//! backbone and tokenizer come from a [`Backend`]; enable the `onnx` feature
//! for the ONNX Runtime one.

pub mod checkpoint;
pub mod encoder;
mod error;
pub mod layers;
pub mod lifecycle;
pub mod model;
pub mod pipeline;
pub mod weights;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use checkpoint::{CheckpointMeta, CheckpointSource, FileCheckpointStore};
pub use encoder::{Backend, Encoding, MAX_SEQ_LEN, TextEncoder, Tokenize};
pub use error::ModelError;
pub use lifecycle::{
    LifecycleConfig, LifecycleManager, Metadata, ModelState, Startup, Strategy, VariantMeta,
};
pub use model::{EmotionModel, Precision};
pub use pipeline::predict;
pub use weights::{LoadMode, LoadReport};

#[cfg(feature = "onnx")]
pub use onnx::OnnxBackend;
