pub mod chunking;
pub mod decision;
mod error;
pub mod labels;
pub mod prediction;

pub use chunking::split_into_chunks;
pub use decision::{FALLBACK_FLOOR, decide, max_pool, sigmoid};
pub use error::CoreError;
pub use labels::{DEFAULT_THRESHOLD, GO_EMOTIONS, LabelSet, Metrics, ThresholdVector};
pub use prediction::{PredictResponse, PredictionResult, Variant};
