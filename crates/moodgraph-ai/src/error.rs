use std::path::PathBuf;

use moodgraph_core::{CoreError, Variant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// A required artifact is absent. Not recoverable until deployment is fixed.
    #[error("artifact not found: {0}")]
    Configuration(PathBuf),

    /// A checkpoint or encoder exists but could not be loaded.
    #[error("failed to load {variant} model: {reason}")]
    Load { variant: Variant, reason: String },

    /// A shared artifact (such as the tokenizer) exists but could not be loaded.
    #[error("failed to load {}: {reason}", path.display())]
    Artifact { path: PathBuf, reason: String },

    #[error("No text provided")]
    EmptyInput,

    #[error("inference failed: {0}")]
    Inference(String),

    /// No variant could serve the request.
    #[error("models unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelError {
    pub fn load(variant: Variant, reason: impl std::fmt::Display) -> Self {
        Self::Load {
            variant,
            reason: reason.to_string(),
        }
    }

    pub fn artifact(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Artifact {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn inference(reason: impl std::fmt::Display) -> Self {
        Self::Inference(reason.to_string())
    }

    /// Whether the failure means a model cannot be made resident, as opposed
    /// to a failure while running one.
    pub fn is_availability(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::Load { .. }
                | Self::Artifact { .. }
                | Self::Unavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_failures_are_availability_errors() {
        assert!(ModelError::Configuration(PathBuf::from("models/tokenizer.json")).is_availability());
        assert!(ModelError::load(Variant::Coteg, "truncated header").is_availability());
        assert!(ModelError::artifact("models/tokenizer.json", "expected value").is_availability());
        assert!(ModelError::Unavailable("none".into()).is_availability());
    }

    #[test]
    fn request_failures_are_not_availability_errors() {
        assert!(!ModelError::EmptyInput.is_availability());
        assert!(!ModelError::inference("shape").is_availability());
    }
}
