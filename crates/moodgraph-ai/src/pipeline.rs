//! Text in, per-variant predictions out.
//!
//! The text is split into clause-level chunks and tokenized once. Each
//! available variant then scores every chunk, the per-chunk probabilities are
//! max-pooled, and the pooled vector goes through the threshold decision.
//! Variants run one after the other, CoTEG first, so under just-in-time
//! loading only one model is ever resident.

use std::time::Instant;

use moodgraph_core::{PredictResponse, PredictionResult, Variant, max_pool, sigmoid, split_into_chunks};
use tracing::{debug, info, warn};

use crate::ModelError;
use crate::encoder::Encoding;
use crate::lifecycle::LifecycleManager;
use crate::model::EmotionModel;

/// Run both variants over `text`.
///
/// A variant that cannot be loaded is left out of the response; if none can,
/// the call fails with [`ModelError::Unavailable`]. A failure while running a
/// loaded model fails the whole request.
pub fn predict(manager: &LifecycleManager, text: &str) -> Result<PredictResponse, ModelError> {
    if text.trim().is_empty() {
        return Err(ModelError::EmptyInput);
    }
    let start = Instant::now();

    let meta = manager.ensure_metadata_loaded()?;
    let chunks = split_into_chunks(text);
    let encodings = chunks
        .iter()
        .map(|chunk| meta.tokenizer.encode(chunk))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(chunks = chunks.len(), "tokenized input");

    let mut response = PredictResponse::default();
    for variant in Variant::ALL {
        let Some(params) = meta.variant(variant) else {
            continue;
        };

        let probs = match manager.with_model(variant, |model| score_chunks(model, &encodings)) {
            Ok(probs) => probs,
            Err(e) if e.is_availability() => {
                warn!(%variant, error = %e, "variant skipped");
                continue;
            }
            Err(e) => return Err(e),
        };

        let result = PredictionResult::from_probabilities(
            &probs,
            &meta.labels,
            &params.thresholds,
            &params.metrics,
        )?;
        debug!(%variant, predicted = ?result.predicted, "variant scored");
        response.insert(variant, result);
    }

    if response.is_empty() {
        return Err(ModelError::Unavailable(
            "no model variant could be loaded".into(),
        ));
    }

    info!(
        chunks = chunks.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "prediction complete"
    );
    Ok(response)
}

/// Element-wise maximum of per-chunk probabilities.
fn score_chunks(model: &dyn EmotionModel, encodings: &[Encoding]) -> Result<Vec<f32>, ModelError> {
    let mut per_chunk = Vec::with_capacity(encodings.len());
    for encoding in encodings {
        let logits = model.forward(encoding)?;
        if logits.len() != model.num_labels() {
            return Err(ModelError::inference(format!(
                "{} model returned {} logits, expected {}",
                model.variant(),
                logits.len(),
                model.num_labels()
            )));
        }
        per_chunk.push(sigmoid(&logits));
    }
    max_pool(per_chunk).ok_or_else(|| ModelError::inference("no chunks to score"))
}
