//! Axum handlers for the prediction API.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use moodgraph_ai::{ModelError, ModelState, Strategy, pipeline};
use moodgraph_core::{PredictResponse, Variant};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::AppContext;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub strategy: Strategy,
    pub metadata_loaded: bool,
    pub models: BTreeMap<Variant, ModelState>,
}

/// `POST /api/predict`: classify the `text` field with every available variant.
///
/// Inference runs on the blocking pool so the async workers stay free.
pub async fn predict(
    State(ctx): State<AppContext>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        debug!(error = %e, "rejected request body");
        ApiError::InvalidBody
    })?;
    if request.text.trim().is_empty() {
        return Err(ModelError::EmptyInput.into());
    }

    let manager = Arc::clone(&ctx.manager);
    let response =
        tokio::task::spawn_blocking(move || pipeline::predict(&manager, &request.text)).await??;
    Ok(Json(response))
}

/// `GET /api/health`: process liveness plus per-variant residency.
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    let manager = &ctx.manager;
    let models = Variant::ALL
        .into_iter()
        .map(|v| (v, manager.state(v)))
        .collect();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        strategy: manager.config().strategy,
        metadata_loaded: manager.metadata_loaded(),
        models,
    })
}
