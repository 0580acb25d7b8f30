use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use moodgraph_ai::ModelError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Body missing, not JSON, or without a string `text` field.
    #[error("No text provided")]
    InvalidBody,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("inference task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody | Self::Model(ModelError::EmptyInput) => StatusCode::BAD_REQUEST,
            Self::Model(e) if e.is_availability() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Model(_) | Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            warn!(error = %self, "prediction unavailable");
        } else if status.is_server_error() {
            error!(error = %self, "prediction failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moodgraph_core::Variant;
    use std::path::PathBuf;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::InvalidBody.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(ModelError::EmptyInput).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ModelError::Configuration(PathBuf::from("models/x"))).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(ModelError::load(Variant::Coteg, "bad header")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(ModelError::inference("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn empty_input_message_matches_invalid_body() {
        assert_eq!(
            ApiError::from(ModelError::EmptyInput).to_string(),
            ApiError::InvalidBody.to_string()
        );
    }
}
