//! HTTP API for Moodgraph.
//!
//! One prediction endpoint, accepted with or without a trailing slash, plus a
//! health probe. Model loading and inference happen on tokio's blocking pool.

mod context;
mod error;
pub mod handlers;

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use tracing::info;

pub use context::AppContext;
pub use error::{ApiError, ErrorBody};

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/predict", post(handlers::predict))
        .route("/api/predict/", post(handlers::predict))
        .route("/api/health", get(handlers::health))
        .with_state(ctx)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(ctx: AppContext, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use moodgraph_ai::testing::{MockBackend, write_both};
    use moodgraph_ai::{LifecycleConfig, LifecycleManager, Strategy};
    use serde_json::Value;
    use std::path::Path;
    use std::sync::Arc;
    use tower::ServiceExt;

    const H: usize = 8;
    const LABELS: &[&str] = &["joy", "fear", "anger", "neutral"];

    fn app(dir: &Path, backend: MockBackend) -> Router {
        let config = LifecycleConfig {
            model_dir: dir.to_path_buf(),
            strategy: Strategy::JustInTime,
            hidden_dim: H,
            ..Default::default()
        };
        router(AppContext::new(LifecycleManager::from_config(
            config,
            Arc::new(backend),
        )))
    }

    async fn call(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn predict_returns_both_variants() {
        let dir = tempfile::tempdir().unwrap();
        write_both(dir.path(), LABELS, H).unwrap();

        let (status, body) = call(
            app(dir.path(), MockBackend::new(H)),
            Method::POST,
            "/api/predict",
            r#"{"text": "This is great but also terrifying"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        for variant in ["coteg", "baseline"] {
            let result = &body[variant];
            assert!(result["predicted"].is_array(), "{variant}");
            assert_eq!(result["scores"].as_object().unwrap().len(), LABELS.len());
            assert_eq!(result["thresholds"].as_object().unwrap().len(), LABELS.len());
            assert!(result["metrics"].is_object());
        }
        assert_eq!(body["coteg"]["metrics"]["macro_f1"], serde_json::json!(0.53));
    }

    #[tokio::test]
    async fn trailing_slash_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        write_both(dir.path(), LABELS, H).unwrap();
        let (status, _) = call(
            app(dir.path(), MockBackend::new(H)),
            Method::POST,
            "/api/predict/",
            r#"{"text": "Lovely weather today"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn blank_or_missing_text_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        for body in [r#"{"text": "   "}"#, r#"{"text": ""}"#, "{}", "not json", r#"{"text": 5}"#] {
            let (status, json) = call(
                app(dir.path(), MockBackend::new(H)),
                Method::POST,
                "/api/predict",
                body,
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(json["error"], "No text provided", "{body}");
        }
    }

    #[tokio::test]
    async fn get_on_predict_is_method_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let (status, _) = call(
            app(dir.path(), MockBackend::new(H)),
            Method::GET,
            "/api/predict",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn missing_models_is_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (status, json) = call(
            app(dir.path(), MockBackend::new(H)),
            Method::POST,
            "/api/predict",
            r#"{"text": "Hello there"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn broken_tokenizer_is_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        write_both(dir.path(), LABELS, H).unwrap();
        let (status, json) = call(
            app(dir.path(), MockBackend::new(H).with_broken_tokenizer()),
            Method::POST,
            "/api/predict",
            r#"{"text": "Hello there"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(json["error"].as_str().unwrap().contains("tokenizer.json"));
    }

    #[tokio::test]
    async fn inference_failure_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        write_both(dir.path(), LABELS, H).unwrap();
        let (status, json) = call(
            app(dir.path(), MockBackend::new(H).with_failing_encoder(moodgraph_core::Variant::Coteg)),
            Method::POST,
            "/api/predict",
            r#"{"text": "Hello there"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("inference failed"));
    }

    #[tokio::test]
    async fn degraded_response_omits_unloadable_variant() {
        let dir = tempfile::tempdir().unwrap();
        write_both(dir.path(), LABELS, H).unwrap();
        let (status, json) = call(
            app(dir.path(), MockBackend::new(H).without_encoder(moodgraph_core::Variant::Coteg)),
            Method::POST,
            "/api/predict",
            r#"{"text": "Hello there"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.get("coteg").is_none());
        assert!(json["baseline"].is_object());
    }

    #[tokio::test]
    async fn health_reports_model_states() {
        let dir = tempfile::tempdir().unwrap();
        let (status, json) = call(
            app(dir.path(), MockBackend::new(H)),
            Method::GET,
            "/api/health",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["strategy"], "just-in-time");
        assert_eq!(json["metadata_loaded"], false);
        assert_eq!(json["models"]["coteg"], "absent");
        assert_eq!(json["models"]["baseline"], "absent");
    }
}
