//! Container HTTP handlers

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use medgemma_core::{GenerationResponse, MedgemmaError};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::input::{
    accepts_event_stream, check_content_type, decode_prompt, generation_params, parse_request,
};
use crate::state::AppState;
use crate::streaming::generation_events;

/// Create the container router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/invocations", post(invocations))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP status for a handler error
pub fn status_for(err: &MedgemmaError) -> StatusCode {
    match err {
        MedgemmaError::InvalidRequest(_) | MedgemmaError::Serialization(_) => {
            StatusCode::BAD_REQUEST
        }
        MedgemmaError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        MedgemmaError::ModelNotLoaded(_) => StatusCode::SERVICE_UNAVAILABLE,
        MedgemmaError::Backend(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: MedgemmaError) -> (StatusCode, String) {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(status = %status, error = %err, "Invocation failed");
    } else {
        info!(status = %status, error = %err, "Invocation rejected");
    }
    (status, err.to_string())
}

/// Health check: 200 once the model is loaded
async fn ping(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.is_loaded() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Run one invocation
async fn invocations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, (StatusCode, String)> {
    let header_value = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    check_content_type(header_value(header::CONTENT_TYPE)).map_err(reject)?;
    let request = parse_request(&body).map_err(reject)?;
    let prompt = decode_prompt(&request).map_err(reject)?;
    let params = generation_params(&request);
    let stream = request.stream || accepts_event_stream(header_value(header::ACCEPT));

    let model = state.load().await.map_err(reject)?;
    let generator = model.generator();

    info!(
        generator = generator.name(),
        messages = prompt.messages.len(),
        images = prompt.has_images(),
        max_new_tokens = params.max_new_tokens,
        stream,
        "Invocation"
    );

    if stream {
        let generation = &state.config().generation;
        let events = generation_events(
            generator,
            prompt,
            params,
            generation.stream_buffer,
            Duration::from_secs(generation.stream_timeout_secs),
        );
        return Ok(Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let generated_text = generator.generate(&prompt, &params).await.map_err(reject)?;
    Ok(Json(GenerationResponse { generated_text }).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LoadedModel;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use medgemma_core::{GenerationParams, MedgemmaResult, Prompt, ServingConfig};
    use medgemma_runtime::Generator;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct FakeGenerator {
        chunks: Vec<&'static str>,
        fail_with: Option<&'static str>,
        stall: bool,
    }

    impl FakeGenerator {
        fn new(chunks: Vec<&'static str>) -> Self {
            Self {
                chunks,
                fail_with: None,
                stall: false,
            }
        }
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        async fn generate(&self, _prompt: &Prompt, _params: &GenerationParams) -> MedgemmaResult<String> {
            match self.fail_with {
                Some(message) => Err(MedgemmaError::Backend(message.to_string())),
                None => Ok(self.chunks.concat()),
            }
        }

        async fn generate_stream(
            &self,
            _prompt: &Prompt,
            _params: &GenerationParams,
            sender: mpsc::Sender<String>,
        ) -> MedgemmaResult<()> {
            for chunk in &self.chunks {
                if sender.send(chunk.to_string()).await.is_err() {
                    return Ok(());
                }
            }
            if self.stall {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            match self.fail_with {
                Some(message) => Err(MedgemmaError::Backend(message.to_string())),
                None => Ok(()),
            }
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn router(generator: FakeGenerator) -> Router {
        let mut config = ServingConfig::default();
        config.generation.stream_timeout_secs = 1;
        let model = LoadedModel::new(Arc::new(generator), None);
        create_router(Arc::new(AppState::with_model(config, model)))
    }

    fn invocation(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/invocations")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    const TEXT_REQUEST: &str = r#"{"messages":[{"role":"user","content":"How do you differentiate bacterial from viral pneumonia?"}]}"#;
    const STREAM_REQUEST: &str = r#"{"messages":[{"role":"user","content":"hi"}],"stream":true}"#;

    #[tokio::test]
    async fn test_ping() {
        let response = router(FakeGenerator::new(vec![]))
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let unloaded = create_router(Arc::new(AppState::new(ServingConfig::default())));
        let response = unloaded
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_json_invocation() {
        let response = router(FakeGenerator::new(vec!["Bacterial ", "pneumonia"]))
            .oneshot(invocation(TEXT_REQUEST))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["generated_text"], "Bacterial pneumonia");
    }

    #[tokio::test]
    async fn test_stream_emits_chunks_then_single_done() {
        let response = router(FakeGenerator::new(vec!["Chest ", "", "X-ray"]))
            .oneshot(invocation(STREAM_REQUEST))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let body = body_text(response).await;
        assert_eq!(
            body,
            "data: {\"text\":\"Chest \"}\n\ndata: {\"text\":\"X-ray\"}\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_accept_header_enables_streaming() {
        let request = Request::builder()
            .method("POST")
            .uri("/invocations")
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .body(Body::from(TEXT_REQUEST))
            .unwrap();

        let response = router(FakeGenerator::new(vec!["ok"]))
            .oneshot(request)
            .await
            .unwrap();
        let body = body_text(response).await;
        assert!(body.ends_with("data: [DONE]\n\n"));
        assert_eq!(body.matches("[DONE]").count(), 1);
    }

    #[tokio::test]
    async fn test_stream_failure_reports_error_before_done() {
        let generator = FakeGenerator {
            chunks: vec!["partial"],
            fail_with: Some("model server went away"),
            stall: false,
        };
        let response = router(generator)
            .oneshot(invocation(STREAM_REQUEST))
            .await
            .unwrap();

        let body = body_text(response).await;
        assert_eq!(
            body,
            "data: {\"text\":\"partial\"}\n\n\
             data: {\"error\":\"Backend error: model server went away\"}\n\n\
             data: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_stream_timeout_ends_with_done() {
        let generator = FakeGenerator {
            chunks: vec!["first"],
            fail_with: None,
            stall: true,
        };
        let response = router(generator)
            .oneshot(invocation(STREAM_REQUEST))
            .await
            .unwrap();

        let body = body_text(response).await;
        assert!(body.starts_with("data: {\"text\":\"first\"}\n\n"));
        assert!(body.contains("timed out"));
        assert_eq!(body.matches("[DONE]").count(), 1);
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn test_error_status_codes() {
        let app = router(FakeGenerator::new(vec![]));

        let wrong_type = Request::builder()
            .method("POST")
            .uri("/invocations")
            .header("content-type", "text/plain")
            .body(Body::from(TEXT_REQUEST))
            .unwrap();
        let response = app.clone().oneshot(wrong_type).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let response = app.clone().oneshot(invocation("{broken")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let failing = router(FakeGenerator {
            chunks: vec![],
            fail_with: Some("boom"),
            stall: false,
        });
        let response = failing.oneshot(invocation(TEXT_REQUEST)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_failed_load_is_unavailable() {
        let mut config = ServingConfig::default();
        // Nothing listens on port 9; readiness fails immediately
        config.backend.url = Some("http://127.0.0.1:9".to_string());
        config.backend.startup_timeout_secs = 0;
        let app = create_router(Arc::new(AppState::new(config)));

        let response = app.oneshot(invocation(TEXT_REQUEST)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
