//! OpenAI-compatible generator
//!
//! Both vLLM and llama.cpp expose `/v1/chat/completions`. Images are passed
//! as `data:` URLs in `image_url` parts.

use async_trait::async_trait;
use futures::StreamExt;
use medgemma_core::sse::{SseDecoder, DONE_MARKER};
use medgemma_core::{
    GenerationParams, MedgemmaError, MedgemmaResult, Prompt, PromptContent, PromptPart,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::traits::Generator;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Chat completion request body
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by an OpenAI-compatible model server
pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OpenAiGenerator {
    /// Create a generator for the server at `base_url` serving `model`
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        request_timeout_secs: u64,
    ) -> MedgemmaResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .map_err(|e| MedgemmaError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn chat_request(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
        stream: bool,
    ) -> ChatCompletionRequest {
        let (temperature, top_p) = if params.do_sample {
            (params.temperature.unwrap_or(1.0), params.top_p)
        } else {
            // greedy decoding
            (0.0, None)
        };

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: prompt
                .messages
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.clone(),
                    content: api_content(&m.content),
                })
                .collect(),
            max_tokens: params.max_new_tokens,
            temperature,
            top_p,
            stream,
        }
    }

    async fn send(&self, body: &ChatCompletionRequest) -> MedgemmaResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH);
        debug!(url = %url, stream = body.stream, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| MedgemmaError::Backend(format!("Model server request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MedgemmaError::Backend(format!(
                "Model server returned {}: {}",
                status, text
            )));
        }

        Ok(response)
    }
}

fn api_content(content: &PromptContent) -> Value {
    match content {
        PromptContent::Text(text) => Value::String(text.clone()),
        PromptContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    PromptPart::Text(text) => json!({"type": "text", "text": text}),
                    PromptPart::Image(image) => json!({
                        "type": "image_url",
                        "image_url": {"url": image.to_data_url()}
                    }),
                })
                .collect(),
        ),
    }
}

fn chunk_text(data: &str) -> MedgemmaResult<Option<String>> {
    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| MedgemmaError::Backend(format!("Malformed stream chunk: {}", e)))?;

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();

    Ok(Some(text).filter(|t| !t.is_empty()))
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &Prompt, params: &GenerationParams) -> MedgemmaResult<String> {
        let body = self.chat_request(prompt, params, false);
        let response = self.send(&body).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| MedgemmaError::Backend(format!("Malformed completion: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| MedgemmaError::Backend("Completion contained no choices".to_string()))
    }

    async fn generate_stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
        sender: mpsc::Sender<String>,
    ) -> MedgemmaResult<()> {
        let body = self.chat_request(prompt, params, true);
        let response = self.send(&body).await?;

        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk
                .map_err(|e| MedgemmaError::Backend(format!("Model server stream error: {}", e)))?;

            for data in decoder.push(&chunk) {
                if data == DONE_MARKER {
                    return Ok(());
                }
                if let Some(text) = chunk_text(&data)? {
                    if sender.send(text).await.is_err() {
                        debug!("Stream receiver dropped, stopping generation");
                        return Ok(());
                    }
                }
            }
        }

        warn!("Model server stream ended without a terminal marker");
        Err(MedgemmaError::Backend(
            "Model server stream ended before generation finished".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use medgemma_core::{DecodedImage, PromptMessage};

    fn text_prompt(text: &str) -> Prompt {
        Prompt {
            messages: vec![PromptMessage {
                role: "user".to_string(),
                content: PromptContent::Text(text.to_string()),
            }],
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_greedy_request_uses_zero_temperature() {
        let generator = OpenAiGenerator::new("http://localhost:30000/", "google/medgemma-4b-it", 5)
            .unwrap();
        let params = GenerationParams {
            max_new_tokens: 64,
            temperature: Some(0.7),
            top_p: Some(0.9),
            do_sample: false,
        };

        let body = serde_json::to_value(generator.chat_request(&text_prompt("hi"), &params, false))
            .unwrap();

        assert_eq!(body["model"], "google/medgemma-4b-it");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["temperature"], 0.0);
        assert!(body.get("top_p").is_none());
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(generator.base_url, "http://localhost:30000");
    }

    #[test]
    fn test_sampled_request_and_image_parts() {
        let generator = OpenAiGenerator::new("http://localhost:30000", "m", 5).unwrap();
        let image = DecodedImage::from_bytes(vec![0x89, b'P', b'N', b'G', 0, 0]).unwrap();
        let prompt = Prompt {
            messages: vec![PromptMessage {
                role: "user".to_string(),
                content: PromptContent::Parts(vec![
                    PromptPart::Image(image),
                    PromptPart::Text("Describe".to_string()),
                ]),
            }],
        };
        let params = GenerationParams {
            temperature: Some(0.5),
            top_p: Some(0.8),
            do_sample: true,
            ..Default::default()
        };

        let body = serde_json::to_value(generator.chat_request(&prompt, &params, true)).unwrap();
        let parts = &body["messages"][0]["content"];

        assert_eq!(body["temperature"], 0.5);
        assert!(body["stream"].as_bool().unwrap());
        assert_eq!(parts[0]["type"], "image_url");
        assert!(parts[0]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert_eq!(parts[1]["text"], "Describe");
    }

    #[test]
    fn test_chunk_text() {
        assert_eq!(
            chunk_text(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            Some("Hel".to_string())
        );
        assert_eq!(chunk_text(r#"{"choices":[{"delta":{}}]}"#).unwrap(), None);
        assert!(chunk_text("not json").is_err());
    }

    #[tokio::test]
    async fn test_generate_against_fake_server() {
        let router = Router::new().route(
            CHAT_COMPLETIONS_PATH,
            post(|| async {
                Json(json!({"choices": [{"message": {"role": "assistant", "content": "Pneumonia"}}]}))
            }),
        );
        let base_url = serve(router).await;
        let generator = OpenAiGenerator::new(base_url, "m", 5).unwrap();

        let text = generator
            .generate(&text_prompt("Diagnosis?"), &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(text, "Pneumonia");
    }

    #[tokio::test]
    async fn test_generate_stream_against_fake_server() {
        let router = Router::new().route(
            CHAT_COMPLETIONS_PATH,
            post(|| async {
                let body = concat!(
                    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"No acute \"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"findings.\"}}]}\n\n",
                    "data: [DONE]\n\n",
                );
                ([("content-type", "text/event-stream")], body).into_response()
            }),
        );
        let base_url = serve(router).await;
        let generator = OpenAiGenerator::new(base_url, "m", 5).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        generator
            .generate_stream(&text_prompt("Findings?"), &GenerationParams::default(), tx)
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["No acute ".to_string(), "findings.".to_string()]);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_backend_error() {
        let router = Router::new().route(
            CHAT_COMPLETIONS_PATH,
            post(|| async {
                let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Partial \"}}]}\n\n";
                ([("content-type", "text/event-stream")], body).into_response()
            }),
        );
        let base_url = serve(router).await;
        let generator = OpenAiGenerator::new(base_url, "m", 5).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let result = generator
            .generate_stream(&text_prompt("Findings?"), &GenerationParams::default(), tx)
            .await;

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["Partial ".to_string()]);
        assert!(matches!(result, Err(MedgemmaError::Backend(_))));
    }

    #[tokio::test]
    async fn test_error_status_is_backend_error() {
        let router = Router::new().route(
            CHAT_COMPLETIONS_PATH,
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "loading") }),
        );
        let base_url = serve(router).await;
        let generator = OpenAiGenerator::new(base_url, "m", 5).unwrap();

        let err = generator
            .generate(&text_prompt("hi"), &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MedgemmaError::Backend(_)));
    }
}
