//! Model-serving request/response contract
//!
//! These types are what clients serialize into the endpoint request body and
//! what the handler deserializes before decoding images.

use serde::{Deserialize, Serialize};

/// Default generation budget when a request does not specify one
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 200;

/// Body of a `POST /invocations` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Chat-style conversation
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Maximum number of generated tokens
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    /// Stream the response as server-sent events
    #[serde(default)]
    pub stream: bool,
    /// Sampling temperature (only used when sampling)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold (only used when sampling)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Sample instead of greedy decoding
    #[serde(default)]
    pub do_sample: bool,
}

fn default_max_new_tokens() -> u32 {
    DEFAULT_MAX_NEW_TOKENS
}

impl InvocationRequest {
    /// Create a request with default generation parameters
    pub fn new(messages: Vec<ChatMessage>, max_new_tokens: u32) -> Self {
        Self {
            messages,
            max_new_tokens,
            stream: false,
            temperature: None,
            top_p: None,
            do_sample: false,
        }
    }

    /// Toggle streaming
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Enable sampling with the given temperature and top-p
    pub fn sampled(mut self, temperature: f32, top_p: f32) -> Self {
        self.do_sample = true;
        self.temperature = Some(temperature);
        self.top_p = Some(top_p);
        self
    }
}

/// One message of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`
    pub role: String,
    /// Message content
    pub content: MessageContent,
}

impl ChatMessage {
    /// System message with a single text part
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Parts(vec![ContentPart::text(text)]),
        }
    }

    /// User message with the given parts
    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Parts(parts),
        }
    }
}

/// Message content: a plain string or a list of typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Typed content part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    /// Text part
    Text { text: String },
    /// Base64-encoded image part
    Image { image: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(base64: impl Into<String>) -> Self {
        ContentPart::Image {
            image: base64.into(),
        }
    }
}

/// Non-streaming response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub generated_text: String,
}

/// Payload of one streamed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub text: String,
}

/// Payload of the event emitted when streamed generation fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let req: InvocationRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        assert_eq!(req.max_new_tokens, 200);
        assert!(!req.stream);
        assert!(!req.do_sample);
        assert_eq!(req.messages[0].content, MessageContent::Text("hi".to_string()));
    }

    #[test]
    fn test_parts_parse() {
        let req: InvocationRequest = serde_json::from_value(json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image", "image": "aGVsbG8="},
                    {"type": "text", "text": "Describe"}
                ]
            }],
            "max_new_tokens": 300,
            "stream": true,
            "temperature": 0.7,
            "top_p": 0.9,
            "do_sample": true
        }))
        .unwrap();

        assert_eq!(req.max_new_tokens, 300);
        assert!(req.stream && req.do_sample);
        assert_eq!(
            req.messages[0].content,
            MessageContent::Parts(vec![
                ContentPart::image("aGVsbG8="),
                ContentPart::text("Describe"),
            ])
        );
    }

    #[test]
    fn test_request_serializes_contract_shape() {
        let req = InvocationRequest::new(
            vec![
                ChatMessage::system("You are a doctor."),
                ChatMessage::user(vec![ContentPart::text("Symptoms?")]),
            ],
            128,
        );
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["messages"][0]["content"][0]["type"], "text");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["max_new_tokens"], 128);
        assert!(value.get("temperature").is_none());
    }
}
