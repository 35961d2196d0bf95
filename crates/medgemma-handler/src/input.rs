//! Request decoding

use medgemma_core::{
    ContentPart, DecodedImage, GenerationParams, InvocationRequest, MedgemmaError, MedgemmaResult,
    MessageContent, Prompt, PromptContent, PromptMessage, PromptPart,
};

const JSON_CONTENT_TYPE: &str = "application/json";
const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

fn media_type(header: &str) -> &str {
    header.split(';').next().unwrap_or_default().trim()
}

/// Reject anything but `application/json` (parameters such as `charset` are allowed)
pub fn check_content_type(header: Option<&str>) -> MedgemmaResult<()> {
    match header {
        Some(value) if media_type(value).eq_ignore_ascii_case(JSON_CONTENT_TYPE) => Ok(()),
        Some(value) => Err(MedgemmaError::UnsupportedMediaType(value.to_string())),
        None => Err(MedgemmaError::UnsupportedMediaType(
            "missing Content-Type header".to_string(),
        )),
    }
}

/// Whether the client asked for an event stream through `Accept`
pub fn accepts_event_stream(header: Option<&str>) -> bool {
    header
        .map(|value| {
            value
                .split(',')
                .any(|v| media_type(v).eq_ignore_ascii_case(EVENT_STREAM_CONTENT_TYPE))
        })
        .unwrap_or(false)
}

/// Parse the request body
pub fn parse_request(body: &[u8]) -> MedgemmaResult<InvocationRequest> {
    serde_json::from_slice(body).map_err(|e| MedgemmaError::InvalidRequest(e.to_string()))
}

/// Decode every image part; text parts and plain string content pass through unchanged
pub fn decode_prompt(request: &InvocationRequest) -> MedgemmaResult<Prompt> {
    if request.messages.is_empty() {
        return Err(MedgemmaError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }

    let messages = request
        .messages
        .iter()
        .map(|message| {
            let content = match &message.content {
                MessageContent::Text(text) => PromptContent::Text(text.clone()),
                MessageContent::Parts(parts) => PromptContent::Parts(
                    parts
                        .iter()
                        .map(|part| match part {
                            ContentPart::Text { text } => Ok(PromptPart::Text(text.clone())),
                            ContentPart::Image { image } => {
                                DecodedImage::from_base64(image).map(PromptPart::Image)
                            }
                        })
                        .collect::<MedgemmaResult<Vec<_>>>()?,
                ),
            };
            Ok(PromptMessage {
                role: message.role.clone(),
                content,
            })
        })
        .collect::<MedgemmaResult<Vec<_>>>()?;

    Ok(Prompt { messages })
}

/// Generation parameters carried by the request
pub fn generation_params(request: &InvocationRequest) -> GenerationParams {
    GenerationParams {
        max_new_tokens: request.max_new_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        do_sample: request.do_sample,
    }
}
