//! Endpoint invocation
//!
//! JSON invocations return `{"generated_text": ...}`. Streaming invocations
//! carry the handler's event stream inside SageMaker payload parts, which
//! split frames at arbitrary byte boundaries.

use aws_sdk_sagemakerruntime::primitives::Blob;
use aws_sdk_sagemakerruntime::types::ResponseStream;
use medgemma_core::sse::{SseDecoder, DONE_MARKER};
use medgemma_core::{
    GenerationResponse, InvocationRequest, MedgemmaError, MedgemmaResult, StreamChunk, StreamError,
};
use std::time::Duration;
use tracing::{debug, warn};

use crate::aws_error;
use crate::session::AwsContext;

/// One decoded event of a streamed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    Error(String),
    Done,
}

impl StreamEvent {
    /// Decode the data payload of one event
    pub fn parse(data: &str) -> MedgemmaResult<Self> {
        if data.trim() == DONE_MARKER {
            return Ok(StreamEvent::Done);
        }
        if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
            return Ok(StreamEvent::Text(chunk.text));
        }
        if let Ok(error) = serde_json::from_str::<StreamError>(data) {
            return Ok(StreamEvent::Error(error.error));
        }
        Err(MedgemmaError::Serialization(format!(
            "Unexpected stream event: {}",
            data
        )))
    }
}

/// Reassembles the handler's event stream from payload parts
struct StreamAssembler {
    decoder: SseDecoder,
    text: String,
}

impl StreamAssembler {
    fn new() -> Self {
        Self {
            decoder: SseDecoder::new(),
            text: String::new(),
        }
    }

    /// Feed one payload part, or `None` once the stream has closed.
    ///
    /// Returns the full text when the terminal marker arrives. A stream that
    /// closes before it is an error.
    fn push<F>(&mut self, part: Option<&[u8]>, on_chunk: &mut F) -> MedgemmaResult<Option<String>>
    where
        F: FnMut(&str),
    {
        let events = match part {
            Some(bytes) => self.decoder.push(bytes),
            None => self.decoder.finish().into_iter().collect(),
        };

        for data in events {
            match StreamEvent::parse(&data)? {
                StreamEvent::Text(chunk) => {
                    on_chunk(&chunk);
                    self.text.push_str(&chunk);
                }
                StreamEvent::Error(message) => return Err(MedgemmaError::Backend(message)),
                StreamEvent::Done => return Ok(Some(std::mem::take(&mut self.text))),
            }
        }

        match part {
            Some(_) => Ok(None),
            None => Err(MedgemmaError::Backend(
                "Response stream closed before generation finished".to_string(),
            )),
        }
    }
}

/// Client for one deployed endpoint
pub struct EndpointClient {
    client: aws_sdk_sagemakerruntime::Client,
    endpoint_name: String,
    timeout: Duration,
}

impl EndpointClient {
    /// Create a client for `endpoint_name`; `timeout` bounds each call (and each stream read)
    pub fn new(ctx: &AwsContext, endpoint_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: ctx.sagemaker_runtime(),
            endpoint_name: endpoint_name.into(),
            timeout,
        }
    }

    /// Endpoint name
    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    /// Single-shot invocation
    pub async fn invoke(&self, request: &InvocationRequest) -> MedgemmaResult<GenerationResponse> {
        let body = serde_json::to_vec(&request.clone().streaming(false))?;
        debug!(endpoint = %self.endpoint_name, bytes = body.len(), "Invoking endpoint");

        let call = self
            .client
            .invoke_endpoint()
            .endpoint_name(&self.endpoint_name)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send();

        let output = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| aws_error("Invocation failed", e))?;

        let payload = output
            .body()
            .map(|b| b.as_ref())
            .ok_or_else(|| MedgemmaError::Aws("Endpoint returned an empty body".to_string()))?;

        Ok(serde_json::from_slice(payload)?)
    }

    /// Streaming invocation; `on_chunk` sees each text chunk as it arrives.
    ///
    /// Returns the concatenated text once the terminal marker is received.
    pub async fn invoke_stream<F>(
        &self,
        request: &InvocationRequest,
        mut on_chunk: F,
    ) -> MedgemmaResult<String>
    where
        F: FnMut(&str),
    {
        let body = serde_json::to_vec(&request.clone().streaming(true))?;
        debug!(endpoint = %self.endpoint_name, bytes = body.len(), "Invoking endpoint with response stream");

        let call = self
            .client
            .invoke_endpoint_with_response_stream()
            .endpoint_name(&self.endpoint_name)
            .content_type("application/json")
            .accept("text/event-stream")
            .body(Blob::new(body))
            .send();

        let mut output = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| aws_error("Streaming invocation failed", e))?;

        let mut assembler = StreamAssembler::new();

        loop {
            let part = tokio::time::timeout(self.timeout, output.body.recv())
                .await
                .map_err(|_| self.timed_out())?
                .map_err(|e| aws_error("Response stream failed", e))?;

            let bytes = match &part {
                Some(ResponseStream::PayloadPart(part)) => match part.bytes() {
                    Some(bytes) => Some(bytes.as_ref()),
                    None => continue,
                },
                Some(_) => continue,
                None => None,
            };

            if let Some(text) = assembler.push(bytes, &mut on_chunk).map_err(|e| {
                warn!(endpoint = %self.endpoint_name, error = %e, "Streaming invocation failed");
                e
            })? {
                return Ok(text);
            }
        }
    }

    fn timed_out(&self) -> MedgemmaError {
        MedgemmaError::Aws(format!(
            "Invocation of {} timed out after {}s",
            self.endpoint_name,
            self.timeout.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &str) -> String {
        format!("data: {}\n\n", payload)
    }

    #[test]
    fn test_parse_events() {
        assert_eq!(
            StreamEvent::parse(r#"{"text":"Hello"}"#).unwrap(),
            StreamEvent::Text("Hello".to_string())
        );
        assert_eq!(
            StreamEvent::parse(r#"{"error":"Generation timed out"}"#).unwrap(),
            StreamEvent::Error("Generation timed out".to_string())
        );
        assert_eq!(StreamEvent::parse("[DONE]").unwrap(), StreamEvent::Done);
        assert!(StreamEvent::parse("garbage").is_err());
    }

    #[test]
    fn test_payload_parts_reassemble() {
        let stream = format!(
            "{}{}{}",
            frame(r#"{"text":"Chest "}"#),
            frame(r#"{"text":"X-ray"}"#),
            frame(DONE_MARKER)
        );

        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for part in stream.as_bytes().chunks(7) {
            for data in decoder.push(part) {
                events.push(StreamEvent::parse(&data).unwrap());
            }
        }

        assert_eq!(
            events,
            vec![
                StreamEvent::Text("Chest ".to_string()),
                StreamEvent::Text("X-ray".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn test_assembler_returns_text_on_done() {
        let mut assembler = StreamAssembler::new();
        let mut seen = Vec::new();
        let mut on_chunk = |chunk: &str| seen.push(chunk.to_string());

        let first = frame(r#"{"text":"No acute "}"#);
        assert_eq!(assembler.push(Some(first.as_bytes()), &mut on_chunk).unwrap(), None);
        let rest = format!(
            "{}{}",
            frame(r#"{"text":"findings."}"#),
            frame(DONE_MARKER)
        );
        let text = assembler.push(Some(rest.as_bytes()), &mut on_chunk).unwrap();

        assert_eq!(text.as_deref(), Some("No acute findings."));
        assert_eq!(seen, vec!["No acute ", "findings."]);
    }

    #[test]
    fn test_assembler_rejects_stream_closed_early() {
        let mut assembler = StreamAssembler::new();
        let mut on_chunk = |_: &str| {};

        let partial = frame(r#"{"text":"Partial "}"#);
        assert_eq!(assembler.push(Some(partial.as_bytes()), &mut on_chunk).unwrap(), None);

        let err = assembler.push(None, &mut on_chunk).unwrap_err();
        assert!(matches!(err, MedgemmaError::Backend(_)));
    }

    #[test]
    fn test_assembler_surfaces_error_frame() {
        let mut assembler = StreamAssembler::new();
        let mut on_chunk = |_: &str| {};

        let frames = format!(
            "{}{}",
            frame(r#"{"error":"Generation timed out"}"#),
            frame(DONE_MARKER)
        );
        let err = assembler.push(Some(frames.as_bytes()), &mut on_chunk).unwrap_err();
        assert_eq!(err.to_string(), MedgemmaError::Backend("Generation timed out".to_string()).to_string());
    }
}
