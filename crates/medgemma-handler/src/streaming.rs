//! Streamed generation
//!
//! Generation runs on a producer task that pushes chunks into a bounded
//! channel. The response stream drains it with a per-chunk timeout and always
//! finishes with exactly one `[DONE]` event.

use async_stream::stream;
use axum::response::sse::Event;
use futures::Stream;
use medgemma_core::sse::DONE_MARKER;
use medgemma_core::{GenerationParams, Prompt};
use medgemma_runtime::Generator;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

fn text_event(text: &str) -> Event {
    Event::default().data(json!({ "text": text }).to_string())
}

fn error_event(message: &str) -> Event {
    Event::default().data(json!({ "error": message }).to_string())
}

/// Start generation and return the event stream that reports it
pub fn generation_events(
    generator: Arc<dyn Generator>,
    prompt: Prompt,
    params: GenerationParams,
    buffer: usize,
    chunk_timeout: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let (sender, mut receiver) = mpsc::channel::<String>(buffer.max(1));

    let producer = tokio::spawn(async move {
        generator.generate_stream(&prompt, &params, sender).await
    });

    stream! {
        let mut chunks = 0usize;
        let mut failure: Option<String> = None;

        loop {
            match tokio::time::timeout(chunk_timeout, receiver.recv()).await {
                Ok(Some(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    chunks += 1;
                    yield Ok(text_event(&chunk));
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(timeout_secs = chunk_timeout.as_secs(), "Timed out waiting for next chunk");
                    producer.abort();
                    failure = Some(format!(
                        "Generation timed out after {}s without output",
                        chunk_timeout.as_secs()
                    ));
                    break;
                }
            }
        }

        if failure.is_none() {
            match producer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failure = Some(e.to_string()),
                Err(e) => failure = Some(format!("Generation task failed: {}", e)),
            }
        }

        if let Some(message) = failure {
            error!(error = %message, chunks, "Streamed generation failed");
            yield Ok(error_event(&message));
        } else {
            debug!(chunks, "Streamed generation finished");
        }

        yield Ok(Event::default().data(DONE_MARKER));
    }
}
