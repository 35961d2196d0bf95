//! Generator trait definitions

use async_trait::async_trait;
use medgemma_core::{GenerationParams, MedgemmaResult, Prompt};
use tokio::sync::mpsc;

/// Text generation backend
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate the full completion for a prompt
    async fn generate(&self, prompt: &Prompt, params: &GenerationParams) -> MedgemmaResult<String>;

    /// Generate incrementally, pushing text chunks into `sender`.
    ///
    /// Returns once generation is complete or the receiver has gone away.
    async fn generate_stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
        sender: mpsc::Sender<String>,
    ) -> MedgemmaResult<()>;

    /// Get the generator name
    fn name(&self) -> &'static str;
}
