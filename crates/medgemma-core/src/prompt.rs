//! Decoded chat prompt handed to a generator

use crate::image::DecodedImage;
use crate::messages::DEFAULT_MAX_NEW_TOKENS;

/// A conversation with images already decoded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub messages: Vec<PromptMessage>,
}

impl Prompt {
    /// Whether any message carries an image
    pub fn has_images(&self) -> bool {
        self.messages.iter().any(|m| match &m.content {
            PromptContent::Text(_) => false,
            PromptContent::Parts(parts) => {
                parts.iter().any(|p| matches!(p, PromptPart::Image(_)))
            }
        })
    }
}

/// One decoded message
#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: String,
    pub content: PromptContent,
}

/// Decoded message content
#[derive(Debug, Clone, PartialEq)]
pub enum PromptContent {
    /// Plain string content, passed through unchanged
    Text(String),
    /// Typed parts
    Parts(Vec<PromptPart>),
}

/// Decoded content part
#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    Image(DecodedImage),
}

/// Generation parameters taken from the request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub do_sample: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: None,
            top_p: None,
            do_sample: false,
        }
    }
}
