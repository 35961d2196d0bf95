//! Image payload decoding
//!
//! Requests carry images as base64 strings. The handler turns them into
//! [`DecodedImage`] values whose format is identified by magic bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{MedgemmaError, MedgemmaResult};

/// Supported image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
}

impl ImageFormat {
    /// MIME type for this format
    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }

    /// Detect the format from leading magic bytes
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        if bytes[0..4] == [0x89, b'P', b'N', b'G'] {
            return Some(Self::Png);
        }
        if bytes[0..3] == [0xFF, 0xD8, 0xFF] {
            return Some(Self::Jpeg);
        }
        if &bytes[0..4] == b"GIF8" {
            return Some(Self::Gif);
        }
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }
        None
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "PNG"),
            Self::Jpeg => write!(f, "JPEG"),
            Self::Gif => write!(f, "GIF"),
            Self::WebP => write!(f, "WEBP"),
        }
    }
}

/// An image decoded from a request payload
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Detected format
    pub format: ImageFormat,
    /// Raw image bytes
    pub bytes: Vec<u8>,
}

impl DecodedImage {
    /// Decode a base64 payload (a `data:` URL prefix is accepted)
    pub fn from_base64(payload: &str) -> MedgemmaResult<Self> {
        let encoded = match payload.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => payload,
        };
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();

        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| MedgemmaError::InvalidRequest(format!("Invalid base64 image: {}", e)))?;

        Self::from_bytes(bytes)
    }

    /// Wrap raw bytes, rejecting unknown formats
    pub fn from_bytes(bytes: Vec<u8>) -> MedgemmaResult<Self> {
        let format = ImageFormat::detect(&bytes).ok_or_else(|| {
            MedgemmaError::InvalidRequest("Unsupported or corrupt image data".to_string())
        })?;
        Ok(Self { format, bytes })
    }

    /// `data:` URL accepted by OpenAI-compatible vision APIs
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            STANDARD.encode(&self.bytes)
        )
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Read an image file and base64-encode it for a request payload
pub fn encode_image_file(path: &Path) -> MedgemmaResult<String> {
    let bytes = std::fs::read(path)?;
    Ok(STANDARD.encode(bytes))
}
