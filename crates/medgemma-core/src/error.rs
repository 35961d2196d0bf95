//! Error types for the MedGemma toolkit

use thiserror::Error;

/// Main error type for the MedGemma toolkit
#[derive(Error, Debug)]
pub enum MedgemmaError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// AWS API error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Model artifact packaging error
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Malformed inference request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Request body with a content type the handler does not accept
    #[error("Unsupported content type: {0}")]
    UnsupportedMediaType(String),

    /// Model has not finished loading
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    /// Model server (generation backend) error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Endpoint info file error
    #[error("Endpoint info error: {0}")]
    EndpointInfo(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for MedGemma operations
pub type MedgemmaResult<T> = Result<T, MedgemmaError>;

impl From<serde_json::Error> for MedgemmaError {
    fn from(err: serde_json::Error) -> Self {
        MedgemmaError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for MedgemmaError {
    fn from(err: toml::de::Error) -> Self {
        MedgemmaError::Config(err.to_string())
    }
}
