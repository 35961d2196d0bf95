//! medgemma-core: Core types for the MedGemma SageMaker toolkit
//!
//! This crate provides the types shared by the serving container and the
//! deployment tooling:
//! - Deployment settings and serving configuration
//! - The model-serving request/response contract
//! - Image payload decoding
//! - Event-stream framing
//! - The local endpoint-info artifact
//! - Error handling

pub mod config;
pub mod endpoint_info;
pub mod error;
pub mod image;
pub mod messages;
pub mod naming;
pub mod prompt;
pub mod sse;

pub use config::*;
pub use endpoint_info::*;
pub use error::*;
pub use image::*;
pub use messages::*;
pub use prompt::*;
