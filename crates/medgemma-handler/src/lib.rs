//! medgemma-handler: inference container handler
//!
//! This crate implements the SageMaker container contract:
//! - `GET /ping` health check, healthy once the model is loaded
//! - `POST /invocations` with JSON or streamed (server-sent events) output
//! - Request decoding, including base64 image parts

pub mod input;
pub mod rest;
pub mod state;
pub mod streaming;

pub use rest::create_router;
pub use state::{AppState, LoadedModel};
