//! medgemma-runtime: Generation backends
//!
//! This crate provides the pieces the serving container uses to produce text:
//! - The `Generator` abstraction consumed by the request handler
//! - An OpenAI-compatible client for vLLM and llama.cpp model servers
//! - Model server process management and health checking

pub mod health;
pub mod openai;
pub mod process;
pub mod traits;

pub use health::HealthChecker;
pub use openai::OpenAiGenerator;
pub use process::BackendProcess;
pub use traits::Generator;
