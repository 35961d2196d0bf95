//! medgemma-aws: AWS orchestration
//!
//! This crate wraps the AWS APIs the toolkit drives:
//! - Execution role provisioning (IAM)
//! - Artifact storage (S3)
//! - Model, endpoint configuration and endpoint lifecycle (SageMaker)
//! - Endpoint invocation, including response streaming
//! - Endpoint logs (CloudWatch Logs)
//! - Connectivity/permission probing and full teardown

pub mod iam;
pub mod invoke;
pub mod logs;
pub mod probe;
pub mod s3;
pub mod sagemaker;
pub mod session;
pub mod teardown;

pub use invoke::{EndpointClient, StreamEvent};
pub use probe::{ProbeReport, ProbeResult};
pub use session::{AwsContext, CallerIdentity};
pub use teardown::{StepOutcome, StepReport, StorageCleanup, TeardownPlan, VerificationReport};

use medgemma_core::MedgemmaError;

/// Render an SDK error with its full source chain
pub(crate) fn error_text<E: std::error::Error>(err: &E) -> String {
    aws_sdk_sts::error::DisplayErrorContext(err).to_string()
}

/// Wrap an SDK error with context
pub(crate) fn aws_error<E: std::error::Error>(context: &str, err: E) -> MedgemmaError {
    MedgemmaError::Aws(format!("{}: {}", context, error_text(&err)))
}

/// Normalize SDK accessors that return either `&T` or `Option<&T>`
pub(crate) fn present<'a, T: ?Sized + 'a>(value: impl Into<Option<&'a T>>) -> Option<&'a T> {
    value.into()
}

/// Normalize boolean accessors that return either `bool` or `Option<bool>`
pub(crate) fn flag(value: impl Into<Option<bool>>) -> bool {
    value.into().unwrap_or(false)
}
