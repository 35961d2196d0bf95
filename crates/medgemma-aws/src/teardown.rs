//! Resource teardown and verification
//!
//! Teardown runs independent steps in a fixed order and keeps going when one
//! fails, so a partial failure still removes everything else that bills.

use medgemma_core::{MedgemmaError, MedgemmaResult};
use std::fmt;
use tracing::{info, warn};

use crate::session::AwsContext;
use crate::{iam, logs, s3, sagemaker};

/// Outcome of one teardown step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Deleted,
    NotFound,
    Skipped(String),
    Failed(String),
}

impl StepOutcome {
    fn from_result(result: MedgemmaResult<bool>) -> Self {
        match result {
            Ok(true) => StepOutcome::Deleted,
            Ok(false) => StepOutcome::NotFound,
            Err(e) => Self::from_error(e),
        }
    }

    /// A resource that is already gone is not a failure
    fn from_error(err: MedgemmaError) -> Self {
        match err {
            MedgemmaError::NotFound(_) => StepOutcome::NotFound,
            e => StepOutcome::Failed(e.to_string()),
        }
    }

    fn from_emptied(result: MedgemmaResult<usize>) -> Self {
        match result {
            Ok(0) => StepOutcome::NotFound,
            Ok(_) => StepOutcome::Deleted,
            Err(e) => Self::from_error(e),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Deleted => write!(f, "deleted"),
            StepOutcome::NotFound => write!(f, "not found"),
            StepOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            StepOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of one step against one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub resource: String,
    pub outcome: StepOutcome,
}

impl StepReport {
    fn new(resource: impl Into<String>, outcome: StepOutcome) -> Self {
        let report = Self {
            resource: resource.into(),
            outcome,
        };
        match &report.outcome {
            StepOutcome::Failed(reason) => {
                warn!(resource = %report.resource, error = %reason, "Teardown step failed")
            }
            outcome => info!(resource = %report.resource, outcome = %outcome, "Teardown step"),
        }
        report
    }
}

/// What to do with artifact storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCleanup {
    /// Delete every object version and then the bucket itself
    DeleteBucket(String),
    /// Delete the objects under a prefix and keep the (shared) bucket
    EmptyPrefix { bucket: String, prefix: String },
    /// Leave storage alone
    Keep,
}

/// Resources to remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownPlan {
    pub endpoint_name: Option<String>,
    /// Models not referenced by any endpoint config, confirmed for deletion
    pub orphaned_models: Vec<String>,
    pub storage: StorageCleanup,
    pub role_name: Option<String>,
    pub delete_log_groups: bool,
}

impl TeardownPlan {
    /// Storage step for a configured bucket, or the artifact prefix in the shared default bucket
    pub fn storage_for(
        configured_bucket: Option<&str>,
        default_bucket: Option<&str>,
        prefix: &str,
    ) -> StorageCleanup {
        match (configured_bucket, default_bucket) {
            (Some(bucket), _) => StorageCleanup::DeleteBucket(bucket.to_string()),
            (None, Some(bucket)) if !prefix.trim_matches('/').is_empty() => {
                StorageCleanup::EmptyPrefix {
                    bucket: bucket.to_string(),
                    prefix: format!("{}/", prefix.trim_matches('/')),
                }
            }
            _ => StorageCleanup::Keep,
        }
    }

    /// Run every step; failures are reported and the next step still runs
    pub async fn execute(&self, ctx: &AwsContext) -> Vec<StepReport> {
        let mut reports = Vec::new();

        match &self.endpoint_name {
            Some(endpoint) => teardown_endpoint(ctx, endpoint, &mut reports).await,
            None => reports.push(StepReport::new(
                "endpoint",
                StepOutcome::Skipped("no endpoint recorded".to_string()),
            )),
        }

        for model in &self.orphaned_models {
            let outcome = StepOutcome::from_result(sagemaker::delete_model(ctx, model).await);
            reports.push(StepReport::new(format!("orphaned model {}", model), outcome));
        }

        match &self.storage {
            StorageCleanup::DeleteBucket(bucket) => {
                let outcome = match s3::empty_bucket(ctx, bucket, None).await {
                    Ok(count) => {
                        info!(bucket = %bucket, objects = count, "Emptied bucket");
                        StepOutcome::from_result(s3::delete_bucket(ctx, bucket).await)
                    }
                    Err(e) => StepOutcome::from_error(e),
                };
                reports.push(StepReport::new(format!("bucket {}", bucket), outcome));
            }
            StorageCleanup::EmptyPrefix { bucket, prefix } => {
                let outcome = StepOutcome::from_emptied(
                    s3::empty_bucket(ctx, bucket, Some(prefix)).await,
                );
                reports.push(StepReport::new(s3::s3_url(bucket, prefix), outcome));
            }
            StorageCleanup::Keep => reports.push(StepReport::new(
                "storage",
                StepOutcome::Skipped("no bucket configured".to_string()),
            )),
        }

        match &self.role_name {
            Some(role) => {
                let outcome = StepOutcome::from_result(iam::delete_role(ctx, role).await);
                reports.push(StepReport::new(format!("role {}", role), outcome));
            }
            None => reports.push(StepReport::new(
                "role",
                StepOutcome::Skipped("role kept".to_string()),
            )),
        }

        if self.delete_log_groups {
            match logs::deployment_log_groups(ctx, self.endpoint_name.as_deref()).await {
                Ok(groups) => {
                    for group in groups {
                        let outcome = match logs::delete_log_group(ctx, &group).await {
                            Ok(()) => StepOutcome::Deleted,
                            Err(e) => StepOutcome::Failed(e.to_string()),
                        };
                        reports.push(StepReport::new(format!("log group {}", group), outcome));
                    }
                }
                Err(e) => reports.push(StepReport::new(
                    "log groups",
                    StepOutcome::Failed(e.to_string()),
                )),
            }
        }

        reports
    }
}

async fn teardown_endpoint(ctx: &AwsContext, endpoint: &str, reports: &mut Vec<StepReport>) {
    // Config name falls back to the endpoint name, which deploy uses for both
    let config_name = match sagemaker::describe_endpoint(ctx, endpoint).await {
        Ok(Some(state)) => state.config_name.unwrap_or_else(|| endpoint.to_string()),
        Ok(None) => endpoint.to_string(),
        Err(e) => {
            warn!(endpoint = %endpoint, error = %e, "Could not describe endpoint");
            endpoint.to_string()
        }
    };

    let outcome = StepOutcome::from_result(sagemaker::delete_endpoint(ctx, endpoint).await);
    reports.push(StepReport::new(format!("endpoint {}", endpoint), outcome));

    let models = match sagemaker::endpoint_config_models(ctx, &config_name).await {
        Ok(models) => models.unwrap_or_default(),
        Err(e) => {
            warn!(config = %config_name, error = %e, "Could not read endpoint config models");
            Vec::new()
        }
    };

    let outcome =
        StepOutcome::from_result(sagemaker::delete_endpoint_config(ctx, &config_name).await);
    reports.push(StepReport::new(format!("endpoint config {}", config_name), outcome));

    for model in models {
        let outcome = StepOutcome::from_result(sagemaker::delete_model(ctx, &model).await);
        reports.push(StepReport::new(format!("model {}", model), outcome));
    }
}

/// Whether any step failed
pub fn has_failures(reports: &[StepReport]) -> bool {
    reports.iter().any(|r| r.outcome.is_failure())
}

/// Whether a SageMaker resource name belongs to this deployment
pub fn matches_deployment(name: &str, endpoint_name: Option<&str>) -> bool {
    logs::is_deployment_log_group(name, endpoint_name)
}

/// Deployment resources that still exist after teardown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub endpoints: Vec<String>,
    pub endpoint_configs: Vec<String>,
    pub models: Vec<String>,
    /// `None` when no bucket was checked
    pub bucket_exists: Option<bool>,
    pub role_exists: bool,
    pub log_groups: Vec<String>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.endpoints.is_empty()
            && self.endpoint_configs.is_empty()
            && self.models.is_empty()
            && self.bucket_exists != Some(true)
            && !self.role_exists
            && self.log_groups.is_empty()
    }
}

/// Re-query each service for resources left behind
pub async fn verify(
    ctx: &AwsContext,
    endpoint_name: Option<&str>,
    bucket: Option<&str>,
    role_name: &str,
) -> MedgemmaResult<VerificationReport> {
    let keep = |names: Vec<String>| -> Vec<String> {
        names
            .into_iter()
            .filter(|n| matches_deployment(n, endpoint_name))
            .collect()
    };

    let endpoints = keep(sagemaker::list_endpoints(ctx).await?);
    let endpoint_configs = keep(sagemaker::list_endpoint_configs(ctx).await?);
    let models = keep(
        sagemaker::list_models(ctx)
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect(),
    );

    let bucket_exists = match bucket {
        Some(bucket) => Some(s3::bucket_exists(ctx, bucket).await?),
        None => None,
    };
    let role_exists = iam::role_arn(ctx, role_name).await?.is_some();
    let log_groups = logs::deployment_log_groups(ctx, endpoint_name).await?;

    Ok(VerificationReport {
        endpoints,
        endpoint_configs,
        models,
        bucket_exists,
        role_exists,
        log_groups,
    })
}
