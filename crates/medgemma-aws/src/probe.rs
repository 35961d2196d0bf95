//! Connectivity and permission probe
//!
//! Exercises each AWS API the deployment relies on once and aggregates the
//! outcomes into a [`ProbeReport`].

use aws_sdk_s3::primitives::ByteStream;
use medgemma_core::Settings;
use tracing::{debug, warn};

use crate::s3::{bucket_exists, bucket_region, default_bucket_name};
use crate::session::{AwsContext, Principal};
use crate::error_text;

/// Name of the authentication check
pub const STS_CHECK: &str = "STS Authentication";
/// Name of the execution role check
pub const ROLE_CHECK: &str = "IAM Role";

const TEST_CONTENT: &str = "Connection test file";

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub name: String,
    pub success: bool,
    pub message: String,
}

/// Aggregated probe outcome
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub results: Vec<ProbeResult>,
    pub profile: String,
    pub region: String,
    pub s3_prefix: String,
    pub account_id: Option<String>,
    pub identity_arn: Option<String>,
    pub bucket: Option<String>,
    pub role: Option<String>,
}

impl ProbeReport {
    fn new(ctx: &AwsContext, settings: &Settings) -> Self {
        Self {
            profile: ctx.profile().to_string(),
            region: ctx.region().to_string(),
            s3_prefix: settings.s3_prefix.clone(),
            role: settings.sagemaker_role.clone(),
            ..Default::default()
        }
    }

    /// Record one check outcome
    pub fn record(&mut self, name: &str, success: bool, message: impl Into<String>) {
        let message = message.into();
        if success {
            debug!(check = %name, message = %message, "Probe passed");
        } else {
            warn!(check = %name, message = %message, "Probe failed");
        }
        self.results.push(ProbeResult {
            name: name.to_string(),
            success,
            message,
        });
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    fn any_passed(&self, pred: impl Fn(&str) -> bool) -> bool {
        self.results.iter().any(|r| r.success && pred(&r.name))
    }

    /// Remediation hints for the failed areas
    pub fn recommendations(&self) -> Vec<String> {
        if self.all_passed() {
            return Vec::new();
        }

        let mut hints = Vec::new();
        if !self.any_passed(|n| n == STS_CHECK) {
            hints.push(format!(
                "Run 'aws sso login --profile {}' to authenticate",
                self.profile
            ));
        }
        if !self.any_passed(|n| n.starts_with("S3")) {
            hints.push("Check S3 bucket name in .env file".to_string());
            hints.push("Ensure IAM role has S3 permissions".to_string());
        }
        if !self.any_passed(|n| n.starts_with("SageMaker")) {
            hints.push("Ensure IAM role has SageMaker permissions".to_string());
            hints.push("Check if you're in the correct AWS region".to_string());
        }
        if !self.any_passed(|n| n == ROLE_CHECK) {
            hints.push("Set SAGEMAKER_ROLE in .env file".to_string());
            hints.push(
                "Ensure the role has proper trust relationship with SageMaker".to_string(),
            );
        }
        hints
    }
}

/// Run every check; stops after the authentication check if it fails
pub async fn run_probe(ctx: &AwsContext, settings: &Settings) -> ProbeReport {
    let mut report = ProbeReport::new(ctx, settings);

    // STS
    let identity = match ctx.caller_identity().await {
        Ok(identity) => identity,
        Err(e) => {
            report.record(STS_CHECK, false, e.to_string());
            return report;
        }
    };
    let message = match identity.principal() {
        Principal::AssumedRole(role) => format!("Authenticated as role: {}", role),
        Principal::User(user) => format!("Authenticated as user: {}", user),
        Principal::Other => "Authenticated successfully".to_string(),
    };
    report.record(STS_CHECK, true, message);
    report.account_id = Some(identity.account.clone());
    report.identity_arn = Some(identity.arn.clone());

    check_role(ctx, &mut report).await;

    let bucket = settings
        .s3_bucket
        .clone()
        .unwrap_or_else(|| default_bucket_name(ctx.region(), &identity.account));
    report.bucket = Some(bucket.clone());
    check_s3(ctx, &mut report, &bucket, &settings.s3_prefix).await;

    check_sagemaker(ctx, &mut report).await;
    check_ecr(ctx, &mut report).await;
    check_logs(ctx, &mut report).await;
    check_secrets(ctx, &mut report).await;

    report
}

async fn check_role(ctx: &AwsContext, report: &mut ProbeReport) {
    use aws_sdk_iam::error::ProvideErrorMetadata;

    let Some(role) = report.role.clone() else {
        report.record(ROLE_CHECK, false, "SAGEMAKER_ROLE is not set");
        return;
    };
    let role_name = role.rsplit('/').next().unwrap_or(&role).to_string();

    match ctx.iam().get_role().role_name(&role_name).send().await {
        Ok(_) => report.record(ROLE_CHECK, true, format!("Role accessible: {}", role_name)),
        Err(e) => match e.code() {
            Some("NoSuchEntity") => {
                report.record(ROLE_CHECK, false, format!("Role not found: {}", role_name))
            }
            Some("AccessDenied") => report.record(
                ROLE_CHECK,
                true,
                "Role exists but cannot read details (permissions OK for deployment)",
            ),
            _ => report.record(
                ROLE_CHECK,
                false,
                format!("Error checking role: {}", error_text(&e)),
            ),
        },
    }
}

async fn check_s3(ctx: &AwsContext, report: &mut ProbeReport, bucket: &str, prefix: &str) {
    let s3 = ctx.s3();

    match bucket_exists(ctx, bucket).await {
        Ok(true) => report.record(
            "S3 Bucket Exists",
            true,
            format!("Bucket '{}' is accessible", bucket),
        ),
        Ok(false) => report.record(
            "S3 Bucket Exists",
            false,
            format!("Bucket '{}' does not exist", bucket),
        ),
        Err(e) => report.record("S3 Bucket Exists", false, e.to_string()),
    }

    match bucket_region(ctx, bucket).await {
        Ok(region) if region == ctx.region() => {
            report.record("S3 Bucket Region", true, "Bucket in correct region")
        }
        Ok(region) => report.record(
            "S3 Bucket Region",
            false,
            format!(
                "Region mismatch: bucket in {}, using {}",
                region,
                ctx.region()
            ),
        ),
        Err(e) => report.record("S3 Bucket Region", false, e.to_string()),
    }

    match s3
        .list_objects_v2()
        .bucket(bucket)
        .prefix(prefix)
        .max_keys(1)
        .send()
        .await
    {
        Ok(_) => report.record("S3 ListBucket", true, "Can list objects in bucket"),
        Err(e) => report.record(
            "S3 ListBucket",
            false,
            format!("Cannot list objects: {}", error_text(&e)),
        ),
    }

    let test_key = format!(
        "{}/connection_test_{}.txt",
        prefix.trim_matches('/'),
        uuid::Uuid::new_v4()
    );

    match s3
        .put_object()
        .bucket(bucket)
        .key(&test_key)
        .body(ByteStream::from(TEST_CONTENT.as_bytes().to_vec()))
        .send()
        .await
    {
        Ok(_) => report.record("S3 PutObject", true, "Can upload objects to bucket"),
        Err(e) => report.record(
            "S3 PutObject",
            false,
            format!("Cannot upload: {}", error_text(&e)),
        ),
    }

    match s3.get_object().bucket(bucket).key(&test_key).send().await {
        Ok(output) => match output.body.collect().await {
            Ok(data) => {
                if data.into_bytes().as_ref() == TEST_CONTENT.as_bytes() {
                    report.record("S3 GetObject", true, "Can read objects from bucket")
                } else {
                    report.record("S3 GetObject", false, "Read content doesn't match")
                }
            }
            Err(e) => report.record("S3 GetObject", false, format!("Cannot read: {}", e)),
        },
        Err(e) => report.record(
            "S3 GetObject",
            false,
            format!("Cannot read: {}", error_text(&e)),
        ),
    }

    match s3.delete_object().bucket(bucket).key(&test_key).send().await {
        Ok(_) => report.record("S3 DeleteObject", true, "Can delete objects from bucket"),
        Err(e) => report.record(
            "S3 DeleteObject",
            false,
            format!("Cannot delete: {}", error_text(&e)),
        ),
    }
}

async fn check_sagemaker(ctx: &AwsContext, report: &mut ProbeReport) {
    let sagemaker = ctx.sagemaker();

    match sagemaker.list_models().max_results(1).send().await {
        Ok(_) => report.record("SageMaker ListModels", true, "Can list SageMaker models"),
        Err(e) => report.record(
            "SageMaker ListModels",
            false,
            format!("Cannot list models: {}", error_text(&e)),
        ),
    }

    match sagemaker.list_endpoints().max_results(1).send().await {
        Ok(_) => report.record(
            "SageMaker ListEndpoints",
            true,
            "Can list SageMaker endpoints",
        ),
        Err(e) => report.record(
            "SageMaker ListEndpoints",
            false,
            format!("Cannot list endpoints: {}", error_text(&e)),
        ),
    }

    match sagemaker.list_endpoint_configs().max_results(1).send().await {
        Ok(_) => report.record(
            "SageMaker ListEndpointConfigs",
            true,
            "Can list endpoint configurations",
        ),
        Err(e) => report.record(
            "SageMaker ListEndpointConfigs",
            false,
            format!("Cannot list configs: {}", error_text(&e)),
        ),
    }
}

async fn check_ecr(ctx: &AwsContext, report: &mut ProbeReport) {
    use aws_sdk_ecr::error::ProvideErrorMetadata;

    match ctx.ecr().get_authorization_token().send().await {
        Ok(_) => report.record("ECR Authorization", true, "Can get ECR authorization token"),
        Err(e) if e.code() == Some("AccessDeniedException") => {
            report.record("ECR Authorization", false, "Access denied to ECR")
        }
        Err(e) => report.record(
            "ECR Authorization",
            false,
            format!("Error: {}", error_text(&e)),
        ),
    }
}

async fn check_logs(ctx: &AwsContext, report: &mut ProbeReport) {
    match ctx.logs().describe_log_groups().limit(1).send().await {
        Ok(_) => report.record("CloudWatch Logs", true, "Can access CloudWatch Logs"),
        Err(e) => report.record(
            "CloudWatch Logs",
            false,
            format!("Cannot access logs: {}", error_text(&e)),
        ),
    }
}

async fn check_secrets(ctx: &AwsContext, report: &mut ProbeReport) {
    match ctx.secrets_manager().list_secrets().max_results(1).send().await {
        Ok(_) => report.record(
            "Secrets Manager",
            true,
            "Can access Secrets Manager (optional)",
        ),
        Err(e) => report.record(
            "Secrets Manager",
            false,
            format!("Cannot access (not required): {}", error_text(&e)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(results: &[(&str, bool)]) -> ProbeReport {
        let mut report = ProbeReport {
            profile: "sso-dev".to_string(),
            ..Default::default()
        };
        for (name, success) in results {
            report.record(name, *success, "");
        }
        report
    }

    #[test]
    fn test_counts_and_failures() {
        let report = report(&[
            (STS_CHECK, true),
            (ROLE_CHECK, true),
            ("S3 Bucket Exists", true),
            ("S3 PutObject", false),
            ("Secrets Manager", false),
        ]);

        assert_eq!(report.passed(), 3);
        assert_eq!(report.failed(), 2);
        assert!(!report.all_passed());
        let failed: Vec<&str> = report.failures().map(|r| r.name.as_str()).collect();
        assert_eq!(failed, vec!["S3 PutObject", "Secrets Manager"]);
    }

    #[test]
    fn test_no_recommendations_when_clean() {
        let report = report(&[(STS_CHECK, true), ("SageMaker ListModels", true)]);
        assert!(report.all_passed());
        assert!(report.recommendations().is_empty());
    }

    #[test]
    fn test_recommendations_follow_failed_areas() {
        let report = report(&[
            (STS_CHECK, true),
            (ROLE_CHECK, false),
            ("S3 Bucket Exists", true),
            ("SageMaker ListModels", false),
            ("SageMaker ListEndpoints", false),
        ]);

        let hints = report.recommendations();
        assert!(hints.iter().any(|h| h.contains("SAGEMAKER_ROLE")));
        assert!(hints.iter().any(|h| h.contains("SageMaker permissions")));
        assert!(!hints.iter().any(|h| h.contains("aws sso login")));
        assert!(!hints.iter().any(|h| h.contains("S3 bucket name")));
    }

    #[test]
    fn test_auth_failure_recommends_login() {
        let report = report(&[(STS_CHECK, false)]);
        let hints = report.recommendations();
        assert_eq!(hints[0], "Run 'aws sso login --profile sso-dev' to authenticate");
    }
}
