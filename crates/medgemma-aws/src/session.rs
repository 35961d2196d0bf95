//! AWS session handling

use aws_config::{BehaviorVersion, Region, SdkConfig};
use medgemma_core::{MedgemmaResult, Settings};
use tracing::debug;

use crate::{aws_error, present};

/// Shared SDK configuration for one profile and region
#[derive(Clone)]
pub struct AwsContext {
    config: SdkConfig,
    profile: String,
    region: String,
}

impl AwsContext {
    /// Load SDK configuration for a named profile and region
    pub async fn load(profile: &str, region: &str) -> Self {
        debug!(profile = %profile, region = %region, "Loading AWS configuration");

        let config = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(profile)
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            config,
            profile: profile.to_string(),
            region: region.to_string(),
        }
    }

    /// Load SDK configuration from deployment settings
    pub async fn from_settings(settings: &Settings) -> Self {
        Self::load(&settings.aws_profile, &settings.aws_region).await
    }

    /// Profile name
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Region name
    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn sts(&self) -> aws_sdk_sts::Client {
        aws_sdk_sts::Client::new(&self.config)
    }

    pub fn iam(&self) -> aws_sdk_iam::Client {
        aws_sdk_iam::Client::new(&self.config)
    }

    pub fn s3(&self) -> aws_sdk_s3::Client {
        aws_sdk_s3::Client::new(&self.config)
    }

    pub fn sagemaker(&self) -> aws_sdk_sagemaker::Client {
        aws_sdk_sagemaker::Client::new(&self.config)
    }

    pub fn sagemaker_runtime(&self) -> aws_sdk_sagemakerruntime::Client {
        aws_sdk_sagemakerruntime::Client::new(&self.config)
    }

    pub fn logs(&self) -> aws_sdk_cloudwatchlogs::Client {
        aws_sdk_cloudwatchlogs::Client::new(&self.config)
    }

    pub fn ecr(&self) -> aws_sdk_ecr::Client {
        aws_sdk_ecr::Client::new(&self.config)
    }

    pub fn secrets_manager(&self) -> aws_sdk_secretsmanager::Client {
        aws_sdk_secretsmanager::Client::new(&self.config)
    }

    /// Resolve the calling identity; fails when credentials are missing or expired
    pub async fn caller_identity(&self) -> MedgemmaResult<CallerIdentity> {
        let output = self
            .sts()
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| aws_error("Authentication failed", e))?;

        Ok(CallerIdentity {
            account: present::<str>(output.account()).unwrap_or_default().to_string(),
            arn: present::<str>(output.arn()).unwrap_or_default().to_string(),
            user_id: present::<str>(output.user_id()).unwrap_or_default().to_string(),
        })
    }
}

/// Result of `sts:GetCallerIdentity`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

/// Kind of principal behind the credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    AssumedRole(String),
    User(String),
    Other,
}

impl CallerIdentity {
    /// Classify the principal from its ARN
    pub fn principal(&self) -> Principal {
        if let Some((_, rest)) = self.arn.split_once(":assumed-role/") {
            let role = rest.split('/').next().unwrap_or(rest);
            return Principal::AssumedRole(role.to_string());
        }
        if let Some((_, rest)) = self.arn.split_once(":user/") {
            return Principal::User(rest.to_string());
        }
        Principal::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(arn: &str) -> CallerIdentity {
        CallerIdentity {
            account: "123456789012".to_string(),
            arn: arn.to_string(),
            user_id: "AIDA".to_string(),
        }
    }

    #[test]
    fn test_principal_classification() {
        assert_eq!(
            identity("arn:aws:sts::123456789012:assumed-role/AdminSSO/jane").principal(),
            Principal::AssumedRole("AdminSSO".to_string())
        );
        assert_eq!(
            identity("arn:aws:iam::123456789012:user/deployer").principal(),
            Principal::User("deployer".to_string())
        );
        assert_eq!(
            identity("arn:aws:iam::123456789012:root").principal(),
            Principal::Other
        );
    }
}
