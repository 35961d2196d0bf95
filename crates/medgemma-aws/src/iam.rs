//! SageMaker execution role management

use medgemma_core::{MedgemmaError, MedgemmaResult};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::session::AwsContext;
use crate::{aws_error, present};

/// Default execution role name
pub const DEFAULT_ROLE_NAME: &str = "MedGemmaSageMakerRole";

/// Managed policies attached to a newly created role
pub const MANAGED_POLICIES: &[&str] = &[
    "arn:aws:iam::aws:policy/AmazonSageMakerFullAccess",
    "arn:aws:iam::aws:policy/AmazonS3FullAccess",
    "arn:aws:iam::aws:policy/CloudWatchLogsFullAccess",
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
];

/// Trust policy letting SageMaker assume the role
pub fn trust_policy() -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"Service": "sagemaker.amazonaws.com"},
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

/// Outcome of [`ensure_role`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleProvision {
    /// Role ARN
    pub arn: String,
    /// Whether the role was created by this call
    pub created: bool,
    /// Policies attached by this call
    pub attached_policies: Vec<String>,
}

/// Create the execution role, or reuse it when a role with that name exists
pub async fn ensure_role(ctx: &AwsContext, role_name: &str) -> MedgemmaResult<RoleProvision> {
    let iam = ctx.iam();
    info!(role = %role_name, "Creating IAM role");

    let created = iam
        .create_role()
        .role_name(role_name)
        .assume_role_policy_document(trust_policy())
        .description("Execution role for MedGemma SageMaker endpoint")
        .send()
        .await;

    let output = match created {
        Ok(output) => output,
        Err(e) => {
            let exists = e
                .as_service_error()
                .map(|se| se.is_entity_already_exists_exception())
                .unwrap_or(false);
            if !exists {
                return Err(aws_error("Error creating role", e));
            }

            warn!(role = %role_name, "Role already exists, reusing it");
            let arn = role_arn(ctx, role_name).await?.ok_or_else(|| {
                MedgemmaError::Aws(format!("Role {} exists but could not be read", role_name))
            })?;
            return Ok(RoleProvision {
                arn,
                created: false,
                attached_policies: Vec::new(),
            });
        }
    };

    let arn = output
        .role()
        .and_then(|role| present::<str>(role.arn()))
        .map(str::to_string)
        .ok_or_else(|| MedgemmaError::Aws("CreateRole returned no role ARN".to_string()))?;

    let mut attached_policies = Vec::new();
    for policy_arn in MANAGED_POLICIES {
        iam.attach_role_policy()
            .role_name(role_name)
            .policy_arn(*policy_arn)
            .send()
            .await
            .map_err(|e| aws_error(&format!("Failed to attach {}", policy_arn), e))?;
        debug!(role = %role_name, policy = %policy_arn, "Attached policy");
        attached_policies.push(policy_arn.to_string());
    }

    Ok(RoleProvision {
        arn,
        created: true,
        attached_policies,
    })
}

/// ARN of the named role, `None` when it does not exist
pub async fn role_arn(ctx: &AwsContext, role_name: &str) -> MedgemmaResult<Option<String>> {
    match ctx.iam().get_role().role_name(role_name).send().await {
        Ok(output) => Ok(output
            .role()
            .and_then(|role| present::<str>(role.arn()))
            .map(str::to_string)),
        Err(e) => {
            if e.as_service_error()
                .map(|se| se.is_no_such_entity_exception())
                .unwrap_or(false)
            {
                Ok(None)
            } else {
                Err(aws_error(&format!("Error checking role {}", role_name), e))
            }
        }
    }
}

/// Delete the role after detaching managed policies and deleting inline ones.
///
/// Returns `false` when the role does not exist.
pub async fn delete_role(ctx: &AwsContext, role_name: &str) -> MedgemmaResult<bool> {
    let iam = ctx.iam();

    let attached = match iam
        .list_attached_role_policies()
        .role_name(role_name)
        .send()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            if e.as_service_error()
                .map(|se| se.is_no_such_entity_exception())
                .unwrap_or(false)
            {
                return Ok(false);
            }
            return Err(aws_error("Failed to list attached policies", e));
        }
    };

    for policy in attached.attached_policies() {
        let Some(policy_arn) = present::<str>(policy.policy_arn()) else {
            continue;
        };
        iam.detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| aws_error(&format!("Failed to detach {}", policy_arn), e))?;
        info!(role = %role_name, policy = %policy_arn, "Detached policy");
    }

    let inline = iam
        .list_role_policies()
        .role_name(role_name)
        .send()
        .await
        .map_err(|e| aws_error("Failed to list inline policies", e))?;

    for policy_name in inline.policy_names() {
        iam.delete_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(|e| aws_error(&format!("Failed to delete inline policy {}", policy_name), e))?;
        info!(role = %role_name, policy = %policy_name, "Deleted inline policy");
    }

    iam.delete_role()
        .role_name(role_name)
        .send()
        .await
        .map_err(|e| aws_error(&format!("Failed to delete role {}", role_name), e))?;

    info!(role = %role_name, "Deleted IAM role");
    Ok(true)
}
