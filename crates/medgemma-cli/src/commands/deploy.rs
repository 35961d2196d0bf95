//! `medgemma deploy`

use anyhow::{bail, Result};
use chrono::Utc;
use medgemma_aws::{iam, s3, sagemaker};
use medgemma_core::{naming, EndpointInfo, Settings};
use medgemma_store::package_model;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use super::{banner, rule, Project};

const ENDPOINT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Environment of the serving container
pub fn container_environment(settings: &Settings, hf_token: &str) -> HashMap<String, String> {
    HashMap::from([
        ("HF_MODEL_ID".to_string(), settings.model_id.clone()),
        ("HF_TOKEN".to_string(), hf_token.to_string()),
    ])
}

fn print_configuration(settings: &Settings) {
    banner("MedGemma SageMaker Deployment Configuration");
    println!("Model ID: {}", settings.model_id);
    println!("Instance Type: {}", settings.instance_type);
    println!("Instance Count: {}", settings.instance_count);
    println!(
        "Endpoint Name: {}",
        settings.endpoint_name.as_deref().unwrap_or("Auto-generated")
    );
    println!(
        "S3 Bucket: {}",
        settings
            .s3_bucket
            .as_deref()
            .unwrap_or("Default SageMaker bucket")
    );
    println!("S3 Prefix: {}", settings.s3_prefix);
    println!("AWS Region: {}", settings.aws_region);
    println!("AWS Profile: {}", settings.aws_profile);
    println!(
        "SageMaker Role: {}",
        settings.sagemaker_role.as_deref().unwrap_or("(not set)")
    );
    println!(
        "Image URI: {}",
        settings.image_uri.as_deref().unwrap_or("(not set)")
    );
    println!("{}", rule());
}

pub async fn deploy(project: &Project) -> Result<()> {
    let settings = &project.settings;
    print_configuration(settings);

    let hf_token = settings.require_hf_token()?;
    let role = settings.require_role()?;
    let image_uri = settings.require_image_uri()?;

    let ctx = project.aws().await;
    let identity = project.authenticate(&ctx).await?;
    println!("\nAuthenticated as: {}", identity.arn);

    let bucket = s3::resolve_bucket(&ctx, settings.s3_bucket.as_deref(), &identity.account).await?;
    println!("Using S3 Bucket: {}", bucket);
    println!("Using IAM Role: {}", role);

    println!("\nVerifying SageMaker execution role...");
    let role_name = settings.role_name().unwrap_or(role);
    if iam::role_arn(&ctx, role_name).await?.is_none() {
        eprintln!("Role not found: {}", role_name);
        eprintln!("To create the role, run: medgemma create-role {}", role_name);
        bail!("SageMaker execution role {} does not exist", role_name);
    }
    println!("Role verified: {}", role_name);

    println!("\nPackaging model artifacts...");
    let artifact = package_model(&project.layout)?;
    println!(
        "Created {} ({} bytes, {} files)",
        artifact.path.display(),
        artifact.size,
        artifact.entries.len()
    );

    println!("\nUploading to S3...");
    let model_data =
        s3::upload_file(&ctx, &artifact.path, &bucket, &s3::artifact_key(&settings.s3_prefix))
            .await?;
    println!("Uploaded to: {}", model_data);

    let now = Utc::now();
    let model_name = naming::resource_name(&settings.model_id, now);
    let endpoint_name =
        naming::endpoint_name(settings.endpoint_name.as_deref(), &settings.model_id, now);

    println!("\nUsing container image: {}", image_uri);
    println!("Creating SageMaker model {}...", model_name);
    sagemaker::create_model(
        &ctx,
        &model_name,
        image_uri,
        &model_data,
        role,
        container_environment(settings, hf_token),
    )
    .await?;

    println!("\nDeploying endpoint {}...", endpoint_name);
    println!("   Instance Type: {}", settings.instance_type);
    println!("   Instance Count: {}", settings.instance_count);
    println!("   This may take 5-10 minutes...");

    // The endpoint configuration shares the endpoint's name
    sagemaker::create_endpoint_config(
        &ctx,
        &endpoint_name,
        &model_name,
        &settings.instance_type,
        settings.instance_count,
    )
    .await?;
    sagemaker::create_endpoint(&ctx, &endpoint_name, &endpoint_name).await?;

    if let Err(e) = sagemaker::wait_for_endpoint(
        &ctx,
        &endpoint_name,
        Duration::from_secs(settings.deploy_timeout_secs),
        ENDPOINT_POLL_INTERVAL,
    )
    .await
    {
        eprintln!("\nDeployment failed: {}", e);
        eprintln!("\nTroubleshooting:");
        eprintln!("1. Verify role exists and has correct permissions");
        eprintln!("2. Check S3 bucket is accessible");
        eprintln!("3. Ensure you're in the correct AWS region");
        eprintln!("4. Inspect the container output with: medgemma logs");
        return Err(e.into());
    }

    let info = EndpointInfo {
        endpoint_name: endpoint_name.clone(),
        model_data,
        instance_type: settings.instance_type.clone(),
        region: ctx.region().to_string(),
        role: role.to_string(),
    };
    let info_path = project.layout.endpoint_info_path();
    info.write(&info_path)?;
    info!(path = %info_path.display(), "Recorded endpoint info");

    println!();
    banner("DEPLOYMENT SUCCESSFUL!");
    println!("Endpoint Name: {}", endpoint_name);
    println!("{}", rule());
    println!("\nEndpoint info saved to: {}", info_path.display());
    println!("\nTest your endpoint with: medgemma test-endpoint");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_environment() {
        let settings = Settings::default();
        let env = container_environment(&settings, "hf_secret");
        assert_eq!(env["HF_MODEL_ID"], "google/medgemma-4b-it");
        assert_eq!(env["HF_TOKEN"], "hf_secret");
        assert_eq!(env.len(), 2);
    }
}
