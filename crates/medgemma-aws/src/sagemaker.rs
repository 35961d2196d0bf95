//! SageMaker model and endpoint lifecycle

use aws_sdk_sagemaker::error::ProvideErrorMetadata;
use aws_sdk_sagemaker::primitives::DateTime as AwsDateTime;
use aws_sdk_sagemaker::types::{
    ContainerDefinition, EndpointStatus, ProductionVariant, ProductionVariantInstanceType,
};
use chrono::{DateTime, Utc};
use medgemma_core::{MedgemmaError, MedgemmaResult};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::session::AwsContext;
use crate::{aws_error, present};

/// Name of the single production variant
pub const VARIANT_NAME: &str = "AllTraffic";

/// Page size for list calls
const PAGE_SIZE: i32 = 100;

/// Whether an error means the resource does not exist.
///
/// SageMaker reports missing endpoints and configs as `ValidationException`
/// with a "Could not find" message.
pub fn is_missing_resource(code: Option<&str>, message: Option<&str>) -> bool {
    matches!(code, Some("ResourceNotFound") | Some("ResourceNotFoundException"))
        || message
            .map(|m| m.contains("Could not find") || m.contains("does not exist"))
            .unwrap_or(false)
}

fn missing<E: ProvideErrorMetadata>(err: &E) -> bool {
    is_missing_resource(err.code(), err.message())
}

fn to_chrono(value: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos())
}

/// Summary of a registered model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub created: Option<DateTime<Utc>>,
}

/// Current state of an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointState {
    pub name: String,
    pub status: String,
    pub config_name: Option<String>,
    pub failure_reason: Option<String>,
}

/// What a poll of the endpoint status means for a waiting deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitDecision {
    Ready,
    Pending,
    Failed(String),
}

/// Interpret an endpoint status while waiting for `InService`
pub fn wait_decision(status: &str, failure_reason: Option<&str>) -> WaitDecision {
    match status {
        "InService" => WaitDecision::Ready,
        "Failed" | "OutOfService" | "Deleting" => WaitDecision::Failed(
            failure_reason
                .map(str::to_string)
                .unwrap_or_else(|| format!("Endpoint status is {}", status)),
        ),
        _ => WaitDecision::Pending,
    }
}

/// Models not referenced by any live endpoint configuration
pub fn find_orphans(models: &[ModelInfo], active: &HashSet<String>) -> Vec<ModelInfo> {
    models
        .iter()
        .filter(|m| !active.contains(&m.name))
        .cloned()
        .collect()
}

/// Register a model pointing at the serving image and the artifact
pub async fn create_model(
    ctx: &AwsContext,
    model_name: &str,
    image_uri: &str,
    model_data: &str,
    role_arn: &str,
    environment: HashMap<String, String>,
) -> MedgemmaResult<()> {
    let container = ContainerDefinition::builder()
        .image(image_uri)
        .model_data_url(model_data)
        .set_environment(Some(environment))
        .build();

    ctx.sagemaker()
        .create_model()
        .model_name(model_name)
        .primary_container(container)
        .execution_role_arn(role_arn)
        .send()
        .await
        .map_err(|e| aws_error(&format!("Failed to create model {}", model_name), e))?;

    info!(model = %model_name, image = %image_uri, "Created SageMaker model");
    Ok(())
}

/// Create an endpoint configuration with one production variant
pub async fn create_endpoint_config(
    ctx: &AwsContext,
    config_name: &str,
    model_name: &str,
    instance_type: &str,
    instance_count: u32,
) -> MedgemmaResult<()> {
    let count = i32::try_from(instance_count)
        .map_err(|_| MedgemmaError::Config(format!("Invalid instance count {}", instance_count)))?;

    let variant = ProductionVariant::builder()
        .variant_name(VARIANT_NAME)
        .model_name(model_name)
        .initial_instance_count(count)
        .instance_type(ProductionVariantInstanceType::from(instance_type))
        .build();

    ctx.sagemaker()
        .create_endpoint_config()
        .endpoint_config_name(config_name)
        .production_variants(variant)
        .send()
        .await
        .map_err(|e| aws_error(&format!("Failed to create endpoint config {}", config_name), e))?;

    info!(config = %config_name, instance_type = %instance_type, "Created endpoint config");
    Ok(())
}

/// Request endpoint creation
pub async fn create_endpoint(
    ctx: &AwsContext,
    endpoint_name: &str,
    config_name: &str,
) -> MedgemmaResult<()> {
    ctx.sagemaker()
        .create_endpoint()
        .endpoint_name(endpoint_name)
        .endpoint_config_name(config_name)
        .send()
        .await
        .map_err(|e| aws_error(&format!("Failed to create endpoint {}", endpoint_name), e))?;

    info!(endpoint = %endpoint_name, "Endpoint creation requested");
    Ok(())
}

/// Describe an endpoint; `None` when it does not exist
pub async fn describe_endpoint(
    ctx: &AwsContext,
    endpoint_name: &str,
) -> MedgemmaResult<Option<EndpointState>> {
    match ctx
        .sagemaker()
        .describe_endpoint()
        .endpoint_name(endpoint_name)
        .send()
        .await
    {
        Ok(output) => Ok(Some(EndpointState {
            name: endpoint_name.to_string(),
            status: present::<EndpointStatus>(output.endpoint_status())
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            config_name: present::<str>(output.endpoint_config_name()).map(str::to_string),
            failure_reason: present::<str>(output.failure_reason()).map(str::to_string),
        })),
        Err(e) if missing(&e) => Ok(None),
        Err(e) => Err(aws_error(&format!("Failed to describe endpoint {}", endpoint_name), e)),
    }
}

/// Poll until the endpoint is `InService`, fails, or `timeout` elapses
pub async fn wait_for_endpoint(
    ctx: &AwsContext,
    endpoint_name: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> MedgemmaResult<EndpointState> {
    let started = Instant::now();

    loop {
        let state = describe_endpoint(ctx, endpoint_name).await?.ok_or_else(|| {
            MedgemmaError::NotFound(format!("Endpoint {} disappeared while waiting", endpoint_name))
        })?;

        match wait_decision(&state.status, state.failure_reason.as_deref()) {
            WaitDecision::Ready => {
                info!(
                    endpoint = %endpoint_name,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Endpoint is InService"
                );
                return Ok(state);
            }
            WaitDecision::Failed(reason) => {
                return Err(MedgemmaError::Aws(format!(
                    "Endpoint {} failed: {}",
                    endpoint_name, reason
                )));
            }
            WaitDecision::Pending => {
                debug!(endpoint = %endpoint_name, status = %state.status, "Waiting for endpoint");
            }
        }

        if started.elapsed() >= timeout {
            return Err(MedgemmaError::Aws(format!(
                "Endpoint {} not InService after {}s (status: {})",
                endpoint_name,
                timeout.as_secs(),
                state.status
            )));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Model names referenced by an endpoint configuration; `None` when it does not exist
pub async fn endpoint_config_models(
    ctx: &AwsContext,
    config_name: &str,
) -> MedgemmaResult<Option<Vec<String>>> {
    match ctx
        .sagemaker()
        .describe_endpoint_config()
        .endpoint_config_name(config_name)
        .send()
        .await
    {
        Ok(output) => Ok(Some(
            output
                .production_variants()
                .iter()
                .filter_map(|v| present::<str>(v.model_name()).map(str::to_string))
                .collect(),
        )),
        Err(e) if missing(&e) => Ok(None),
        Err(e) => Err(aws_error(
            &format!("Failed to describe endpoint config {}", config_name),
            e,
        )),
    }
}

/// Delete an endpoint; returns `false` when it does not exist
pub async fn delete_endpoint(ctx: &AwsContext, endpoint_name: &str) -> MedgemmaResult<bool> {
    match ctx
        .sagemaker()
        .delete_endpoint()
        .endpoint_name(endpoint_name)
        .send()
        .await
    {
        Ok(_) => {
            info!(endpoint = %endpoint_name, "Deleted endpoint");
            Ok(true)
        }
        Err(e) if missing(&e) => Ok(false),
        Err(e) => Err(aws_error(&format!("Failed to delete endpoint {}", endpoint_name), e)),
    }
}

/// Delete an endpoint configuration; returns `false` when it does not exist
pub async fn delete_endpoint_config(ctx: &AwsContext, config_name: &str) -> MedgemmaResult<bool> {
    match ctx
        .sagemaker()
        .delete_endpoint_config()
        .endpoint_config_name(config_name)
        .send()
        .await
    {
        Ok(_) => {
            info!(config = %config_name, "Deleted endpoint config");
            Ok(true)
        }
        Err(e) if missing(&e) => Ok(false),
        Err(e) => Err(aws_error(
            &format!("Failed to delete endpoint config {}", config_name),
            e,
        )),
    }
}

/// Delete a model; returns `false` when it does not exist
pub async fn delete_model(ctx: &AwsContext, model_name: &str) -> MedgemmaResult<bool> {
    match ctx
        .sagemaker()
        .delete_model()
        .model_name(model_name)
        .send()
        .await
    {
        Ok(_) => {
            info!(model = %model_name, "Deleted model");
            Ok(true)
        }
        Err(e) if missing(&e) => Ok(false),
        Err(e) => Err(aws_error(&format!("Failed to delete model {}", model_name), e)),
    }
}

/// All registered models
pub async fn list_models(ctx: &AwsContext) -> MedgemmaResult<Vec<ModelInfo>> {
    let client = ctx.sagemaker();
    let mut models = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let output = client
            .list_models()
            .max_results(PAGE_SIZE)
            .set_next_token(next_token.take())
            .send()
            .await
            .map_err(|e| aws_error("Failed to list models", e))?;

        for model in output.models() {
            if let Some(name) = present::<str>(model.model_name()) {
                models.push(ModelInfo {
                    name: name.to_string(),
                    created: present::<AwsDateTime>(model.creation_time()).and_then(to_chrono),
                });
            }
        }

        next_token = present::<str>(output.next_token()).map(str::to_string);
        if next_token.is_none() {
            break;
        }
    }

    Ok(models)
}

/// Names of all endpoints
pub async fn list_endpoints(ctx: &AwsContext) -> MedgemmaResult<Vec<String>> {
    let client = ctx.sagemaker();
    let mut names = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let output = client
            .list_endpoints()
            .max_results(PAGE_SIZE)
            .set_next_token(next_token.take())
            .send()
            .await
            .map_err(|e| aws_error("Failed to list endpoints", e))?;

        names.extend(
            output
                .endpoints()
                .iter()
                .filter_map(|e| present::<str>(e.endpoint_name()).map(str::to_string)),
        );

        next_token = present::<str>(output.next_token()).map(str::to_string);
        if next_token.is_none() {
            break;
        }
    }

    Ok(names)
}

/// Names of all endpoint configurations
pub async fn list_endpoint_configs(ctx: &AwsContext) -> MedgemmaResult<Vec<String>> {
    let client = ctx.sagemaker();
    let mut names = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let output = client
            .list_endpoint_configs()
            .max_results(PAGE_SIZE)
            .set_next_token(next_token.take())
            .send()
            .await
            .map_err(|e| aws_error("Failed to list endpoint configs", e))?;

        names.extend(
            output
                .endpoint_configs()
                .iter()
                .filter_map(|c| present::<str>(c.endpoint_config_name()).map(str::to_string)),
        );

        next_token = present::<str>(output.next_token()).map(str::to_string);
        if next_token.is_none() {
            break;
        }
    }

    Ok(names)
}

/// Models referenced by the configuration of one endpoint; `None` when the endpoint is gone
async fn endpoint_models(ctx: &AwsContext, endpoint_name: &str) -> MedgemmaResult<Option<Vec<String>>> {
    let Some(config_name) = describe_endpoint(ctx, endpoint_name)
        .await?
        .and_then(|state| state.config_name)
    else {
        return Ok(None);
    };
    endpoint_config_models(ctx, &config_name).await
}

/// Union of the models each live endpoint references.
///
/// An endpoint that could not be inspected makes the set unknown, so the
/// whole merge fails rather than under-reporting what is in use.
pub fn merge_active_models<I>(inspected: I) -> MedgemmaResult<HashSet<String>>
where
    I: IntoIterator<Item = (String, MedgemmaResult<Option<Vec<String>>>)>,
{
    let mut active = HashSet::new();
    for (endpoint, models) in inspected {
        match models {
            Ok(Some(models)) => active.extend(models),
            Ok(None) => {}
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Failed to inspect endpoint");
                return Err(MedgemmaError::Aws(format!(
                    "Cannot determine the models used by endpoint {}: {}",
                    endpoint, e
                )));
            }
        }
    }
    Ok(active)
}

/// Models referenced by the configuration of any live endpoint
pub async fn active_models(ctx: &AwsContext) -> MedgemmaResult<HashSet<String>> {
    let mut inspected = Vec::new();
    for endpoint in list_endpoints(ctx).await? {
        let models = endpoint_models(ctx, &endpoint).await;
        inspected.push((endpoint, models));
    }
    merge_active_models(inspected)
}

/// Registered models no live endpoint refers to
pub async fn orphaned_models(ctx: &AwsContext) -> MedgemmaResult<Vec<ModelInfo>> {
    let models = list_models(ctx).await?;
    let active = active_models(ctx).await?;
    Ok(find_orphans(&models, &active))
}
