//! Artifact storage in S3

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
};
use medgemma_core::{MedgemmaError, MedgemmaResult};
use std::path::Path;
use tracing::{debug, info};

use crate::session::AwsContext;
use crate::{aws_error, flag, present};

/// Maximum number of keys accepted by one `DeleteObjects` call
pub const DELETE_BATCH_SIZE: usize = 1000;

/// SageMaker's default bucket name for a region and account
pub fn default_bucket_name(region: &str, account_id: &str) -> String {
    format!("sagemaker-{}-{}", region, account_id)
}

/// S3 URL of an object
pub fn s3_url(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

/// Object key of the model artifact under a prefix
pub fn artifact_key(prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        "model.tar.gz".to_string()
    } else {
        format!("{}/model.tar.gz", prefix)
    }
}

/// A deletable object version (or delete marker)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub key: String,
    pub version_id: Option<String>,
}

/// Split `objects` into `DeleteObjects`-sized batches
pub fn delete_batches(objects: &[ObjectRef]) -> Vec<&[ObjectRef]> {
    objects.chunks(DELETE_BATCH_SIZE).collect()
}

/// Whether the bucket exists and is reachable with the current credentials
pub async fn bucket_exists(ctx: &AwsContext, bucket: &str) -> MedgemmaResult<bool> {
    match ctx.s3().head_bucket().bucket(bucket).send().await {
        Ok(_) => Ok(true),
        Err(e) => {
            if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                Ok(false)
            } else {
                Err(aws_error(&format!("Cannot access bucket {}", bucket), e))
            }
        }
    }
}

/// Region the bucket lives in
pub async fn bucket_region(ctx: &AwsContext, bucket: &str) -> MedgemmaResult<String> {
    let output = ctx
        .s3()
        .get_bucket_location()
        .bucket(bucket)
        .send()
        .await
        .map_err(|e| aws_error("Cannot check bucket region", e))?;

    let region = present::<BucketLocationConstraint>(output.location_constraint())
        .map(|c| c.as_str().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "us-east-1".to_string());
    Ok(region)
}

/// Create a bucket in the context's region
pub async fn create_bucket(ctx: &AwsContext, bucket: &str) -> MedgemmaResult<()> {
    let mut request = ctx.s3().create_bucket().bucket(bucket);
    if ctx.region() != "us-east-1" {
        request = request.create_bucket_configuration(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(ctx.region()))
                .build(),
        );
    }

    request
        .send()
        .await
        .map_err(|e| aws_error(&format!("Failed to create bucket {}", bucket), e))?;
    info!(bucket = %bucket, region = %ctx.region(), "Created bucket");
    Ok(())
}

/// Configured bucket, or the SageMaker default bucket (created when missing)
pub async fn resolve_bucket(
    ctx: &AwsContext,
    configured: Option<&str>,
    account_id: &str,
) -> MedgemmaResult<String> {
    if let Some(bucket) = configured {
        return Ok(bucket.to_string());
    }

    let bucket = default_bucket_name(ctx.region(), account_id);
    if !bucket_exists(ctx, &bucket).await? {
        create_bucket(ctx, &bucket).await?;
    }
    Ok(bucket)
}

/// Upload a local file; returns its S3 URL
pub async fn upload_file(
    ctx: &AwsContext,
    path: &Path,
    bucket: &str,
    key: &str,
) -> MedgemmaResult<String> {
    let body = ByteStream::from_path(path).await.map_err(|e| {
        MedgemmaError::Artifact(format!("Failed to read {}: {}", path.display(), e))
    })?;

    ctx.s3()
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(body)
        .send()
        .await
        .map_err(|e| aws_error("Failed to upload artifact", e))?;

    let url = s3_url(bucket, key);
    info!(url = %url, "Uploaded artifact");
    Ok(url)
}

/// Every object version and delete marker in the bucket, optionally under a prefix.
///
/// A missing bucket is `MedgemmaError::NotFound`.
pub async fn list_object_versions(
    ctx: &AwsContext,
    bucket: &str,
    prefix: Option<&str>,
) -> MedgemmaResult<Vec<ObjectRef>> {
    let s3 = ctx.s3();
    let mut objects = Vec::new();
    let mut key_marker: Option<String> = None;
    let mut version_marker: Option<String> = None;

    loop {
        let output = s3
            .list_object_versions()
            .bucket(bucket)
            .set_prefix(prefix.map(str::to_string))
            .set_key_marker(key_marker.take())
            .set_version_id_marker(version_marker.take())
            .send()
            .await
            .map_err(|e| {
                use aws_sdk_s3::error::ProvideErrorMetadata;
                if e.code() == Some("NoSuchBucket") {
                    MedgemmaError::NotFound(format!("bucket {}", bucket))
                } else {
                    aws_error(&format!("Failed to list objects in {}", bucket), e)
                }
            })?;

        for version in output.versions() {
            if let Some(key) = present::<str>(version.key()) {
                objects.push(ObjectRef {
                    key: key.to_string(),
                    version_id: present::<str>(version.version_id()).map(str::to_string),
                });
            }
        }
        for marker in output.delete_markers() {
            if let Some(key) = present::<str>(marker.key()) {
                objects.push(ObjectRef {
                    key: key.to_string(),
                    version_id: present::<str>(marker.version_id()).map(str::to_string),
                });
            }
        }

        if !flag(output.is_truncated()) {
            break;
        }
        key_marker = present::<str>(output.next_key_marker()).map(str::to_string);
        version_marker = present::<str>(output.next_version_id_marker()).map(str::to_string);
        if key_marker.is_none() && version_marker.is_none() {
            break;
        }
    }

    Ok(objects)
}

/// Delete every object version and delete marker; returns how many were removed.
///
/// Any key the service refuses to delete fails the call.
pub async fn empty_bucket(
    ctx: &AwsContext,
    bucket: &str,
    prefix: Option<&str>,
) -> MedgemmaResult<usize> {
    let objects = list_object_versions(ctx, bucket, prefix).await?;
    let s3 = ctx.s3();

    for batch in delete_batches(&objects) {
        let identifiers = batch
            .iter()
            .map(|o| {
                ObjectIdentifier::builder()
                    .key(&o.key)
                    .set_version_id(o.version_id.clone())
                    .build()
                    .map_err(|e| MedgemmaError::Aws(format!("Invalid object identifier: {}", e)))
            })
            .collect::<MedgemmaResult<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| MedgemmaError::Aws(format!("Invalid delete request: {}", e)))?;

        let output = s3
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| aws_error("Failed to delete objects", e))?;

        let failures: Vec<DeleteFailure> = output
            .errors()
            .iter()
            .map(|e| DeleteFailure {
                key: e.key().unwrap_or_default().to_string(),
                code: e.code().unwrap_or("Unknown").to_string(),
                message: e.message().unwrap_or_default().to_string(),
            })
            .collect();
        if let Some(err) = delete_failures_error(bucket, batch.len(), &failures) {
            return Err(err);
        }
        debug!(bucket = %bucket, count = batch.len(), "Deleted object batch");
    }

    Ok(objects.len())
}

/// A key that `DeleteObjects` reported as not deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub code: String,
    pub message: String,
}

/// Error for a batch with per-key failures, if there were any
pub fn delete_failures_error(
    bucket: &str,
    batch_size: usize,
    failures: &[DeleteFailure],
) -> Option<MedgemmaError> {
    let first = failures.first()?;
    Some(MedgemmaError::Aws(format!(
        "Failed to delete {} of {} objects in {} (first: {}: {} {})",
        failures.len(),
        batch_size,
        bucket,
        first.key,
        first.code,
        first.message
    )))
}

/// Delete an empty bucket; returns `false` when it does not exist
pub async fn delete_bucket(ctx: &AwsContext, bucket: &str) -> MedgemmaResult<bool> {
    match ctx.s3().delete_bucket().bucket(bucket).send().await {
        Ok(_) => {
            info!(bucket = %bucket, "Deleted bucket");
            Ok(true)
        }
        Err(e) => {
            use aws_sdk_s3::error::ProvideErrorMetadata;
            if e.code() == Some("NoSuchBucket") {
                Ok(false)
            } else {
                Err(aws_error(&format!("Failed to delete bucket {}", bucket), e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_and_key_naming() {
        assert_eq!(
            default_bucket_name("ap-southeast-1", "123456789012"),
            "sagemaker-ap-southeast-1-123456789012"
        );
        assert_eq!(
            artifact_key("medgemma4-text-endpoint/"),
            "medgemma4-text-endpoint/model.tar.gz"
        );
        assert_eq!(artifact_key(""), "model.tar.gz");
        assert_eq!(s3_url("b", "p/model.tar.gz"), "s3://b/p/model.tar.gz");
    }

    #[test]
    fn test_delete_failures_fail_the_batch() {
        assert!(delete_failures_error("b", 3, &[]).is_none());

        let failures = vec![DeleteFailure {
            key: "medgemma4-text-endpoint/model.tar.gz".to_string(),
            code: "AccessDenied".to_string(),
            message: "Access Denied".to_string(),
        }];
        let err = delete_failures_error("b", 3, &failures).unwrap();
        assert!(matches!(err, MedgemmaError::Aws(_)));
        let text = err.to_string();
        assert!(text.contains("1 of 3"));
        assert!(text.contains("AccessDenied"));
        assert!(text.contains("medgemma4-text-endpoint/model.tar.gz"));
    }

    #[test]
    fn test_delete_batches_cap_at_limit() {
        let objects: Vec<ObjectRef> = (0..2500)
            .map(|i| ObjectRef {
                key: format!("k{}", i),
                version_id: None,
            })
            .collect();

        let sizes: Vec<usize> = delete_batches(&objects).iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert!(delete_batches(&[]).is_empty());
    }
}
