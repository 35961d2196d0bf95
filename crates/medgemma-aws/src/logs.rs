//! Endpoint logs in CloudWatch Logs

use aws_sdk_cloudwatchlogs::types::OrderBy;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use medgemma_core::MedgemmaResult;
use tracing::info;

use crate::session::AwsContext;
use crate::{aws_error, present};

/// How far back `tail_endpoint_logs` looks
pub const LOG_WINDOW_MINUTES: i64 = 30;

/// Maximum number of events returned by `tail_endpoint_logs`
pub const LOG_EVENT_LIMIT: i32 = 100;

/// Log group SageMaker writes endpoint container output to
pub fn endpoint_log_group(endpoint_name: &str) -> String {
    format!("/aws/sagemaker/Endpoints/{}", endpoint_name)
}

/// Whether a log group belongs to this deployment (case-insensitive)
pub fn is_deployment_log_group(group_name: &str, endpoint_name: Option<&str>) -> bool {
    let group = group_name.to_lowercase();
    group.contains("medgemma")
        || endpoint_name
            .filter(|name| !name.is_empty())
            .map(|name| group.contains(&name.to_lowercase()))
            .unwrap_or(false)
}

/// One log event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: Option<DateTime<Utc>>,
    pub message: String,
}

/// Recent events of the most recent log stream of an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointLogs {
    /// The log group does not exist yet
    GroupNotFound(String),
    /// The log group has no streams yet
    NoStreams(String),
    /// Events from the named stream
    Events { stream: String, lines: Vec<LogLine> },
}

/// Fetch recent events from the newest log stream of `endpoint_name`
pub async fn tail_endpoint_logs(
    ctx: &AwsContext,
    endpoint_name: &str,
) -> MedgemmaResult<EndpointLogs> {
    let logs = ctx.logs();
    let group = endpoint_log_group(endpoint_name);

    let streams = match logs
        .describe_log_streams()
        .log_group_name(&group)
        .order_by(OrderBy::LastEventTime)
        .descending(true)
        .limit(5)
        .send()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            if e.as_service_error()
                .map(|se| se.is_resource_not_found_exception())
                .unwrap_or(false)
            {
                return Ok(EndpointLogs::GroupNotFound(group));
            }
            return Err(aws_error("Error retrieving log streams", e));
        }
    };

    let Some(stream) = streams
        .log_streams()
        .first()
        .and_then(|s| present::<str>(s.log_stream_name()))
        .map(str::to_string)
    else {
        return Ok(EndpointLogs::NoStreams(group));
    };

    let start_time = (Utc::now() - ChronoDuration::minutes(LOG_WINDOW_MINUTES)).timestamp_millis();
    let output = logs
        .get_log_events()
        .log_group_name(&group)
        .log_stream_name(&stream)
        .start_time(start_time)
        .start_from_head(false)
        .limit(LOG_EVENT_LIMIT)
        .send()
        .await
        .map_err(|e| aws_error("Error retrieving log events", e))?;

    let lines = output
        .events()
        .iter()
        .map(|event| LogLine {
            timestamp: event.timestamp().and_then(DateTime::<Utc>::from_timestamp_millis),
            message: present::<str>(event.message()).unwrap_or_default().to_string(),
        })
        .collect();

    Ok(EndpointLogs::Events { stream, lines })
}

/// Names of all log groups
pub async fn list_log_groups(ctx: &AwsContext) -> MedgemmaResult<Vec<String>> {
    let logs = ctx.logs();
    let mut groups = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let output = logs
            .describe_log_groups()
            .set_next_token(next_token.take())
            .send()
            .await
            .map_err(|e| aws_error("Failed to list log groups", e))?;

        groups.extend(
            output
                .log_groups()
                .iter()
                .filter_map(|g| present::<str>(g.log_group_name()).map(str::to_string)),
        );

        next_token = present::<str>(output.next_token()).map(str::to_string);
        if next_token.is_none() {
            break;
        }
    }

    Ok(groups)
}

/// Log groups belonging to this deployment
pub async fn deployment_log_groups(
    ctx: &AwsContext,
    endpoint_name: Option<&str>,
) -> MedgemmaResult<Vec<String>> {
    Ok(list_log_groups(ctx)
        .await?
        .into_iter()
        .filter(|g| is_deployment_log_group(g, endpoint_name))
        .collect())
}

/// Delete a log group
pub async fn delete_log_group(ctx: &AwsContext, group_name: &str) -> MedgemmaResult<()> {
    ctx.logs()
        .delete_log_group()
        .log_group_name(group_name)
        .send()
        .await
        .map_err(|e| aws_error(&format!("Failed to delete log group {}", group_name), e))?;
    info!(group = %group_name, "Deleted log group");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_log_group() {
        assert_eq!(
            endpoint_log_group("medgemma-4b-it-2026-10-18-09-30-00-123"),
            "/aws/sagemaker/Endpoints/medgemma-4b-it-2026-10-18-09-30-00-123"
        );
    }

    #[test]
    fn test_deployment_log_group_matching() {
        assert!(is_deployment_log_group(
            "/aws/sagemaker/Endpoints/MedGemma-Prod",
            None
        ));
        assert!(is_deployment_log_group(
            "/aws/sagemaker/Endpoints/radiology-ep",
            Some("Radiology-EP")
        ));
        assert!(!is_deployment_log_group(
            "/aws/lambda/billing",
            Some("radiology-ep")
        ));
        assert!(!is_deployment_log_group("/aws/lambda/billing", Some("")));
    }
}
