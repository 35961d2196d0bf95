//! Account setup and diagnostics commands

use anyhow::{bail, Result};
use medgemma_aws::iam;
use medgemma_aws::logs::{self, EndpointLogs};
use medgemma_aws::probe::run_probe;
use medgemma_aws::ProbeReport;
use medgemma_core::resolve_endpoint_name;

use super::{banner, rule, Project};

pub async fn create_role(project: &Project, role_name: &str) -> Result<()> {
    let ctx = project.aws().await;
    project.authenticate(&ctx).await?;

    println!("Creating IAM role: {}", role_name);
    let provision = iam::ensure_role(&ctx, role_name).await?;

    if provision.created {
        println!("Created role: {}", provision.arn);
        for policy in &provision.attached_policies {
            println!("  Attached policy: {}", policy);
        }
    } else {
        println!("Role already exists: {}", provision.arn);
    }

    println!("\nAdd this line to your .env file:");
    println!("SAGEMAKER_ROLE={}", provision.arn);
    Ok(())
}

fn print_report(report: &ProbeReport) {
    println!();
    banner("TEST RESULTS SUMMARY");
    for result in &report.results {
        let mark = if result.success { "PASS" } else { "FAIL" };
        println!("[{}] {}: {}", mark, result.name, result.message);
    }
    println!("{}", rule());
    println!(
        "Total: {}  Passed: {}  Failed: {}",
        report.results.len(),
        report.passed(),
        report.failed()
    );

    if report.all_passed() {
        println!("\nAll checks passed. Ready to deploy with: medgemma deploy");
        return;
    }

    println!("\nFailed checks:");
    for failure in report.failures() {
        println!("  - {}: {}", failure.name, failure.message);
    }
    println!("\nRecommendations:");
    for hint in report.recommendations() {
        println!("  - {}", hint);
    }
}

pub async fn check_aws(project: &Project) -> Result<()> {
    let ctx = project.aws().await;

    banner("AWS Connection Test for MedGemma Deployment");
    println!("Profile: {}", ctx.profile());
    println!("Region: {}", ctx.region());
    println!("S3 Prefix: {}", project.settings.s3_prefix);

    let report = run_probe(&ctx, &project.settings).await;

    if let Some(arn) = &report.identity_arn {
        println!("Identity: {}", arn);
    }
    if let Some(account) = &report.account_id {
        println!("Account: {}", account);
    }
    if let Some(bucket) = &report.bucket {
        println!("Bucket: {}", bucket);
    }
    print_report(&report);

    if !report.all_passed() {
        bail!("{} of {} checks failed", report.failed(), report.results.len());
    }
    Ok(())
}

pub async fn logs(project: &Project) -> Result<()> {
    let endpoint_name = resolve_endpoint_name(
        &project.layout.endpoint_info_path(),
        project.settings.endpoint_name.as_deref(),
    )?;
    let ctx = project.aws().await;

    println!("Checking logs for endpoint: {}", endpoint_name);
    println!("Log group: {}", logs::endpoint_log_group(&endpoint_name));
    println!("{}", "=".repeat(70));

    match logs::tail_endpoint_logs(&ctx, &endpoint_name).await? {
        EndpointLogs::GroupNotFound(group) => {
            println!("Log group not found: {}", group);
            println!("The endpoint may still be creating or hasn't generated logs yet.");
        }
        EndpointLogs::NoStreams(_) => {
            println!("No log streams found yet. Endpoint may still be starting up.");
        }
        EndpointLogs::Events { stream, lines } => {
            println!("Most recent log stream: {}\n", stream);
            println!("Recent logs:");
            println!("{}", "=".repeat(70));
            for line in lines {
                let timestamp = line
                    .timestamp
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("[{}] {}", timestamp, line.message.trim_end());
            }
            println!("{}", "=".repeat(70));
        }
    }

    Ok(())
}
