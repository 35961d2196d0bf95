//! `medgemma cleanup` and `medgemma verify`

use anyhow::{bail, Result};
use medgemma_aws::iam::DEFAULT_ROLE_NAME;
use medgemma_aws::s3::default_bucket_name;
use medgemma_aws::sagemaker::{orphaned_models, ModelInfo};
use medgemma_aws::teardown::{self, has_failures};
use medgemma_aws::{StepOutcome, TeardownPlan, VerificationReport};
use medgemma_core::EndpointInfo;
use medgemma_store::clean_local_artifacts;
use tracing::warn;

use super::{banner, is_yes, prompt_line, rule, Project};

/// Phrase that confirms a full teardown
pub const CONFIRMATION_PHRASE: &str = "DELETE ALL";

const TABLE_WIDTH: usize = 90;

fn recorded_endpoint(project: &Project) -> Option<String> {
    let path = project.layout.endpoint_info_path();
    if !path.exists() {
        return None;
    }
    match EndpointInfo::read(&path) {
        Ok(info) => Some(info.endpoint_name),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable endpoint info");
            None
        }
    }
}

fn print_orphans(orphans: &[ModelInfo]) {
    println!("\n{}", "=".repeat(TABLE_WIDTH));
    println!(
        "Found {} orphaned models from failed deployments:",
        orphans.len()
    );
    println!("{}", "=".repeat(TABLE_WIDTH));
    println!("{:<65} {:<25}", "Model Name", "Created");
    println!("{}", "-".repeat(TABLE_WIDTH));
    for model in orphans {
        let created = model
            .created
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "N/A".to_string());
        println!("{:<65} {:<25}", model.name, created);
    }
    println!("{}", "=".repeat(TABLE_WIDTH));
}

fn print_intro() {
    println!();
    banner("COMPLETE CLEANUP");
    println!("\nThis will delete:");
    println!("  - SageMaker endpoint (stops instance billing)");
    println!("  - Endpoint configuration");
    println!("  - Model");
    println!("  - Orphaned models from failed deployments");
    println!("  - S3 bucket and all contents (or the artifact prefix in the default bucket)");
    println!("  - IAM role");
    println!("  - CloudWatch logs");
    println!("  - Local build files");
    println!("\nWARNING: This action cannot be undone!");
    println!("{}", rule());
}

pub async fn cleanup(project: &Project, yes: bool, delete_orphans: bool) -> Result<()> {
    let settings = &project.settings;
    print_intro();

    let endpoint_name = recorded_endpoint(project);
    match &endpoint_name {
        Some(name) => println!("\nEndpoint to delete: {}", name),
        None => {
            println!("\nNo endpoint info found in {}", project.layout.endpoint_info_path().display());
            println!("Will skip SageMaker endpoint cleanup (may already be deleted)");
        }
    }

    let ctx = project.aws().await;
    let identity = project.authenticate(&ctx).await?;

    println!("\nChecking for orphaned models...");
    let orphans = match orphaned_models(&ctx).await {
        Ok(orphans) if orphans.is_empty() => {
            println!("No orphaned models found");
            orphans
        }
        Ok(orphans) => {
            print_orphans(&orphans);
            println!("\nThese models are from failed deployments and are not attached to any endpoint.");
            orphans
        }
        Err(e) => {
            println!("Warning: orphan detection unavailable: {}", e);
            println!("   No models will be deleted as orphans in this run");
            Vec::new()
        }
    };

    if !yes {
        println!("\n{}", rule());
        let answer = prompt_line(&format!(
            "Type '{}' to proceed with cleanup: ",
            CONFIRMATION_PHRASE
        ))?;
        if answer != CONFIRMATION_PHRASE {
            println!("\nCleanup cancelled");
            return Ok(());
        }
    }

    let delete_orphans = if orphans.is_empty() {
        false
    } else if delete_orphans {
        true
    } else if yes {
        false
    } else {
        println!("\n{}", rule());
        is_yes(&prompt_line(&format!(
            "Delete {} orphaned models? (yes/no): ",
            orphans.len()
        ))?)
    };

    let default_bucket = default_bucket_name(ctx.region(), &identity.account);
    let plan = TeardownPlan {
        endpoint_name: endpoint_name.clone(),
        orphaned_models: if delete_orphans {
            orphans.iter().map(|m| m.name.clone()).collect()
        } else {
            Vec::new()
        },
        storage: TeardownPlan::storage_for(
            settings.s3_bucket.as_deref(),
            Some(&default_bucket),
            &settings.s3_prefix,
        ),
        role_name: settings.role_name().map(str::to_string),
        delete_log_groups: endpoint_name.is_some(),
    };

    println!("\nStarting cleanup...");
    println!("{}", rule());

    let reports = plan.execute(&ctx).await;
    for report in &reports {
        let mark = match report.outcome {
            StepOutcome::Deleted => "deleted",
            StepOutcome::NotFound => "absent",
            StepOutcome::Skipped(_) => "skipped",
            StepOutcome::Failed(_) => "FAILED",
        };
        println!("[{:<7}] {}: {}", mark, report.resource, report.outcome);
    }

    if !orphans.is_empty() && !delete_orphans {
        println!("\nSkipped deleting {} orphaned models", orphans.len());
        println!("   Run 'medgemma cleanup --delete-orphans' later to remove them");
    }

    println!("\nDeleting local files...");
    let mut local_failed = false;
    match clean_local_artifacts(&project.layout) {
        Ok(removed) if removed.is_empty() => println!("  No local build files found"),
        Ok(removed) => {
            for path in removed {
                println!("  Deleted: {}", path.display());
            }
        }
        Err(e) => {
            eprintln!("  Failed to delete local files: {}", e);
            local_failed = true;
        }
    }

    println!();
    if has_failures(&reports) || local_failed {
        banner("CLEANUP FINISHED WITH ERRORS");
        println!("Re-run 'medgemma cleanup' after fixing the errors above,");
        println!("then confirm with 'medgemma verify'.");
        bail!("some resources could not be deleted");
    }

    banner("CLEANUP COMPLETE!");
    if endpoint_name.is_some() {
        println!("Endpoint billing stopped.");
    }
    println!("Confirm nothing is left with: medgemma verify");
    Ok(())
}

fn print_section(title: &str, items: &[String]) {
    if items.is_empty() {
        println!("{}: none", title);
    } else {
        println!("{}: {}", title, items.len());
        for item in items {
            println!("  - {}", item);
        }
    }
}

fn print_verification(report: &VerificationReport, bucket: Option<&str>, role_name: &str) {
    print_section("SageMaker endpoints", &report.endpoints);
    print_section("Endpoint configurations", &report.endpoint_configs);
    print_section("Models", &report.models);
    match (bucket, report.bucket_exists) {
        (Some(bucket), Some(true)) => println!("S3 bucket {}: still exists", bucket),
        (Some(bucket), _) => println!("S3 bucket {}: deleted", bucket),
        (None, _) => println!("S3 bucket: none configured"),
    }
    if report.role_exists {
        println!("IAM role {}: still exists", role_name);
    } else {
        println!("IAM role {}: deleted", role_name);
    }
    print_section("CloudWatch log groups", &report.log_groups);
}

pub async fn verify(project: &Project) -> Result<()> {
    let settings = &project.settings;
    let endpoint_name = recorded_endpoint(project).or_else(|| settings.endpoint_name.clone());
    let role_name = settings.role_name().unwrap_or(DEFAULT_ROLE_NAME);
    let bucket = settings.s3_bucket.as_deref();

    let ctx = project.aws().await;
    project.authenticate(&ctx).await?;

    banner("Verifying cleanup");
    let report = teardown::verify(&ctx, endpoint_name.as_deref(), bucket, role_name).await?;
    print_verification(&report, bucket, role_name);
    println!("{}", rule());

    if !report.is_clean() {
        bail!("deployment resources still exist");
    }
    println!("All deployment resources have been deleted.");
    Ok(())
}
