//! medgemma CLI
//!
//! Deploys MedGemma to a SageMaker endpoint, talks to it, and tears every
//! provisioned resource down again.

mod commands;

use clap::{Parser, Subcommand};
use medgemma_core::DEFAULT_ENV_FILE;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// medgemma - deploy and run MedGemma on Amazon SageMaker
#[derive(Parser, Debug)]
#[command(name = "medgemma")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, default_value = DEFAULT_ENV_FILE, global = true)]
    env_file: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the SageMaker execution role
    CreateRole {
        /// Role name
        #[arg(default_value = medgemma_aws::iam::DEFAULT_ROLE_NAME)]
        role_name: String,
    },

    /// Check AWS credentials and permissions
    CheckAws,

    /// Package, upload and deploy the model endpoint
    Deploy,

    /// Run the text (and, when test images exist, image) test suite
    TestEndpoint {
        /// Stream responses
        #[arg(long)]
        stream: bool,
    },

    /// Ask a question about a medical image
    TestImage {
        /// Image path, or a file name inside test_images/
        image: String,

        /// Question about the image
        question: Option<String>,

        /// Stream the response
        #[arg(long)]
        stream: bool,
    },

    /// Ask a free-form medical question
    Ask {
        /// Question text
        #[arg(required = true)]
        prompt: Vec<String>,

        /// Stream the response
        #[arg(long)]
        stream: bool,
    },

    /// Show recent endpoint logs
    Logs,

    /// Delete every provisioned resource
    Cleanup {
        /// Skip the confirmation prompts
        #[arg(short, long)]
        yes: bool,

        /// Delete models not attached to any endpoint without asking
        #[arg(long)]
        delete_orphans: bool,
    },

    /// Check that no deployment resources remain
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let project = commands::Project::load(&cli.env_file)?;

    match cli.command {
        Commands::CreateRole { role_name } => {
            commands::aws::create_role(&project, &role_name).await?;
        }
        Commands::CheckAws => {
            commands::aws::check_aws(&project).await?;
        }
        Commands::Deploy => {
            commands::deploy::deploy(&project).await?;
        }
        Commands::TestEndpoint { stream } => {
            commands::invoke::test_endpoint(&project, stream).await?;
        }
        Commands::TestImage {
            image,
            question,
            stream,
        } => {
            commands::invoke::test_image(&project, &image, question, stream).await?;
        }
        Commands::Ask { prompt, stream } => {
            commands::invoke::ask(&project, &prompt.join(" "), stream).await?;
        }
        Commands::Logs => {
            commands::aws::logs(&project).await?;
        }
        Commands::Cleanup {
            yes,
            delete_orphans,
        } => {
            commands::cleanup::cleanup(&project, yes, delete_orphans).await?;
        }
        Commands::Verify => {
            commands::cleanup::verify(&project).await?;
        }
    }

    Ok(())
}
