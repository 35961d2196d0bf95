//! MedGemma serving container
//!
//! SageMaker starts the container with `serve`; the model server is started
//! in the background while `/ping` reports 503.

use anyhow::Context;
use clap::{Parser, Subcommand};
use medgemma_core::{ServingConfig, DEFAULT_SERVING_CONFIG_PATH};
use medgemma_handler::{create_router, AppState};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// medgemma-serve - SageMaker inference container for MedGemma
#[derive(Parser, Debug)]
#[command(name = "medgemma-serve")]
#[command(version, about, long_about = None)]
struct Args {
    /// Serving configuration file
    #[arg(long, default_value = DEFAULT_SERVING_CONFIG_PATH)]
    config: PathBuf,

    /// Address to bind (overrides the configuration)
    #[arg(long)]
    address: Option<String>,

    /// Port to bind (overrides the configuration)
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive (overrides the configuration; RUST_LOG wins)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the SageMaker container API (default)
    Serve,
}

fn load_config(path: &Path) -> anyhow::Result<ServingConfig> {
    let mut config = if path.exists() {
        ServingConfig::from_file(path)?
    } else {
        ServingConfig::default()
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

/// Resolves on the first SIGTERM; the handler is installed before this returns
#[cfg(unix)]
fn terminate_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        terminate.recv().await;
    })
}

/// SageMaker stops containers with SIGTERM; ctrl-c covers local runs
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match terminate_signal() {
            Ok(signal) => signal.await,
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let Command::Serve = args.command.unwrap_or(Command::Serve);

    let mut config = load_config(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(address) = args.address {
        config.server.address = address;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let level = args.log_level.unwrap_or_else(|| config.logging.level.clone());

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting medgemma-serve v{}", env!("CARGO_PKG_VERSION"));
    info!(
        model_id = %config.model.model_id,
        backend = %config.backend.backend_type,
        config = %args.config.display(),
        "Serving configuration loaded"
    );
    if config.model.hf_token.is_none() {
        warn!("HF_TOKEN is not set; gated models will fail to download");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.address, config.server.port)
        .parse()
        .context("Invalid bind address")?;

    let state = Arc::new(AppState::new(config));

    // Load in the background; /ping stays 503 until this completes
    let loader = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = loader.load().await {
            error!(error = %e, "Model loading failed; the next invocation retries");
        }
    });

    let router = create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Container API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Err(e) = state.shutdown().await {
        warn!(error = %e, "Model server did not stop cleanly");
    }
    info!("Shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_to_serve() {
        let args = Args::parse_from(["medgemma-serve"]);
        assert!(args.command.is_none());
        assert_eq!(args.config, PathBuf::from(DEFAULT_SERVING_CONFIG_PATH));

        let args = Args::parse_from(["medgemma-serve", "--port", "9000", "serve"]);
        assert_eq!(args.port, Some(9000));
        assert!(matches!(args.command, Some(Command::Serve)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        let terminated = terminate_signal().unwrap();

        let status = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(std::process::id().to_string())
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(std::time::Duration::from_secs(5), terminated)
            .await
            .expect("SIGTERM was not observed");
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/serving.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
    }
}
