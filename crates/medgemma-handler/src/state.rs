//! Shared handler state and model loading

use medgemma_core::{MedgemmaError, MedgemmaResult, ServingConfig};
use medgemma_runtime::{BackendProcess, Generator, HealthChecker, OpenAiGenerator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{error, info};

const HEALTH_PROBE_TIMEOUT_SECS: u64 = 5;

/// A ready generator, plus the model server process when one was spawned
pub struct LoadedModel {
    generator: Arc<dyn Generator>,
    process: Mutex<Option<BackendProcess>>,
}

impl LoadedModel {
    pub fn new(generator: Arc<dyn Generator>, process: Option<BackendProcess>) -> Self {
        Self {
            generator,
            process: Mutex::new(process),
        }
    }

    /// Start (or attach to) the model server and wait until it is healthy
    pub async fn start(config: &ServingConfig) -> MedgemmaResult<Self> {
        let backend = &config.backend;
        let base_url = backend.base_url();

        let mut process = match &backend.url {
            Some(url) => {
                info!(url = %url, "Using external model server");
                None
            }
            None => Some(BackendProcess::spawn(
                backend,
                &config.model.model_id,
                &config.backend_env(),
            )?),
        };

        let health = HealthChecker::new(backend.health_path.clone(), HEALTH_PROBE_TIMEOUT_SECS)?;
        health
            .wait_until_ready(
                &base_url,
                Duration::from_secs(backend.startup_timeout_secs),
                process.as_mut(),
            )
            .await?;

        let generator = OpenAiGenerator::new(
            base_url,
            config.model.model_id.clone(),
            backend.request_timeout_secs,
        )?;

        info!(
            model_id = %config.model.model_id,
            backend = %backend.backend_type,
            "Model loaded"
        );
        Ok(Self::new(Arc::new(generator), process))
    }

    pub fn generator(&self) -> Arc<dyn Generator> {
        Arc::clone(&self.generator)
    }

    /// Stop the spawned model server, if any
    pub async fn shutdown(&self) -> MedgemmaResult<()> {
        if let Some(process) = self.process.lock().await.take() {
            process.stop().await?;
        }
        Ok(())
    }
}

/// Application state shared across handlers
pub struct AppState {
    config: ServingConfig,
    model: OnceCell<LoadedModel>,
}

impl AppState {
    /// State whose model is loaded on first use
    pub fn new(config: ServingConfig) -> Self {
        Self {
            config,
            model: OnceCell::new(),
        }
    }

    /// State with an already loaded model
    pub fn with_model(config: ServingConfig, model: LoadedModel) -> Self {
        Self {
            config,
            model: OnceCell::new_with(Some(model)),
        }
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Load the model once; concurrent callers share a single initialisation.
    ///
    /// A failed load leaves the state unloaded so a later call retries.
    pub async fn load(&self) -> MedgemmaResult<&LoadedModel> {
        self.model
            .get_or_try_init(|| async {
                LoadedModel::start(&self.config).await.map_err(|e| {
                    error!(error = %e, "Failed to load model");
                    MedgemmaError::ModelNotLoaded(e.to_string())
                })
            })
            .await
    }

    pub async fn shutdown(&self) -> MedgemmaResult<()> {
        match self.model.get() {
            Some(model) => model.shutdown().await,
            None => Ok(()),
        }
    }
}
