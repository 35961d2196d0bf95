//! Health checking for the model server

use medgemma_core::{MedgemmaError, MedgemmaResult};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::process::BackendProcess;

/// Health checker for the model server
pub struct HealthChecker {
    /// HTTP client for health checks
    client: reqwest::Client,
    /// Health check path
    health_path: String,
    /// Delay between probes while waiting for readiness
    poll_interval: Duration,
}

impl HealthChecker {
    /// Create a new health checker
    pub fn new(health_path: impl Into<String>, timeout_secs: u64) -> MedgemmaResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| MedgemmaError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            health_path: health_path.into(),
            poll_interval: Duration::from_secs(2),
        })
    }

    /// Override the delay between readiness probes
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Check the health of the server at `base_url`
    pub async fn check(&self, base_url: &str) -> bool {
        let url = format!("{}{}", base_url, self.health_path);

        match self.client.get(&url).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                if healthy {
                    debug!(endpoint = %url, "Health check passed");
                } else {
                    debug!(
                        endpoint = %url,
                        status = %response.status(),
                        "Health check failed"
                    );
                }
                healthy
            }
            Err(e) => {
                debug!(
                    endpoint = %url,
                    error = %e,
                    "Health check error"
                );
                false
            }
        }
    }

    /// Poll until the server is healthy, the process exits, or `startup_timeout` elapses
    pub async fn wait_until_ready(
        &self,
        base_url: &str,
        startup_timeout: Duration,
        mut process: Option<&mut BackendProcess>,
    ) -> MedgemmaResult<()> {
        let started = Instant::now();

        loop {
            if self.check(base_url).await {
                info!(
                    endpoint = %base_url,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Model server is ready"
                );
                return Ok(());
            }

            if let Some(status) = process.as_deref_mut().and_then(|p| p.exit_status()) {
                return Err(MedgemmaError::Backend(format!(
                    "Model server exited before becoming ready: {}",
                    status
                )));
            }

            if started.elapsed() >= startup_timeout {
                warn!(endpoint = %base_url, "Model server did not become ready in time");
                return Err(MedgemmaError::Backend(format!(
                    "Model server not healthy after {}s",
                    startup_timeout.as_secs()
                )));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_health_checker_creation() {
        let checker = HealthChecker::new("/api/health", 10).unwrap();
        assert_eq!(checker.health_path, "/api/health");
        assert_eq!(checker.poll_interval, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_wait_until_ready_after_warmup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let router = Router::new().route(
            "/health",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::OK
                    }
                }
            }),
        );
        let base_url = serve(router).await;

        let checker = HealthChecker::new("/health", 2)
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        checker
            .wait_until_ready(&base_url, Duration::from_secs(5), None)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let checker = HealthChecker::new("/health", 1)
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        let base_url = format!("http://127.0.0.1:{}", port);

        assert!(!checker.check(&base_url).await);
        let err = checker
            .wait_until_ready(&base_url, Duration::from_millis(50), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MedgemmaError::Backend(_)));
    }
}
