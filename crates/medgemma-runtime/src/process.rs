//! Model server process management
//!
//! The serving container runs the model server as a child process on a
//! loopback port. The child is killed when the handle is dropped.

use medgemma_core::{BackendConfig, BackendType, MedgemmaError, MedgemmaResult};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

/// A running model server process
pub struct BackendProcess {
    child: Child,
}

impl BackendProcess {
    /// Build the command that starts the model server for `model_id`
    pub fn build_command(
        config: &BackendConfig,
        model_id: &str,
        env: &HashMap<String, String>,
    ) -> Command {
        let mut cmd = Command::new(config.program());

        match config.backend_type {
            BackendType::Vllm => {
                cmd.arg("serve").arg(model_id);
            }
            BackendType::LlamaCpp => {
                cmd.arg("--hf-repo").arg(model_id);
            }
        }
        cmd.arg("--host").arg("127.0.0.1");
        cmd.arg("--port").arg(config.port.to_string());

        for arg in &config.extra_args {
            cmd.arg(arg);
        }

        cmd.envs(env);

        // Model server output goes to the container log
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        cmd
    }

    /// Spawn the model server
    pub fn spawn(
        config: &BackendConfig,
        model_id: &str,
        env: &HashMap<String, String>,
    ) -> MedgemmaResult<Self> {
        info!(
            backend = %config.backend_type,
            model_id = %model_id,
            port = config.port,
            "Starting model server process"
        );

        let mut cmd = Self::build_command(config, model_id, env);
        let child = cmd.spawn().map_err(|e| {
            error!(
                program = %config.program().display(),
                error = %e,
                "Failed to spawn model server"
            );
            MedgemmaError::Backend(format!("Failed to spawn model server: {}", e))
        })?;

        info!(pid = child.id().unwrap_or(0), "Model server process spawned");

        Ok(Self { child })
    }

    /// Exit description if the process has already terminated
    pub fn exit_status(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("unknown ({})", e)),
        }
    }

    /// Kill the process and wait for it to exit
    pub async fn stop(mut self) -> MedgemmaResult<()> {
        info!(pid = self.child.id().unwrap_or(0), "Stopping model server process");
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to kill model server process");
            return Err(MedgemmaError::Backend(format!(
                "Failed to stop model server: {}",
                e
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::path::PathBuf;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_vllm_command() {
        let config = BackendConfig {
            extra_args: vec!["--max-model-len".to_string(), "8192".to_string()],
            ..Default::default()
        };
        let mut env = HashMap::new();
        env.insert("HF_TOKEN".to_string(), "hf_secret".to_string());

        let cmd = BackendProcess::build_command(&config, "google/medgemma-4b-it", &env);

        assert_eq!(cmd.as_std().get_program(), OsStr::new("vllm"));
        assert_eq!(
            args_of(&cmd),
            vec![
                "serve",
                "google/medgemma-4b-it",
                "--host",
                "127.0.0.1",
                "--port",
                "30000",
                "--max-model-len",
                "8192"
            ]
        );
        assert!(cmd
            .as_std()
            .get_envs()
            .any(|(k, v)| k == OsStr::new("HF_TOKEN") && v == Some(OsStr::new("hf_secret"))));
    }

    #[test]
    fn test_llama_cpp_command() {
        let config = BackendConfig {
            backend_type: BackendType::LlamaCpp,
            program: Some(PathBuf::from("/usr/local/bin/llama-server")),
            port: 8081,
            ..Default::default()
        };

        let cmd = BackendProcess::build_command(&config, "unsloth/medgemma-4b-it-GGUF", &HashMap::new());

        assert_eq!(
            cmd.as_std().get_program(),
            OsStr::new("/usr/local/bin/llama-server")
        );
        assert_eq!(args_of(&cmd)[..2], ["--hf-repo", "unsloth/medgemma-4b-it-GGUF"]);
        assert!(args_of(&cmd).contains(&"8081".to_string()));
    }

    #[tokio::test]
    async fn test_spawn_missing_program_fails() {
        let config = BackendConfig {
            program: Some(PathBuf::from("/nonexistent/model-server")),
            ..Default::default()
        };

        let result = BackendProcess::spawn(&config, "m", &HashMap::new());
        assert!(matches!(result, Err(MedgemmaError::Backend(_))));
    }
}
