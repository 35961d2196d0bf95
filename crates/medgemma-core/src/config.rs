//! Configuration types for the MedGemma toolkit
//!
//! Two configuration surfaces exist: [`Settings`], read by the deployment
//! tooling from a `.env` file, and [`ServingConfig`], read by the serving
//! container from the TOML file packaged into the model artifact.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{MedgemmaError, MedgemmaResult};

/// Default model identifier on the Hugging Face Hub
pub const DEFAULT_MODEL_ID: &str = "google/medgemma-4b-it";

/// Default `.env` location relative to the project root
pub const DEFAULT_ENV_FILE: &str = "config/.env";

/// Where SageMaker extracts the `code/` directory of the model artifact
pub const DEFAULT_SERVING_CONFIG_PATH: &str = "/opt/ml/model/code/serving.toml";

/// Deployment settings loaded from `.env` and the process environment
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Hugging Face access token passed to the serving container
    pub hf_token: Option<String>,
    /// Model identifier on the Hugging Face Hub
    pub model_id: String,
    /// SageMaker instance type
    pub instance_type: String,
    /// Number of instances behind the endpoint
    pub instance_count: u32,
    /// Explicit endpoint name (auto-generated when absent)
    pub endpoint_name: Option<String>,
    /// S3 bucket for the model artifact (SageMaker default bucket when absent)
    pub s3_bucket: Option<String>,
    /// Key prefix for the model artifact
    pub s3_prefix: String,
    /// AWS region
    pub aws_region: String,
    /// AWS shared-config profile
    pub aws_profile: String,
    /// Full ARN of the SageMaker execution role
    pub sagemaker_role: Option<String>,
    /// Serving container image override
    pub image_uri: Option<String>,
    /// Default generation budget used by the invocation commands
    pub max_new_tokens: u32,
    /// Timeout for a single endpoint invocation
    pub request_timeout_secs: u64,
    /// How long deploy waits for the endpoint to reach `InService`
    pub deploy_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hf_token: None,
            model_id: DEFAULT_MODEL_ID.to_string(),
            instance_type: "ml.g5.2xlarge".to_string(),
            instance_count: 1,
            endpoint_name: None,
            s3_bucket: None,
            s3_prefix: "medgemma4-text-endpoint".to_string(),
            aws_region: "ap-southeast-1".to_string(),
            aws_profile: "default".to_string(),
            sagemaker_role: None,
            image_uri: None,
            max_new_tokens: 500,
            request_timeout_secs: 300,
            deploy_timeout_secs: 1800,
        }
    }
}

impl Settings {
    /// Load settings from a `.env` file (if it exists) and the process environment.
    ///
    /// Variables already present in the environment take precedence over the file.
    pub fn load(env_file: &Path) -> MedgemmaResult<Self> {
        if env_file.exists() {
            dotenvy::from_path(env_file).map_err(|e| {
                MedgemmaError::Config(format!(
                    "Failed to read {}: {}",
                    env_file.display(),
                    e
                ))
            })?;
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> MedgemmaResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Ok(Self {
            hf_token: get("HF_TOKEN"),
            model_id: get("MODEL_ID").unwrap_or(defaults.model_id),
            instance_type: get("INSTANCE_TYPE").unwrap_or(defaults.instance_type),
            instance_count: parse_number("INSTANCE_COUNT", get("INSTANCE_COUNT"))?
                .unwrap_or(defaults.instance_count),
            endpoint_name: get("ENDPOINT_NAME"),
            s3_bucket: get("S3_BUCKET"),
            s3_prefix: get("S3_PREFIX").unwrap_or(defaults.s3_prefix),
            aws_region: get("AWS_REGION").unwrap_or(defaults.aws_region),
            aws_profile: get("AWS_PROFILE").unwrap_or(defaults.aws_profile),
            sagemaker_role: get("SAGEMAKER_ROLE"),
            image_uri: get("IMAGE_URI"),
            max_new_tokens: parse_number("MAX_NEW_TOKENS", get("MAX_NEW_TOKENS"))?
                .unwrap_or(defaults.max_new_tokens),
            request_timeout_secs: parse_number(
                "REQUEST_TIMEOUT_SECS",
                get("REQUEST_TIMEOUT_SECS"),
            )?
            .unwrap_or(defaults.request_timeout_secs),
            deploy_timeout_secs: parse_number("DEPLOY_TIMEOUT_SECS", get("DEPLOY_TIMEOUT_SECS"))?
                .unwrap_or(defaults.deploy_timeout_secs),
        })
    }

    /// Role name extracted from the role ARN (last `/` segment)
    pub fn role_name(&self) -> Option<&str> {
        self.sagemaker_role
            .as_deref()
            .and_then(|arn| arn.rsplit('/').next())
            .filter(|name| !name.is_empty())
    }

    /// Hugging Face token, required for deployment
    pub fn require_hf_token(&self) -> MedgemmaResult<&str> {
        self.hf_token
            .as_deref()
            .ok_or_else(|| MedgemmaError::Config("HF_TOKEN not found in .env file".to_string()))
    }

    /// Execution role ARN, required for deployment
    pub fn require_role(&self) -> MedgemmaResult<&str> {
        self.sagemaker_role.as_deref().ok_or_else(|| {
            MedgemmaError::Config(
                "SAGEMAKER_ROLE not found in .env file. Please specify the full ARN of the SageMaker execution role."
                    .to_string(),
            )
        })
    }

    /// Serving image containing `medgemma-serve`, required for deployment
    pub fn require_image_uri(&self) -> MedgemmaResult<&str> {
        self.image_uri.as_deref().ok_or_else(|| {
            MedgemmaError::Config(
                "IMAGE_URI not found in .env file. Please specify a serving image that runs medgemma-serve."
                    .to_string(),
            )
        })
    }
}

fn parse_number<T>(key: &str, value: Option<String>) -> MedgemmaResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.parse::<T>().map_err(|e| {
                MedgemmaError::Config(format!("{} must be a number, got '{}': {}", key, raw, e))
            })
        })
        .transpose()
}

/// Serving container configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Generation backend configuration
    pub backend: BackendConfig,
    /// Generation defaults
    pub generation: GenerationConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServingConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> MedgemmaResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MedgemmaError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| MedgemmaError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply the environment variables SageMaker and the model registration set
    pub fn apply_env<F>(&mut self, lookup: F) -> MedgemmaResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model_id) = get("HF_MODEL_ID") {
            self.model.model_id = model_id;
        }
        if let Some(token) = get("HF_TOKEN") {
            self.model.hf_token = Some(token);
        }
        if let Some(port) = parse_number::<u16>("SAGEMAKER_BIND_TO_PORT", get("SAGEMAKER_BIND_TO_PORT"))? {
            self.server.port = port;
        }
        Ok(())
    }

    /// Environment map handed to the backend process
    pub fn backend_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if let Some(token) = &self.model.hf_token {
            env.insert("HF_TOKEN".to_string(), token.clone());
            env.insert("HUGGING_FACE_HUB_TOKEN".to_string(), token.clone());
        }
        env
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub address: String,
    /// Port to bind (SageMaker expects 8080)
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier on the Hugging Face Hub
    pub model_id: String,
    /// Access token, normally injected through `HF_TOKEN`
    #[serde(skip_serializing)]
    pub hf_token: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            hf_token: None,
        }
    }
}

/// Generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend type
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    /// Model server binary (defaults per backend type)
    pub program: Option<PathBuf>,
    /// URL of an already running model server; no process is spawned when set
    pub url: Option<String>,
    /// Loopback port for a spawned model server
    pub port: u16,
    /// Additional backend-specific arguments
    pub extra_args: Vec<String>,
    /// Health check path on the model server
    pub health_path: String,
    /// How long to wait for the model server to become healthy
    pub startup_timeout_secs: u64,
    /// Timeout for a single generation request
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend_type: BackendType::Vllm,
            program: None,
            url: None,
            port: 30000,
            extra_args: Vec::new(),
            health_path: "/health".to_string(),
            startup_timeout_secs: 1200,
            request_timeout_secs: 600,
        }
    }
}

impl BackendConfig {
    /// Base URL of the model server
    pub fn base_url(&self) -> String {
        match &self.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://127.0.0.1:{}", self.port),
        }
    }

    /// Model server binary to spawn
    pub fn program(&self) -> PathBuf {
        self.program
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.backend_type.default_program()))
    }
}

/// Supported model server types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    #[serde(rename = "vllm")]
    Vllm,
    #[serde(rename = "llama.cpp")]
    LlamaCpp,
}

impl BackendType {
    /// Binary name used when no program path is configured
    pub fn default_program(&self) -> &'static str {
        match self {
            BackendType::Vllm => "vllm",
            BackendType::LlamaCpp => "llama-server",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Vllm => write!(f, "vLLM"),
            BackendType::LlamaCpp => write!(f, "llama.cpp"),
        }
    }
}

/// Generation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum time to wait for the next streamed chunk
    pub stream_timeout_secs: u64,
    /// Capacity of the chunk channel between generator and response stream
    pub stream_buffer: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            stream_timeout_secs: 60,
            stream_buffer: 64,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.model_id, "google/medgemma-4b-it");
        assert_eq!(settings.instance_type, "ml.g5.2xlarge");
        assert_eq!(settings.instance_count, 1);
        assert_eq!(settings.aws_region, "ap-southeast-1");
        assert!(settings.hf_token.is_none());
    }

    #[test]
    fn test_deploy_requires_image_uri() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("HF_TOKEN", "hf_abc"),
            ("SAGEMAKER_ROLE", "arn:aws:iam::123456789012:role/MedGemmaSageMakerRole"),
        ]))
        .unwrap();
        assert!(matches!(
            settings.require_image_uri(),
            Err(MedgemmaError::Config(_))
        ));

        let settings = Settings::from_lookup(lookup_from(&[(
            "IMAGE_URI",
            "123456789012.dkr.ecr.ap-southeast-1.amazonaws.com/medgemma-serve:latest",
        )]))
        .unwrap();
        assert_eq!(
            settings.require_image_uri().unwrap(),
            "123456789012.dkr.ecr.ap-southeast-1.amazonaws.com/medgemma-serve:latest"
        );
    }

    #[test]
    fn test_settings_from_env_pairs() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("HF_TOKEN", "hf_abc"),
            ("INSTANCE_COUNT", "2"),
            ("S3_BUCKET", "my-bucket"),
            ("SAGEMAKER_ROLE", "arn:aws:iam::123456789012:role/MedGemmaSageMakerRole"),
            ("ENDPOINT_NAME", "  "),
        ]))
        .unwrap();

        assert_eq!(settings.require_hf_token().unwrap(), "hf_abc");
        assert_eq!(settings.instance_count, 2);
        assert_eq!(settings.s3_bucket.as_deref(), Some("my-bucket"));
        assert_eq!(settings.role_name(), Some("MedGemmaSageMakerRole"));
        assert!(settings.endpoint_name.is_none());
    }

    #[test]
    fn test_settings_rejects_bad_number() {
        let err = Settings::from_lookup(lookup_from(&[("INSTANCE_COUNT", "two")])).unwrap_err();
        assert!(matches!(err, MedgemmaError::Config(_)));
        assert!(err.to_string().contains("INSTANCE_COUNT"));
    }

    #[test]
    fn test_missing_role_is_config_error() {
        let settings = Settings::default();
        assert!(settings.require_role().is_err());
        assert!(settings.role_name().is_none());
    }

    #[test]
    fn test_default_serving_config() {
        let config = ServingConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.backend.backend_type, BackendType::Vllm);
        assert_eq!(config.backend.base_url(), "http://127.0.0.1:30000");
    }

    #[test]
    fn test_serving_config_parse() {
        let toml_str = r#"
[model]
model_id = "google/medgemma-27b-it"

[backend]
type = "llama.cpp"
url = "http://localhost:8081/"
extra_args = ["--ctx-size", "8192"]

[generation]
stream_timeout_secs = 30
"#;
        let config: ServingConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.model_id, "google/medgemma-27b-it");
        assert_eq!(config.backend.backend_type, BackendType::LlamaCpp);
        assert_eq!(config.backend.base_url(), "http://localhost:8081");
        assert_eq!(config.backend.program(), PathBuf::from("llama-server"));
        assert_eq!(config.generation.stream_timeout_secs, 30);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = ServingConfig::default();
        config
            .apply_env(lookup_from(&[
                ("HF_MODEL_ID", "google/medgemma-4b-pt"),
                ("HF_TOKEN", "hf_secret"),
                ("SAGEMAKER_BIND_TO_PORT", "9000"),
            ]))
            .unwrap();

        assert_eq!(config.model.model_id, "google/medgemma-4b-pt");
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.backend_env().get("HF_TOKEN").map(String::as_str),
            Some("hf_secret")
        );
    }

    #[test]
    fn test_packaged_serving_config_parses() {
        let config: ServingConfig =
            toml::from_str(include_str!("../../../config/serving.toml")).unwrap();
        assert_eq!(config.model.model_id, DEFAULT_MODEL_ID);
        assert_eq!(config.backend.backend_type, BackendType::Vllm);
        assert_eq!(config.backend.base_url(), "http://127.0.0.1:30000");
    }
}
