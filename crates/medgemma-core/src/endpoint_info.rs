//! The local endpoint-info artifact
//!
//! `deploy` records the endpoint it created in `build/endpoint_info.txt` as
//! `KEY=VALUE` lines; invocation, log and cleanup commands read it back.

use std::path::Path;

use crate::{MedgemmaError, MedgemmaResult};

/// Default location of the endpoint-info file relative to the project root
pub const ENDPOINT_INFO_PATH: &str = "build/endpoint_info.txt";

const KEY_ENDPOINT_NAME: &str = "ENDPOINT_NAME";
const KEY_MODEL_DATA: &str = "MODEL_DATA";
const KEY_INSTANCE_TYPE: &str = "INSTANCE_TYPE";
const KEY_REGION: &str = "REGION";
const KEY_ROLE: &str = "ROLE";

/// Metadata about the last deployed endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointInfo {
    /// SageMaker endpoint name
    pub endpoint_name: String,
    /// S3 URL of the model artifact
    pub model_data: String,
    /// Instance type the endpoint runs on
    pub instance_type: String,
    /// AWS region of the endpoint
    pub region: String,
    /// Execution role ARN
    pub role: String,
}

impl EndpointInfo {
    /// Render the file content
    pub fn render(&self) -> String {
        [
            (KEY_ENDPOINT_NAME, &self.endpoint_name),
            (KEY_MODEL_DATA, &self.model_data),
            (KEY_INSTANCE_TYPE, &self.instance_type),
            (KEY_REGION, &self.region),
            (KEY_ROLE, &self.role),
        ]
        .iter()
        .map(|(key, value)| format!("{}={}\n", key, value))
        .collect()
    }

    /// Parse file content; `ENDPOINT_NAME` must be present and non-empty
    pub fn parse(content: &str) -> MedgemmaResult<Self> {
        let mut info = EndpointInfo::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                KEY_ENDPOINT_NAME => info.endpoint_name = value,
                KEY_MODEL_DATA => info.model_data = value,
                KEY_INSTANCE_TYPE => info.instance_type = value,
                KEY_REGION => info.region = value,
                KEY_ROLE => info.role = value,
                _ => {}
            }
        }

        if info.endpoint_name.is_empty() {
            return Err(MedgemmaError::EndpointInfo(format!(
                "{} missing from endpoint info",
                KEY_ENDPOINT_NAME
            )));
        }

        Ok(info)
    }

    /// Write the file, creating the parent directory and replacing any previous content
    pub fn write(&self, path: &Path) -> MedgemmaResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())?;
        Ok(())
    }

    /// Read and parse the file
    pub fn read(path: &Path) -> MedgemmaResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MedgemmaError::EndpointInfo(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Delete the file; returns whether it existed
    pub fn remove(path: &Path) -> MedgemmaResult<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Endpoint name from the info file, falling back to a configured name
pub fn resolve_endpoint_name(path: &Path, fallback: Option<&str>) -> MedgemmaResult<String> {
    if path.exists() {
        return EndpointInfo::read(path).map(|info| info.endpoint_name);
    }

    fallback
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            MedgemmaError::NotFound(
                "Endpoint name not found. Deploy first with: medgemma deploy".to_string(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> EndpointInfo {
        EndpointInfo {
            endpoint_name: "medgemma-4b-it-2026-10-18-09-30-00-123".to_string(),
            model_data: "s3://my-bucket/medgemma4-text-endpoint/model.tar.gz".to_string(),
            instance_type: "ml.g5.2xlarge".to_string(),
            region: "ap-southeast-1".to_string(),
            role: "arn:aws:iam::123456789012:role/MedGemmaSageMakerRole".to_string(),
        }
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("build").join("endpoint_info.txt");

        sample().write(&path).unwrap();
        let read = EndpointInfo::read(&path).unwrap();

        assert_eq!(read, sample());
    }

    #[test]
    fn test_render_layout() {
        let rendered = sample().render();
        let keys: Vec<&str> = rendered
            .lines()
            .map(|l| l.split_once('=').unwrap().0)
            .collect();
        assert_eq!(
            keys,
            vec!["ENDPOINT_NAME", "MODEL_DATA", "INSTANCE_TYPE", "REGION", "ROLE"]
        );
        assert!(rendered.ends_with('\n'));
    }

    #[test]
    fn test_parse_tolerates_noise() {
        let content = "# written by deploy\n\nENDPOINT_NAME=ep-1\nEXTRA=ignored\nROLE=a=b\n";
        let info = EndpointInfo::parse(content).unwrap();
        assert_eq!(info.endpoint_name, "ep-1");
        assert_eq!(info.role, "a=b");
        assert!(info.model_data.is_empty());
    }

    #[test]
    fn test_parse_requires_endpoint_name() {
        let err = EndpointInfo::parse("MODEL_DATA=s3://b/k\nENDPOINT_NAME=\n").unwrap_err();
        assert!(matches!(err, MedgemmaError::EndpointInfo(_)));
    }

    #[test]
    fn test_write_overwrites_previous_deploy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("endpoint_info.txt");

        sample().write(&path).unwrap();
        let mut next = sample();
        next.endpoint_name = "second".to_string();
        next.write(&path).unwrap();

        assert_eq!(EndpointInfo::read(&path).unwrap().endpoint_name, "second");
    }

    #[test]
    fn test_remove_reports_existence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("endpoint_info.txt");
        sample().write(&path).unwrap();

        assert!(EndpointInfo::remove(&path).unwrap());
        assert!(!EndpointInfo::remove(&path).unwrap());
    }

    #[test]
    fn test_resolve_prefers_file_then_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("endpoint_info.txt");

        assert_eq!(
            resolve_endpoint_name(&path, Some("from-env")).unwrap(),
            "from-env"
        );
        assert!(resolve_endpoint_name(&path, None).is_err());

        sample().write(&path).unwrap();
        assert_eq!(
            resolve_endpoint_name(&path, Some("from-env")).unwrap(),
            sample().endpoint_name
        );
    }
}
