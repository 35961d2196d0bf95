//! Model artifact packaging
//!
//! SageMaker extracts `model.tar.gz` into `/opt/ml/model`, so the archive
//! holds a `code/` directory with the serving configuration and the
//! dependency manifest.

use flate2::write::GzEncoder;
use flate2::Compression;
use medgemma_core::{MedgemmaError, MedgemmaResult};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::layout::BuildLayout;

/// Result of packaging the model artifact
#[derive(Debug, Clone)]
pub struct PackagedArtifact {
    /// Path of the tarball
    pub path: PathBuf,
    /// Tarball size in bytes
    pub size: u64,
    /// Archive paths of the packaged files
    pub entries: Vec<String>,
}

fn artifact_err(context: &str, path: &Path, err: io::Error) -> MedgemmaError {
    MedgemmaError::Artifact(format!("{} {}: {}", context, path.display(), err))
}

fn remove_if_exists(path: &Path) -> MedgemmaResult<bool> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(artifact_err("Failed to remove", path, e)),
    }
}

/// Stage the artifact files and write `build/model.tar.gz`
pub fn package_model(layout: &BuildLayout) -> MedgemmaResult<PackagedArtifact> {
    let staging = layout.staging_dir();
    let archive = layout.archive_path();

    remove_if_exists(&staging)?;
    remove_if_exists(&archive)?;

    let mut entries = Vec::new();
    for (src, dest) in layout.artifact_sources() {
        if !src.is_file() {
            return Err(MedgemmaError::Artifact(format!(
                "Missing artifact source: {}",
                src.display()
            )));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| artifact_err("Failed to create", parent, e))?;
        }
        fs::copy(&src, &dest).map_err(|e| artifact_err("Failed to copy", &src, e))?;
        debug!(src = %src.display(), dest = %dest.display(), "Staged artifact file");

        if let Ok(rel) = dest.strip_prefix(&staging) {
            entries.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }

    let build_dir = layout.build_dir();
    fs::create_dir_all(&build_dir).map_err(|e| artifact_err("Failed to create", &build_dir, e))?;

    let file = File::create(&archive).map_err(|e| artifact_err("Failed to create", &archive, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder
        .append_dir_all("code", staging.join("code"))
        .map_err(|e| artifact_err("Failed to archive", &staging, e))?;
    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|e| artifact_err("Failed to finish", &archive, e))?;

    let size = fs::metadata(&archive)
        .map_err(|e| artifact_err("Failed to stat", &archive, e))?
        .len();

    info!(path = %archive.display(), size = size, "Created model artifact");

    Ok(PackagedArtifact {
        path: archive,
        size,
        entries,
    })
}

/// Delete the endpoint info file, the tarball and the staging directory.
///
/// Returns the paths that existed and were removed.
pub fn clean_local_artifacts(layout: &BuildLayout) -> MedgemmaResult<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for path in [
        layout.endpoint_info_path(),
        layout.archive_path(),
        layout.staging_dir(),
    ] {
        if remove_if_exists(&path)? {
            info!(path = %path.display(), "Removed local artifact");
            removed.push(path);
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn project() -> (TempDir, BuildLayout) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(
            dir.path().join("config/serving.toml"),
            "[backend]\ntype = \"vllm\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("config/requirements.txt"), "vllm>=0.8\n").unwrap();
        let layout = BuildLayout::new(dir.path());
        (dir, layout)
    }

    #[test]
    fn test_package_model_contents() {
        let (_dir, layout) = project();

        let artifact = package_model(&layout).unwrap();
        assert_eq!(artifact.path, layout.archive_path());
        assert!(artifact.size > 0);
        assert_eq!(
            artifact.entries,
            vec!["code/serving.toml".to_string(), "code/requirements.txt".to_string()]
        );

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&artifact.path).unwrap()));
        let mut files = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            if entry.header().entry_type().is_file() {
                let mut content = String::new();
                entry.read_to_string(&mut content).unwrap();
                files.push((path, content));
            }
        }
        files.sort();

        assert_eq!(
            files,
            vec![
                ("code/requirements.txt".to_string(), "vllm>=0.8\n".to_string()),
                (
                    "code/serving.toml".to_string(),
                    "[backend]\ntype = \"vllm\"\n".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_package_replaces_stale_staging() {
        let (_dir, layout) = project();
        fs::create_dir_all(layout.staging_dir().join("code")).unwrap();
        fs::write(layout.staging_dir().join("code/stale.py"), "old").unwrap();

        package_model(&layout).unwrap();
        assert!(!layout.staging_dir().join("code/stale.py").exists());
    }

    #[test]
    fn test_missing_source_is_artifact_error() {
        let (_dir, layout) = project();
        fs::remove_file(layout.root().join("config/requirements.txt")).unwrap();

        let err = package_model(&layout).unwrap_err();
        assert!(matches!(err, MedgemmaError::Artifact(_)));
    }

    #[test]
    fn test_clean_local_artifacts() {
        let (_dir, layout) = project();
        package_model(&layout).unwrap();
        fs::write(layout.endpoint_info_path(), "ENDPOINT_NAME=ep\n").unwrap();

        let removed = clean_local_artifacts(&layout).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(!layout.archive_path().exists());
        assert!(!layout.staging_dir().exists());

        assert!(clean_local_artifacts(&layout).unwrap().is_empty());
    }
}
