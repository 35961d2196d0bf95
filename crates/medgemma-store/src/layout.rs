//! Project-relative build layout

use medgemma_core::ENDPOINT_INFO_PATH;
use std::path::{Path, PathBuf};

/// Files copied into the artifact: (source relative to the root, archive path)
pub const ARTIFACT_ENTRIES: &[(&str, &str)] = &[
    ("config/serving.toml", "code/serving.toml"),
    ("config/requirements.txt", "code/requirements.txt"),
];

/// Paths used by deploy and cleanup, rooted at the project directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    root: PathBuf,
}

impl BuildLayout {
    /// Layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staging directory mirrored into the tarball
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("model")
    }

    /// Build output directory
    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    /// Packaged model artifact
    pub fn archive_path(&self) -> PathBuf {
        self.build_dir().join("model.tar.gz")
    }

    /// Endpoint info file written by deploy
    pub fn endpoint_info_path(&self) -> PathBuf {
        self.root.join(ENDPOINT_INFO_PATH)
    }

    /// (source, staged destination) pairs for every artifact entry
    pub fn artifact_sources(&self) -> Vec<(PathBuf, PathBuf)> {
        ARTIFACT_ENTRIES
            .iter()
            .map(|(src, dest)| (self.root.join(src), self.staging_dir().join(dest)))
            .collect()
    }
}

impl Default for BuildLayout {
    fn default() -> Self {
        Self::new(".")
    }
}
