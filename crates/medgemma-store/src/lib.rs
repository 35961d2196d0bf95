//! medgemma-store: Local artifact storage
//!
//! This crate owns everything deploy and cleanup do on the local disk:
//! - The project build layout (`model/`, `build/`)
//! - Packaging the model artifact tarball
//! - Removing local artifacts after teardown

pub mod layout;
pub mod package;

pub use layout::BuildLayout;
pub use package::{clean_local_artifacts, package_model, PackagedArtifact};
