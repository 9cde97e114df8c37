//! The engine's private filesystem.
//!
//! Each worker gets its own host directory, preopened into the engine as
//! `/`. Tables written here are what the engine sees when it resolves a
//! table name. The directory is removed when the [`PrivateFs`] is dropped.

use std::path::Path;

use tempfile::TempDir;
use tracing::debug;

use louis_worker_common::TableError;

const DIR_PREFIX: &str = "louis-worker-";

/// A per-worker directory exposed to the engine.
#[derive(Debug)]
pub struct PrivateFs {
    dir: TempDir,
}

impl PrivateFs {
    /// Create a fresh directory under the system temp directory.
    pub fn create() -> std::io::Result<Self> {
        Self::wrap(tempfile::Builder::new().prefix(DIR_PREFIX).tempdir()?)
    }

    /// Create a fresh directory under `parent`.
    pub fn create_in(parent: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::wrap(tempfile::Builder::new().prefix(DIR_PREFIX).tempdir_in(parent)?)
    }

    fn wrap(dir: TempDir) -> std::io::Result<Self> {
        debug!(root = %dir.path().display(), "Private filesystem created");
        Ok(Self { dir })
    }

    /// Host path of the directory.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file at the top of the directory.
    ///
    /// The name must already have passed table name validation.
    pub async fn write(&self, name: &str, contents: &[u8]) -> Result<(), TableError> {
        tokio::fs::write(self.root().join(name), contents)
            .await
            .map_err(|source| TableError::WriteFailed {
                name: name.to_string(),
                source,
            })
    }

    /// Whether a file with this name exists.
    pub async fn contains(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.root().join(name))
            .await
            .unwrap_or(false)
    }
}
