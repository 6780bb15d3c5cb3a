//! VFS configuration.
//!
//! A small TOML document selecting the backend and seeding it:
//!
//! ```toml
//! backend = "host"        # or "memory" (default)
//! root = "/tmp/sandbox"   # host directory, required for "host"
//! cwd = "/home/user"
//!
//! [files]
//! "/etc/motd" = "welcome"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::fs::path::normalize_path;
use crate::fs::{FileSystem, FsError, InMemoryFs, InitialFiles, MkdirOptions};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("the host backend needs a root directory")]
    MissingRoot,

    #[error("host root {0} is not a directory")]
    RootNotDirectory(PathBuf),

    #[error("the host backend is only available on unix")]
    HostUnsupported,

    #[error("cannot seed filesystem: {0}")]
    Seed(#[from] FsError),
}

/// Which [`FileSystem`] implementation to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Host,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VfsConfig {
    pub backend: BackendKind,
    /// Host directory backing the VFS root.
    pub root: Option<PathBuf>,
    /// Working directory; created if missing. Defaults to `/`.
    pub cwd: Option<String>,
    /// Files written into the VFS on open, path to UTF-8 content.
    pub files: BTreeMap<String, String>,
}

impl VfsConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn cwd(&self) -> String {
        normalize_path(self.cwd.as_deref().unwrap_or("/"))
    }

    /// Build the configured filesystem, seed it and make sure `cwd` exists.
    pub async fn open(&self) -> Result<Arc<dyn FileSystem>, ConfigError> {
        let fs: Arc<dyn FileSystem> = match self.backend {
            BackendKind::Memory => {
                let files: InitialFiles = self
                    .files
                    .iter()
                    .map(|(path, content)| (path.clone(), content.as_str().into()))
                    .collect();
                Arc::new(InMemoryFs::with_files(&files)?)
            }
            BackendKind::Host => {
                let fs = self.open_host()?;
                for (path, content) in &self.files {
                    fs.write_file(path, content.as_bytes()).await?;
                }
                fs
            }
        };
        fs.mkdir(&self.cwd(), &MkdirOptions { recursive: true }).await?;
        tracing::debug!(backend = ?self.backend, cwd = %self.cwd(), "filesystem ready");
        Ok(fs)
    }

    #[cfg(unix)]
    fn open_host(&self) -> Result<Arc<dyn FileSystem>, ConfigError> {
        use crate::fs::{BackendFs, HostFs};

        let root = self.root.as_ref().ok_or(ConfigError::MissingRoot)?;
        if !root.is_dir() {
            return Err(ConfigError::RootNotDirectory(root.clone()));
        }
        Ok(Arc::new(BackendFs::new(HostFs::new(root))))
    }

    #[cfg(not(unix))]
    fn open_host(&self) -> Result<Arc<dyn FileSystem>, ConfigError> {
        Err(ConfigError::HostUnsupported)
    }
}
