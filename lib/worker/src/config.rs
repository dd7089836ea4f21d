use crate::error::HostError;
use isar_vfs_bridge::storage::host::HostStorage;
use isar_vfs_bridge::storage::mem::MemoryStorage;
use isar_vfs_bridge::storage::NoStorage;
use isar_vfs_bridge::StorageManager;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Settings for one worker.
///
/// ```toml
/// base-dir = "./modules"
///
/// [storage]
/// kind = "directory"
/// path = "./data"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WorkerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    /// Directory that relative `wasmUrl` paths are resolved against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
}

/// Which backend plays the part of the sandboxed storage root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StorageConfig {
    /// A private in-process tree, discarded with the worker.
    #[default]
    Memory,
    /// Files under a directory on the host.
    Directory { path: PathBuf },
    /// No storage at all; the bridge reports itself unavailable.
    Disabled,
}

impl StorageConfig {
    pub fn build(&self) -> Arc<dyn StorageManager> {
        match self {
            StorageConfig::Memory => Arc::new(MemoryStorage::new()),
            StorageConfig::Directory { path } => Arc::new(HostStorage::new(path.clone())),
            StorageConfig::Disabled => Arc::new(NoStorage),
        }
    }
}

impl WorkerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, HostError> {
        toml::from_str(source).map_err(|err| HostError::Config(err.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            HostError::Config(format!("unable to read {}: {err}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&source)?;
        // Relative paths in a config file are relative to the file.
        if let Some(dir) = path.parent() {
            config.rebase(dir);
        }
        Ok(config)
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    fn rebase(&mut self, dir: &Path) {
        if let Some(base_dir) = self.base_dir.as_mut().filter(|p| p.is_relative()) {
            *base_dir = dir.join(&*base_dir);
        }
        if let StorageConfig::Directory { path } = &mut self.storage {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }
}
