//! File-backed provider store.
//!
//! Persists the exported catalog as pretty-printed JSON. Writes go to a
//! sibling temp file first and are renamed into place.

use std::fs::{self, create_dir_all, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::ProviderStore;
use crate::core::{ProviderCatalog, SchedulerError};

/// JSON file holding the provider catalog.
#[derive(Debug, Clone)]
pub struct JsonFileProviderStore {
    path: PathBuf,
}

impl JsonFileProviderStore {
    /// Create a store at `path`; parent directories are created on demand.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        }
        Ok(Self { path })
    }

    /// Location of the catalog file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "providers.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ProviderStore for JsonFileProviderStore {
    fn load(&self) -> Result<Option<ProviderCatalog>, SchedulerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let catalog = serde_json::from_str(&raw).map_err(|e| {
            SchedulerError::Backend(format!("corrupt catalog {}: {e}", self.path.display()))
        })?;
        Ok(Some(catalog))
    }

    fn save(&self, catalog: &ProviderCatalog) -> Result<(), SchedulerError> {
        let body =
            serde_json::to_string_pretty(catalog).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let tmp = self.temp_path();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        writeln!(file, "{body}").map_err(|e| SchedulerError::Backend(e.to_string()))?;
        file.sync_all().map_err(|e| SchedulerError::Backend(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| SchedulerError::Backend(e.to_string()))
    }
}
