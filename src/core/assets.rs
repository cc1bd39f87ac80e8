//! Lazy assets: named, sized resources that can be unloaded under memory pressure.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{CoreResult, SchedulerError};
use crate::util::clock::monotonic_ms;

/// Callback that releases an asset. Receives the asset name.
pub type UnloadFn = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// A registered asset.
#[derive(Clone)]
pub struct LazyAsset {
    /// Unique name.
    pub name: String,
    /// Memory held while loaded (MB).
    pub size_mb: f64,
    /// Whether the asset is currently resident.
    pub loaded: bool,
    /// Last touch (monotonic ms).
    pub last_used_ms: u64,
    unload: Option<UnloadFn>,
}

impl fmt::Debug for LazyAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyAsset")
            .field("name", &self.name)
            .field("size_mb", &self.size_mb)
            .field("loaded", &self.loaded)
            .field("last_used_ms", &self.last_used_ms)
            .field("has_unload", &self.unload.is_some())
            .finish()
    }
}

/// Serializable view of an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Unique name.
    pub name: String,
    /// Size (MB).
    pub size_mb: f64,
    /// Resident flag.
    pub loaded: bool,
    /// Last touch.
    pub last_used_ms: u64,
}

impl From<&LazyAsset> for AssetInfo {
    fn from(asset: &LazyAsset) -> Self {
        Self {
            name: asset.name.clone(),
            size_mb: asset.size_mb,
            loaded: asset.loaded,
            last_used_ms: asset.last_used_ms,
        }
    }
}

/// Eviction candidate handed out of the lock.
pub(crate) struct Victim {
    pub name: String,
    pub size_mb: f64,
    pub last_used_ms: u64,
    pub unload: Option<UnloadFn>,
}

/// Registered assets with LRU bookkeeping.
#[derive(Default)]
pub struct AssetTable {
    assets: HashMap<String, LazyAsset>,
    global_unload: Option<UnloadFn>,
}

impl AssetTable {
    /// Register or re-register an asset. It starts loaded and freshly touched.
    pub fn register(&mut self, name: &str, size_mb: f64, unload: Option<UnloadFn>) -> CoreResult<AssetInfo> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SchedulerError::Validation("asset name must not be empty".into()));
        }
        if !size_mb.is_finite() || size_mb < 0.0 {
            return Err(SchedulerError::Validation(format!(
                "asset size must be a non-negative number, got {size_mb}"
            )));
        }
        let asset = LazyAsset {
            name: name.to_string(),
            size_mb,
            loaded: true,
            last_used_ms: monotonic_ms(),
            unload,
        };
        let info = AssetInfo::from(&asset);
        self.assets.insert(asset.name.clone(), asset);
        Ok(info)
    }

    /// Fallback callback for assets registered without one.
    pub fn set_global_unload(&mut self, unload: Option<UnloadFn>) {
        self.global_unload = unload;
    }

    /// Mark an asset used now. Touching implies the owner has it resident.
    pub fn touch(&mut self, name: &str) -> CoreResult<AssetInfo> {
        let asset = self
            .assets
            .get_mut(name)
            .ok_or_else(|| SchedulerError::AssetNotFound(name.to_string()))?;
        asset.last_used_ms = monotonic_ms();
        asset.loaded = true;
        Ok(AssetInfo::from(&*asset))
    }

    /// Forget an asset entirely.
    pub fn unregister(&mut self, name: &str) -> CoreResult<AssetInfo> {
        self.assets
            .remove(name)
            .map(|a| AssetInfo::from(&a))
            .ok_or_else(|| SchedulerError::AssetNotFound(name.to_string()))
    }

    /// Least recently used loaded asset not in `skip`.
    pub(crate) fn next_victim(&self, skip: &HashSet<String>) -> Option<Victim> {
        self.assets
            .values()
            .filter(|a| a.loaded && !skip.contains(&a.name))
            .min_by_key(|a| a.last_used_ms)
            .map(|a| Victim {
                name: a.name.clone(),
                size_mb: a.size_mb,
                last_used_ms: a.last_used_ms,
                unload: a.unload.clone().or_else(|| self.global_unload.clone()),
            })
    }

    /// Mark an asset unloaded unless it was touched since `seen_last_used_ms`.
    /// Returns whether the flag changed.
    pub(crate) fn mark_unloaded(&mut self, name: &str, seen_last_used_ms: u64) -> bool {
        match self.assets.get_mut(name) {
            Some(asset) if asset.loaded && asset.last_used_ms == seen_last_used_ms => {
                asset.loaded = false;
                true
            }
            _ => false,
        }
    }

    /// Total size of loaded assets (MB).
    pub fn loaded_mb(&self) -> f64 {
        self.assets.values().filter(|a| a.loaded).map(|a| a.size_mb).sum()
    }

    /// Number of loaded assets.
    pub fn loaded_count(&self) -> usize {
        self.assets.values().filter(|a| a.loaded).count()
    }

    /// All assets, least recently used first.
    pub fn list(&self) -> Vec<AssetInfo> {
        let mut list: Vec<AssetInfo> = self.assets.values().map(AssetInfo::from).collect();
        list.sort_by_key(|a| a.last_used_ms);
        list
    }

    /// Asset by name.
    pub fn get(&self, name: &str) -> Option<AssetInfo> {
        self.assets.get(name).map(AssetInfo::from)
    }
}

/// Run an unload callback, containing errors and panics. Returns whether it succeeded.
pub(crate) fn run_unload(unload: Option<&UnloadFn>, name: &str) -> bool {
    let Some(unload) = unload else {
        return true;
    };
    match catch_unwind(AssertUnwindSafe(|| unload(name))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(asset = name, "unload callback failed: {e:#}");
            false
        }
        Err(_) => {
            tracing::warn!(asset = name, "unload callback panicked");
            false
        }
    }
}
