//! In-memory provider store.

use parking_lot::Mutex;

use super::ProviderStore;
use crate::core::{ProviderCatalog, SchedulerError};

/// Keeps the last saved catalog in memory. For tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct InMemoryProviderStore {
    catalog: Mutex<Option<ProviderCatalog>>,
    saves: Mutex<usize>,
}

impl InMemoryProviderStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with a catalog.
    pub fn seeded(catalog: ProviderCatalog) -> Self {
        Self {
            catalog: Mutex::new(Some(catalog)),
            saves: Mutex::new(0),
        }
    }

    /// Number of saves so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    /// Last saved catalog.
    pub fn snapshot(&self) -> Option<ProviderCatalog> {
        self.catalog.lock().clone()
    }
}

impl ProviderStore for InMemoryProviderStore {
    fn load(&self) -> Result<Option<ProviderCatalog>, SchedulerError> {
        Ok(self.catalog.lock().clone())
    }

    fn save(&self, catalog: &ProviderCatalog) -> Result<(), SchedulerError> {
        *self.catalog.lock() = Some(catalog.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}
