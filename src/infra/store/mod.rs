//! Provider catalog stores.

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileProviderStore;
pub use memory::InMemoryProviderStore;

use crate::core::{ProviderCatalog, SchedulerError};

/// Abstraction for provider catalog persistence.
///
/// The registry calls `save` after every mutation, outside its lock, with
/// secrets included. Failures are logged by the registry and never propagated.
pub trait ProviderStore: Send + Sync {
    /// Load the stored catalog; `None` when nothing was stored yet.
    fn load(&self) -> Result<Option<ProviderCatalog>, SchedulerError>;
    /// Replace the stored catalog.
    fn save(&self, catalog: &ProviderCatalog) -> Result<(), SchedulerError>;
}

impl<T: ProviderStore + ?Sized> ProviderStore for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<ProviderCatalog>, SchedulerError> {
        (**self).load()
    }

    fn save(&self, catalog: &ProviderCatalog) -> Result<(), SchedulerError> {
        (**self).save(catalog)
    }
}
