//! Infrastructure adapters: the claim heap and provider catalog stores.

pub mod queue;
pub mod store;

pub use queue::JobHeap;
pub use store::{InMemoryProviderStore, JsonFileProviderStore, ProviderStore};
