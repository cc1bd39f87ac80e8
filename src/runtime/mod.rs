//! Runtime adapters and API surface.

pub mod api;
pub mod dispatcher;
#[cfg(feature = "tokio-runtime")]
pub mod health;

pub use api::{CoreHealth, DispatchRefresh, SubmitOutcome};
pub use dispatcher::Dispatcher;
#[cfg(feature = "tokio-runtime")]
pub use health::{probe_providers, spawn_health_monitor, spawn_maintenance, HealthProbe};
