//! Core scheduling, admission, and provider abstractions.

pub mod advisor;
pub mod assets;
pub mod budget;
pub mod cost;
pub mod error;
pub mod events;
pub mod job;
pub mod metrics;
pub mod provider;
pub mod scheduler;

pub use advisor::{choose_device, choose_device_with, Advice, AdvisorContext, DeviceDecision, DeviceRequest};
pub use assets::{AssetInfo, AssetTable, LazyAsset, UnloadFn};
pub use budget::{
    Admission, AdmissionState, BudgetHealth, BudgetJob, BudgetManager, BudgetSnapshot,
    EvictionReport, RefreshOutcome, ResourceRequest,
};
pub use cost::{CostBreakdown, CostInput, CostModel, CostRates};
pub use error::{AppResult, CoreResult, SchedulerError};
#[cfg(not(target_arch = "wasm32"))]
pub use events::ChannelEventSink;
pub use events::{emit_safely, CoreEvent, EventSink, InMemoryEventSink, SharedEventSink};
pub use job::{
    Job, JobPayload, JobQueue, JobSpec, JobStatus, JobTelemetry, PerfEstimate, RunRecord,
};
pub use metrics::{GpuMetrics, MetricsProvider, MetricsSnapshot, StaticMetrics};
pub use provider::{
    is_secret_key, HealthStatus, HealthUpdate, ImportMode, Provider, ProviderCatalog,
    ProviderKind, ProviderMeta, ProviderRegistry, ProviderSpec, LOCAL_PROVIDER_ID, SECRET_MASK,
};
pub use scheduler::{BoardEntry, CompletionReport, JobScheduler, SchedulerView};
