//! # Prometheus Compute Broker
//!
//! Admission, scheduling, and budgeting core for render, voice, and batch jobs
//! dispatched across a local accelerator and a catalog of remote compute
//! providers.
//!
//! For every submitted job the broker decides which queue it enters, when it
//! may run given current resource pressure, which device or provider executes
//! it, and what it will likely cost. Execution itself belongs to the caller:
//! workers claim jobs, run them, and report back.
//!
//! ## Components
//!
//! - **`JobScheduler`**: per-queue priority heaps with FIFO tie-break, sticky
//!   device affinity across retries, bounded history, and per-provider costing
//! - **`BudgetManager`**: gates admission against CPU/RAM/VRAM/concurrency/depth
//!   limits using live metrics, re-admits delayed jobs, and evicts lazy assets
//!   least recently used first
//! - **`ProviderRegistry`**: catalog of local and remote endpoints with health,
//!   pricing metadata, secret masking, and export/import
//! - **`choose_device`**: deterministic cpu/gpu/remote advice
//! - **`Dispatcher`**: gate-then-enqueue front door tying the above together
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_compute_broker::builders::ComputeCoreBuilder;
//! use prometheus_compute_broker::config::CoreConfig;
//! use prometheus_compute_broker::core::{JobQueue, JobSpec, MetricsSnapshot, StaticMetrics};
//!
//! let core = ComputeCoreBuilder::new(CoreConfig::from_env()?)
//!     .with_metrics(Arc::new(StaticMetrics::new(MetricsSnapshot::host(12.0, 4096.0, 32768.0))))
//!     .build()?;
//!
//! let outcome = core.dispatcher.submit(JobSpec::new("render-1").with_queue("auto"))?;
//! if let Some(job) = core.dispatcher.claim(JobQueue::Local, "worker-1", Some("gpu:0")) {
//!     // run it, then:
//!     core.dispatcher.complete(&job.id, Default::default())?;
//! }
//! ```
//!
//! All core operations are synchronous and never block on I/O while holding a
//! lock. Polling loops (queue refresh, provider health checks) are optional
//! tokio tasks in [`runtime`] behind the `tokio-runtime` feature.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling, admission, and provider abstractions.
pub mod core;
/// Configuration models for budgets, scheduling, and device advice.
pub mod config;
/// Builders to construct the compute core from configuration.
pub mod builders;
/// Infrastructure adapters for the claim heap and provider stores.
pub mod infra;
/// Dispatcher, API models, and optional async glue.
pub mod runtime;
/// Shared utilities.
pub mod util;
