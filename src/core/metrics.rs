//! Point-in-time system metrics and the provider abstraction that samples them.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One accelerator as reported by the metrics provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuMetrics {
    /// Memory in use (MB).
    pub mem_used_mb: f64,
    /// Total memory (MB).
    pub mem_total_mb: f64,
    /// Utilization percent.
    pub util_percent: f64,
    /// Temperature in Celsius.
    pub temp_c: f64,
}

impl GpuMetrics {
    /// Free memory (MB), never negative.
    pub fn mem_free_mb(&self) -> f64 {
        (self.mem_total_mb - self.mem_used_mb).max(0.0)
    }
}

/// Immutable snapshot handed to admission decisions. Never cached across calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSnapshot {
    /// False when sampling failed; numeric fields are then zero.
    pub ok: bool,
    /// Host CPU utilization percent.
    pub cpu_percent: f64,
    /// Host RAM in use (MB).
    pub mem_used_mb: f64,
    /// Host RAM total (MB).
    pub mem_total_mb: f64,
    /// Zero or more accelerators; the first one gates VRAM admission.
    pub gpus: Vec<GpuMetrics>,
}

impl MetricsSnapshot {
    /// Snapshot reported when sampling fails.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Healthy snapshot without accelerators.
    pub const fn host(cpu_percent: f64, mem_used_mb: f64, mem_total_mb: f64) -> Self {
        Self {
            ok: true,
            cpu_percent,
            mem_used_mb,
            mem_total_mb,
            gpus: Vec::new(),
        }
    }

    /// Append an accelerator.
    #[must_use]
    pub fn with_gpu(mut self, gpu: GpuMetrics) -> Self {
        self.gpus.push(gpu);
        self
    }

    /// First reported accelerator, if any.
    pub fn first_gpu(&self) -> Option<&GpuMetrics> {
        self.gpus.first()
    }
}

/// Source of metrics snapshots.
///
/// Implementations must return quickly and must not panic; on failure they
/// return [`MetricsSnapshot::unavailable`].
pub trait MetricsProvider: Send + Sync {
    /// Sample current metrics.
    fn snapshot(&self) -> MetricsSnapshot;
}

impl<F> MetricsProvider for F
where
    F: Fn() -> MetricsSnapshot + Send + Sync,
{
    fn snapshot(&self) -> MetricsSnapshot {
        self()
    }
}

/// Metrics provider that returns whatever was last pushed into it.
///
/// Useful when an external sampler owns the polling loop, and in tests.
#[derive(Debug, Default)]
pub struct StaticMetrics {
    current: RwLock<MetricsSnapshot>,
}

impl StaticMetrics {
    /// Create a provider seeded with `snapshot`.
    pub fn new(snapshot: MetricsSnapshot) -> Self {
        Self {
            current: RwLock::new(snapshot),
        }
    }

    /// Replace the reported snapshot.
    pub fn set(&self, snapshot: MetricsSnapshot) {
        *self.current.write() = snapshot;
    }

    /// Update the reported snapshot in place.
    pub fn update(&self, f: impl FnOnce(&mut MetricsSnapshot)) {
        f(&mut self.current.write());
    }
}

impl MetricsProvider for StaticMetrics {
    fn snapshot(&self) -> MetricsSnapshot {
        self.current.read().clone()
    }
}
