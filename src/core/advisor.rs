//! Device advisor: picks cpu, gpu, or remote for a job.
//!
//! Pure and deterministic. The decision table is evaluated top to bottom and
//! the first matching rule wins.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::AdvisorThresholds;
use crate::core::JobSpec;

/// Where a job should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceDecision {
    /// Host CPU.
    Cpu,
    /// Local accelerator.
    Gpu,
    /// A remote provider.
    Remote,
}

impl fmt::Display for DeviceDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Remote => "remote",
        })
    }
}

/// What the advisor needs to know about a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRequest {
    /// Declared VRAM need (GB).
    pub vram_gb: Option<f64>,
    /// Estimated work size in pixels.
    pub work_size: Option<u64>,
}

impl DeviceRequest {
    /// Derive a request from a job spec. `vram_gb` wins over `payload.perf.vram_mb`.
    pub fn from_spec(spec: &JobSpec) -> Self {
        let perf_vram_gb = spec.payload.perf().vram_mb / 1024.0;
        Self {
            vram_gb: spec
                .vram_gb
                .or_else(|| (perf_vram_gb > 0.0).then_some(perf_vram_gb)),
            work_size: spec.payload.work_size(),
        }
    }
}

/// Live placement context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvisorContext {
    /// Whether a local accelerator exists.
    pub has_local_gpu: bool,
    /// Jobs waiting on the local queue.
    pub local_queue_depth: usize,
    /// Free local VRAM (GB).
    pub local_vram_gb: f64,
    /// Whether a remote provider can take work.
    pub remote_available: bool,
    /// Jobs waiting on the remote queue.
    pub remote_queue_depth: usize,
}

/// Decision plus a human-readable rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    /// Chosen device.
    pub decision: DeviceDecision,
    /// Why.
    pub reason: String,
}

impl Advice {
    fn new(decision: DeviceDecision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
        }
    }
}

/// Choose a device with default thresholds.
pub fn choose_device(job: &DeviceRequest, ctx: &AdvisorContext) -> Advice {
    choose_device_with(job, ctx, &AdvisorThresholds::default())
}

/// Choose a device with explicit thresholds.
pub fn choose_device_with(
    job: &DeviceRequest,
    ctx: &AdvisorContext,
    thresholds: &AdvisorThresholds,
) -> Advice {
    if !ctx.has_local_gpu {
        return Advice::new(DeviceDecision::Cpu, "no GPU detected");
    }

    if let Some(need) = job.vram_gb {
        if need - ctx.local_vram_gb > thresholds.vram_margin_gb {
            return if ctx.remote_available {
                Advice::new(
                    DeviceDecision::Remote,
                    format!(
                        "needs {need:.1} GB VRAM, only {:.1} GB local; sending remote",
                        ctx.local_vram_gb
                    ),
                )
            } else {
                Advice::new(
                    DeviceDecision::Cpu,
                    format!(
                        "needs {need:.1} GB VRAM, only {:.1} GB local and remote unavailable",
                        ctx.local_vram_gb
                    ),
                )
            };
        }
    }

    if let Some(size) = job.work_size {
        if size >= thresholds.large_work_size {
            return if ctx.remote_available {
                Advice::new(
                    DeviceDecision::Remote,
                    format!(
                        "large job ({size} px); remote queue depth {}",
                        ctx.remote_queue_depth
                    ),
                )
            } else {
                Advice::new(
                    DeviceDecision::Gpu,
                    format!("large job ({size} px) but remote unavailable"),
                )
            };
        }
        if size <= thresholds.tiny_work_size {
            return Advice::new(
                DeviceDecision::Cpu,
                format!("tiny job ({size} px); GPU overhead not worth it"),
            );
        }
    }

    if ctx.local_queue_depth >= thresholds.busy_queue_depth && ctx.remote_available {
        return Advice::new(
            DeviceDecision::Remote,
            format!(
                "local queue busy ({} waiting); offloading to remote",
                ctx.local_queue_depth
            ),
        );
    }

    if ctx.local_queue_depth >= thresholds.saturated_queue_depth {
        return Advice::new(
            DeviceDecision::Cpu,
            format!(
                "local queue saturated ({} waiting) and no remote; using CPU",
                ctx.local_queue_depth
            ),
        );
    }

    Advice::new(DeviceDecision::Gpu, "local GPU available")
}
