//! Job model: submission specs, lifecycle state, and post-run telemetry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{CoreResult, SchedulerError};

/// Target pool a job is queued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobQueue {
    /// Local accelerator / host.
    Local,
    /// Remote compute providers.
    Remote,
}

impl JobQueue {
    /// All queues in display order.
    pub const ALL: [Self; 2] = [Self::Local, Self::Remote];

    /// Parse a queue name exactly; `None` for anything unrecognized.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }

    /// Lenient parse: anything that is not explicitly `remote` lands on `local`.
    pub fn from_name(name: &str) -> Self {
        Self::parse(name).unwrap_or(Self::Local)
    }

    /// Wire name of the queue.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting on a priority queue.
    Queued,
    /// Held back by admission control.
    Delayed,
    /// Claimed by a worker.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Abandoned by the caller.
    Canceled,
}

impl JobStatus {
    /// Whether the job has reached a final state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Declared resource needs used for budget gating and cost estimation.
///
/// These are estimates; nothing enforces them on the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfEstimate {
    /// CPU share in percent of the whole host.
    pub cpu_percent: f64,
    /// Host RAM in megabytes.
    pub ram_mb: f64,
    /// Accelerator memory in megabytes.
    pub vram_mb: f64,
}

impl PerfEstimate {
    /// Build an estimate from its three components.
    pub const fn new(cpu_percent: f64, ram_mb: f64, vram_mb: f64) -> Self {
        Self {
            cpu_percent,
            ram_mb,
            vram_mb,
        }
    }

    /// Whether every component is zero.
    pub fn is_zero(&self) -> bool {
        self.cpu_percent <= 0.0 && self.ram_mb <= 0.0 && self.vram_mb <= 0.0
    }

    fn validate(&self) -> CoreResult<()> {
        for (field, value) in [
            ("cpu_percent", self.cpu_percent),
            ("ram_mb", self.ram_mb),
            ("vram_mb", self.vram_mb),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SchedulerError::Validation(format!(
                    "payload.perf.{field} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Caller payload. `perf` is typed; everything else is carried opaquely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Resource estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perf: Option<PerfEstimate>,
    /// Output width in pixels, when the job renders images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    /// Output height in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    /// Number of outputs produced per run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<u64>,
    /// Caller-specific fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobPayload {
    /// Resource estimate, zero when absent.
    pub fn perf(&self) -> PerfEstimate {
        self.perf.unwrap_or_default()
    }

    /// Estimated work size in pixels (`width * height * batch`), if declared.
    pub fn work_size(&self) -> Option<u64> {
        let (width, height) = (self.width?, self.height?);
        let batch = self.batch.unwrap_or(1).max(1);
        Some(width.saturating_mul(height).saturating_mul(batch))
    }
}

/// Job submission as sent by callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Caller-supplied id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Human-readable name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    /// Target queue name (`local`, `remote`, or `auto` for advisor routing).
    #[serde(default)]
    pub queue: Option<String>,
    /// Higher runs first. Defaults to 0.
    #[serde(default)]
    pub priority: Option<i64>,
    /// Pin all retries to the first device that claims the job.
    #[serde(default)]
    pub sticky: bool,
    /// Preferred device; becomes the sticky device of a sticky job.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Provider to run on / price against.
    #[serde(default)]
    pub provider_id: Option<String>,
    /// Caller payload including the `perf` estimate.
    #[serde(default)]
    pub payload: JobPayload,
    /// VRAM in GB used for cost estimation.
    #[serde(default)]
    pub vram_gb: Option<f64>,
    /// Bytes sent to the provider.
    #[serde(default)]
    pub bytes_tx: Option<u64>,
    /// Bytes received from the provider.
    #[serde(default)]
    pub bytes_rx: Option<u64>,
    /// Expected run time, used only for cost previews.
    #[serde(default)]
    pub duration_sec: Option<f64>,
}

impl JobSpec {
    /// Spec with an explicit id and default everything else.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Parse and validate a spec from JSON.
    pub fn from_json_str(input: &str) -> CoreResult<Self> {
        let spec: Self = serde_json::from_str(input)
            .map_err(|e| SchedulerError::Validation(format!("malformed job spec: {e}")))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Set the target queue name.
    #[must_use]
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark the job sticky.
    #[must_use]
    pub const fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }

    /// Set a preferred device.
    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Set the provider.
    #[must_use]
    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Set the resource estimate.
    #[must_use]
    pub const fn with_perf(mut self, perf: PerfEstimate) -> Self {
        self.payload.perf = Some(perf);
        self
    }

    /// Set the expected duration for cost previews.
    #[must_use]
    pub const fn with_duration_sec(mut self, secs: f64) -> Self {
        self.duration_sec = Some(secs);
        self
    }

    /// Set VRAM (GB) used for cost estimation.
    #[must_use]
    pub const fn with_vram_gb(mut self, vram_gb: f64) -> Self {
        self.vram_gb = Some(vram_gb);
        self
    }

    /// Set transfer volumes in bytes.
    #[must_use]
    pub const fn with_transfer(mut self, bytes_tx: u64, bytes_rx: u64) -> Self {
        self.bytes_tx = Some(bytes_tx);
        self.bytes_rx = Some(bytes_rx);
        self
    }

    /// Reject malformed specs before any state is touched.
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(SchedulerError::Validation("job id must not be empty".into()));
            }
        }
        if let Some(queue) = &self.queue {
            if queue.trim().is_empty() {
                return Err(SchedulerError::Validation("queue name must not be empty".into()));
            }
        }
        for (field, value) in [("vram_gb", self.vram_gb), ("duration_sec", self.duration_sec)] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(SchedulerError::Validation(format!(
                        "{field} must be a non-negative number, got {v}"
                    )));
                }
            }
        }
        if let Some(perf) = &self.payload.perf {
            perf.validate()?;
        }
        Ok(())
    }

    /// Whether the caller asked for advisor routing.
    pub fn wants_auto_queue(&self) -> bool {
        self.queue
            .as_deref()
            .is_some_and(|q| q.trim().eq_ignore_ascii_case("auto"))
    }
}

/// One claim attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Device the attempt ran on, if known.
    pub device_id: Option<String>,
    /// Worker that claimed the job.
    pub worker_id: String,
    /// Claim time (ms since epoch).
    pub started_ms: u64,
}

/// Post-completion measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTelemetry {
    /// Wall time of the last attempt.
    pub duration_sec: f64,
    /// Bytes sent.
    pub bytes_tx: u64,
    /// Bytes received.
    pub bytes_rx: u64,
    /// VRAM used (GB).
    pub vram_gb: f64,
    /// Computed or overridden cost.
    pub cost: f64,
    /// Currency of `cost`.
    pub currency: String,
    /// Whether `cost` came from the caller.
    pub cost_overridden: bool,
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Queue the job belongs to.
    pub queue: JobQueue,
    /// Higher runs first.
    pub priority: i64,
    /// FIFO tie-break within a priority band; refreshed on requeue.
    pub sequence: u64,
    /// Provider the job runs on.
    pub provider_id: Option<String>,
    /// Whether retries are pinned to one device.
    pub sticky: bool,
    /// Pinned device, set on first claim of a sticky job.
    pub sticky_device_id: Option<String>,
    /// Device of the current or last attempt.
    pub device_id: Option<String>,
    /// Worker of the current or last attempt.
    pub worker_id: Option<String>,
    /// Caller payload.
    pub payload: JobPayload,
    /// VRAM (GB) used for costing.
    pub vram_gb: Option<f64>,
    /// Declared bytes sent.
    pub bytes_tx: Option<u64>,
    /// Declared bytes received.
    pub bytes_rx: Option<u64>,
    /// Current state.
    pub status: JobStatus,
    /// Creation time (ms since epoch).
    pub created_ms: u64,
    /// Start of the current attempt.
    pub started_ms: Option<u64>,
    /// Completion time.
    pub completed_ms: Option<u64>,
    /// Number of claims so far.
    pub attempt: u32,
    /// One record per claim.
    pub runs: Vec<RunRecord>,
    /// Filled in on completion or failure.
    pub telemetry: Option<JobTelemetry>,
    /// Last error message.
    pub error: Option<String>,
}

impl Job {
    /// Resource estimate from the payload.
    pub fn perf(&self) -> PerfEstimate {
        self.payload.perf()
    }
}
