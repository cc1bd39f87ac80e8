//! Job scheduler: per-queue priority claim, sticky device affinity, history, and costing.
//!
//! Each queue is a [`JobHeap`] of `(priority, sequence)` references into the
//! job table. Requeue pushes a fresh entry with a new sequence; stale entries
//! are discarded lazily on claim.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::SchedulerConfig;
use crate::core::cost::{CostBreakdown, CostInput, CostModel};
use crate::core::events::{emit_safely, SharedEventSink};
use crate::core::{
    CoreResult, Job, JobQueue, JobSpec, JobStatus, JobTelemetry, Provider, ProviderRegistry,
    RunRecord, SchedulerError, LOCAL_PROVIDER_ID,
};
use crate::infra::queue::JobHeap;
use crate::util::clock::{monotonic_ms, ms_to_secs};
use crate::util::ids::generate_job_id;

/// Outcome reported by a worker when a job ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionReport {
    /// `Succeeded` (default) or `Canceled`; failures go through `fail`.
    pub status: Option<JobStatus>,
    /// Measured run time; derived from the claim time when absent.
    pub duration_sec: Option<f64>,
    /// Measured bytes sent.
    pub bytes_tx: Option<u64>,
    /// Measured bytes received.
    pub bytes_rx: Option<u64>,
    /// Measured VRAM (GB).
    pub vram_gb: Option<f64>,
    /// Caller-supplied cost that replaces the computed one.
    pub cost_override: Option<f64>,
}

impl CompletionReport {
    /// Report with a terminal status.
    pub const fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            duration_sec: None,
            bytes_tx: None,
            bytes_rx: None,
            vram_gb: None,
            cost_override: None,
        }
    }

    fn validate(&self) -> CoreResult<()> {
        if let Some(status) = self.status {
            if !matches!(status, JobStatus::Succeeded | JobStatus::Canceled) {
                return Err(SchedulerError::Validation(format!(
                    "completion status must be succeeded or canceled, got {status:?}"
                )));
            }
        }
        for (field, value) in [
            ("duration_sec", self.duration_sec),
            ("vram_gb", self.vram_gb),
            ("cost_override", self.cost_override),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(SchedulerError::Validation(format!(
                        "{field} must be a non-negative number, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Point-in-time view of every queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerView {
    /// Waiting jobs per queue name, in claim order.
    pub queues: BTreeMap<String, Vec<Job>>,
    /// Running jobs, oldest claim first.
    pub active: Vec<Job>,
    /// Finished jobs, most recent first.
    pub completed: Vec<Job>,
}

/// One row of the execution board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardEntry {
    /// Job id.
    pub id: String,
    /// Job name.
    pub name: String,
    /// Queue.
    pub queue: JobQueue,
    /// Status.
    pub status: JobStatus,
    /// Device of the attempt.
    pub device_id: Option<String>,
    /// Worker of the attempt.
    pub worker_id: Option<String>,
    /// Provider.
    pub provider_id: Option<String>,
    /// Attempt number.
    pub attempt: u32,
    /// Claim time.
    pub start_ms: u64,
    /// Completion time; `None` while running.
    pub end_ms: Option<u64>,
    /// Elapsed or final run time.
    pub duration_sec: f64,
    /// Final cost, once known.
    pub cost: Option<f64>,
}

impl BoardEntry {
    fn from_job(job: &Job, now_ms: u64) -> Option<Self> {
        let start_ms = job.started_ms?;
        let duration_sec = job.telemetry.as_ref().map_or_else(
            || ms_to_secs(job.completed_ms.unwrap_or(now_ms).saturating_sub(start_ms)),
            |t| t.duration_sec,
        );
        Some(Self {
            id: job.id.clone(),
            name: job.name.clone(),
            queue: job.queue,
            status: job.status,
            device_id: job.device_id.clone(),
            worker_id: job.worker_id.clone(),
            provider_id: job.provider_id.clone(),
            attempt: job.attempt,
            start_ms,
            end_ms: job.completed_ms,
            duration_sec,
            cost: job.telemetry.as_ref().map(|t| t.cost),
        })
    }
}

#[derive(Default)]
struct SchedulerState {
    next_sequence: u64,
    heaps: HashMap<JobQueue, JobHeap>,
    active: HashMap<String, Job>,
    history: VecDeque<Job>,
}

impl SchedulerState {
    fn push_ready(&mut self, job: &mut Job) {
        job.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heaps
            .entry(job.queue)
            .or_default()
            .push(job.id.clone(), job.priority, job.sequence);
    }

    fn take_from_history(&mut self, id: &str) -> Option<Job> {
        let index = self.history.iter().position(|j| j.id == id)?;
        self.history.remove(index)
    }
}

/// Priority scheduler for the local and remote queues.
pub struct JobScheduler {
    state: Mutex<SchedulerState>,
    config: SchedulerConfig,
    cost_model: CostModel,
    registry: Option<Arc<ProviderRegistry>>,
    events: Option<SharedEventSink>,
}

impl JobScheduler {
    /// Create a scheduler with validated configuration.
    pub fn new(config: SchedulerConfig) -> CoreResult<Self> {
        config.validate().map_err(SchedulerError::Validation)?;
        Ok(Self {
            state: Mutex::new(SchedulerState::default()),
            cost_model: CostModel::new(config.remote_default_cost_per_minute),
            config,
            registry: None,
            events: None,
        })
    }

    /// Price jobs against this registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Attach an event sink.
    #[must_use]
    pub fn with_events(mut self, sink: SharedEventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Configuration in force.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Queue a job. Unknown queue names fall back to `local`.
    ///
    /// An id that is still queued or running is rejected; an id found only in
    /// history is re-submitted as a new job.
    pub fn enqueue(&self, spec: JobSpec) -> CoreResult<Job> {
        spec.validate()?;
        let queue = resolve_queue(&spec);
        let id = spec
            .id
            .as_deref()
            .map_or_else(generate_job_id, |id| id.trim().to_string());

        let job = {
            let mut state = self.state.lock();
            if state.active.contains_key(&id) {
                return Err(SchedulerError::Validation(format!(
                    "job `{id}` is already queued or running"
                )));
            }
            if state.take_from_history(&id).is_some() {
                tracing::debug!(job = %id, "re-submitting finished job id");
            }
            let mut job = Job {
                name: spec.name.clone().unwrap_or_else(|| id.clone()),
                id: id.clone(),
                queue,
                priority: spec.priority.unwrap_or(0),
                sequence: 0,
                provider_id: spec.provider_id.clone(),
                sticky: spec.sticky,
                sticky_device_id: None,
                device_id: spec.device_id.clone(),
                worker_id: None,
                payload: spec.payload,
                vram_gb: spec.vram_gb,
                bytes_tx: spec.bytes_tx,
                bytes_rx: spec.bytes_rx,
                status: JobStatus::Queued,
                created_ms: monotonic_ms(),
                started_ms: None,
                completed_ms: None,
                attempt: 0,
                runs: Vec::new(),
                telemetry: None,
                error: None,
            };
            state.push_ready(&mut job);
            state.active.insert(id, job.clone());
            job
        };

        tracing::debug!(job = %job.id, queue = %job.queue, priority = job.priority, "job enqueued");
        self.emit(
            "job.enqueued",
            &json!({"id": job.id, "queue": job.queue, "priority": job.priority}),
        );
        Ok(job)
    }

    /// Claim the best waiting job on `queue`.
    ///
    /// Sticky jobs that already ran keep their device; otherwise the job runs
    /// on `device_id`, falling back to the device it was submitted with.
    pub fn claim(&self, queue: JobQueue, worker_id: &str, device_id: Option<&str>) -> Option<Job> {
        let job = {
            let mut guard = self.state.lock();
            let SchedulerState { heaps, active, .. } = &mut *guard;
            let entry = heaps.get_mut(&queue)?.pop_live(|entry| {
                active.get(&entry.job_id).is_some_and(|job| {
                    job.status == JobStatus::Queued && job.sequence == entry.sequence
                })
            })?;
            let job = active.get_mut(&entry.job_id)?;

            let device = match (&job.sticky_device_id, device_id) {
                (Some(pinned), _) if job.sticky => Some(pinned.clone()),
                (_, Some(device)) => Some(device.to_string()),
                (_, None) => job.device_id.clone(),
            };
            if job.sticky && job.sticky_device_id.is_none() {
                job.sticky_device_id.clone_from(&device);
            }
            let started = monotonic_ms();
            job.status = JobStatus::Running;
            job.attempt += 1;
            job.started_ms = Some(started);
            job.completed_ms = None;
            job.device_id.clone_from(&device);
            job.worker_id = Some(worker_id.to_string());
            job.runs.push(RunRecord {
                attempt: job.attempt,
                device_id: device,
                worker_id: worker_id.to_string(),
                started_ms: started,
            });
            job.clone()
        };

        tracing::debug!(job = %job.id, worker = worker_id, device = ?job.device_id, attempt = job.attempt, "job claimed");
        self.emit(
            "job.claimed",
            &json!({
                "id": job.id,
                "queue": job.queue,
                "worker_id": worker_id,
                "device_id": job.device_id,
                "attempt": job.attempt,
            }),
        );
        Some(job)
    }

    /// Put a job back on its queue with a fresh sequence.
    ///
    /// A job that is already queued is returned unchanged. Running and finished
    /// jobs are reset and queued again; `priority` replaces the old one when set.
    pub fn requeue(&self, id: &str, priority: Option<i64>) -> CoreResult<Job> {
        let job = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if let Some(job) = state.active.get(id) {
                if job.status == JobStatus::Queued {
                    return Ok(job.clone());
                }
            }
            let mut job = match state.active.remove(id) {
                Some(job) => job,
                None => state
                    .take_from_history(id)
                    .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?,
            };
            job.status = JobStatus::Queued;
            job.started_ms = None;
            job.completed_ms = None;
            job.telemetry = None;
            job.error = None;
            job.worker_id = None;
            if let Some(priority) = priority {
                job.priority = priority;
            }
            state.push_ready(&mut job);
            state.active.insert(job.id.clone(), job.clone());
            job
        };

        tracing::info!(job = %job.id, priority = job.priority, attempt = job.attempt, "job requeued");
        self.emit(
            "job.requeued",
            &json!({"id": job.id, "queue": job.queue, "priority": job.priority}),
        );
        Ok(job)
    }

    /// Finish a job and record its telemetry and cost.
    pub fn complete(&self, id: &str, report: CompletionReport) -> CoreResult<Job> {
        report.validate()?;
        let status = report.status.unwrap_or(JobStatus::Succeeded);
        self.finish(id, status, &report, None)
    }

    /// Finish a job as failed.
    pub fn fail(&self, id: &str, error: Option<String>) -> CoreResult<Job> {
        self.finish(id, JobStatus::Failed, &CompletionReport::default(), error)
    }

    /// Finish a job as canceled, whether queued or running.
    pub fn cancel(&self, id: &str) -> CoreResult<Job> {
        self.finish(id, JobStatus::Canceled, &CompletionReport::default(), None)
    }

    fn finish(
        &self,
        id: &str,
        status: JobStatus,
        report: &CompletionReport,
        error: Option<String>,
    ) -> CoreResult<Job> {
        let job = {
            let mut state = self.state.lock();
            let Some(mut job) = state.active.remove(id) else {
                return Err(if state.history.iter().any(|j| j.id == id) {
                    SchedulerError::InvalidState {
                        id: id.to_string(),
                        reason: "job already finished".into(),
                    }
                } else {
                    SchedulerError::JobNotFound(id.to_string())
                });
            };

            let completed = monotonic_ms();
            let duration_sec = report.duration_sec.unwrap_or_else(|| {
                job.started_ms
                    .map_or(0.0, |start| ms_to_secs(completed.saturating_sub(start)))
            });
            let input = CostInput {
                queue: job.queue,
                duration_sec,
                bytes_tx: report.bytes_tx.or(job.bytes_tx).unwrap_or(0),
                bytes_rx: report.bytes_rx.or(job.bytes_rx).unwrap_or(0),
                vram_gb: report
                    .vram_gb
                    .or(job.vram_gb)
                    .unwrap_or_else(|| job.perf().vram_mb / 1024.0),
            };
            let provider = self.resolve_provider(job.queue, job.provider_id.as_deref());
            let breakdown =
                self.cost_model
                    .estimate(&input, provider.as_ref(), job.provider_id.as_deref());

            job.status = status;
            job.completed_ms = Some(completed);
            if error.is_some() {
                job.error = error;
            }
            job.telemetry = Some(JobTelemetry {
                duration_sec,
                bytes_tx: input.bytes_tx,
                bytes_rx: input.bytes_rx,
                vram_gb: input.vram_gb,
                cost: report.cost_override.unwrap_or(breakdown.total),
                currency: breakdown.currency,
                cost_overridden: report.cost_override.is_some(),
            });
            state.history.push_back(job.clone());
            while state.history.len() > self.config.history_limit {
                state.history.pop_front();
            }
            job
        };

        let event = if status == JobStatus::Failed {
            tracing::warn!(job = %job.id, error = ?job.error, "job failed");
            "job.failed"
        } else {
            tracing::debug!(job = %job.id, status = ?status, "job finished");
            "job.completed"
        };
        self.emit(
            event,
            &json!({
                "id": job.id,
                "queue": job.queue,
                "status": job.status,
                "cost": job.telemetry.as_ref().map(|t| t.cost),
                "error": job.error,
            }),
        );
        Ok(job)
    }

    /// Estimate what a spec would cost. Touches no scheduler state.
    pub fn preview_cost(&self, spec: &JobSpec) -> CoreResult<CostBreakdown> {
        spec.validate()?;
        let queue = resolve_queue(spec);
        let input = CostInput {
            queue,
            duration_sec: spec.duration_sec.unwrap_or(0.0),
            bytes_tx: spec.bytes_tx.unwrap_or(0),
            bytes_rx: spec.bytes_rx.unwrap_or(0),
            vram_gb: spec
                .vram_gb
                .unwrap_or_else(|| spec.payload.perf().vram_mb / 1024.0),
        };
        let provider = self.resolve_provider(queue, spec.provider_id.as_deref());
        Ok(self
            .cost_model
            .estimate(&input, provider.as_ref(), spec.provider_id.as_deref()))
    }

    fn resolve_provider(&self, queue: JobQueue, provider_id: Option<&str>) -> Option<Provider> {
        let registry = self.registry.as_ref()?;
        match provider_id {
            Some(id) => registry.get(id),
            None if queue == JobQueue::Local => registry.get(LOCAL_PROVIDER_ID),
            None => None,
        }
    }

    /// Job by id, active or finished.
    pub fn get(&self, id: &str) -> Option<Job> {
        let state = self.state.lock();
        state
            .active
            .get(id)
            .cloned()
            .or_else(|| state.history.iter().rev().find(|j| j.id == id).cloned())
    }

    /// Number of jobs waiting on `queue`.
    pub fn depth(&self, queue: JobQueue) -> usize {
        self.state
            .lock()
            .active
            .values()
            .filter(|j| j.queue == queue && j.status == JobStatus::Queued)
            .count()
    }

    /// Snapshot of every queue, the running set, and history.
    pub fn state(&self) -> SchedulerView {
        let state = self.state.lock();
        let mut view = SchedulerView::default();
        for queue in JobQueue::ALL {
            let mut waiting: Vec<Job> = state
                .active
                .values()
                .filter(|j| j.queue == queue && j.status == JobStatus::Queued)
                .cloned()
                .collect();
            waiting.sort_by_key(|j| (std::cmp::Reverse(j.priority), j.sequence));
            view.queues.insert(queue.to_string(), waiting);
        }
        view.active = state
            .active
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .cloned()
            .collect();
        view.active.sort_by_key(|j| (j.started_ms, j.sequence));
        view.completed = state.history.iter().rev().cloned().collect();
        view
    }

    /// Running jobs plus up to `limit` most recent finished ones, ordered by
    /// queue then start time.
    pub fn board(&self, limit: Option<usize>) -> Vec<BoardEntry> {
        let limit = limit.unwrap_or(self.config.board_limit);
        let now = monotonic_ms();
        let state = self.state.lock();
        let mut rows: Vec<BoardEntry> = state
            .active
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .chain(state.history.iter().rev().take(limit))
            .filter_map(|j| BoardEntry::from_job(j, now))
            .collect();
        drop(state);
        rows.sort_by(|a, b| (a.queue, a.start_ms, &a.id).cmp(&(b.queue, b.start_ms, &b.id)));
        rows
    }

    fn emit(&self, name: &str, payload: &Value) {
        emit_safely(self.events.as_ref(), name, payload);
    }
}

fn resolve_queue(spec: &JobSpec) -> JobQueue {
    match spec.queue.as_deref() {
        None => JobQueue::Local,
        Some(name) => JobQueue::parse(name).unwrap_or_else(|| {
            tracing::debug!(queue = name, "unknown queue name; using local");
            JobQueue::Local
        }),
    }
}
