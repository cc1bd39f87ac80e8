//! Budget manager: admission control against live metrics, plus lazy-asset trimming.
//!
//! Admission is evaluated in a fixed order: queue depth cap, running-job cap,
//! CPU headroom, RAM headroom, then VRAM headroom on the first reported GPU.
//! The first failing check delays the job with a reason naming the constraint.
//!
//! One `parking_lot::Mutex` guards all state. Metrics sampling, unload
//! callbacks, and event delivery all happen with the lock released.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{BudgetLimits, BudgetLimitsUpdate};
use crate::core::assets::{run_unload, AssetInfo, AssetTable, UnloadFn};
use crate::core::events::{emit_safely, SharedEventSink};
use crate::core::metrics::{MetricsProvider, MetricsSnapshot};
use crate::core::{CoreResult, JobPayload, PerfEstimate, SchedulerError};
use crate::util::clock::monotonic_ms;

/// Budget-side lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionState {
    /// Admitted; waiting for a worker.
    Queued,
    /// Held back by a budget constraint.
    Delayed,
    /// Started by a worker.
    Running,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Error,
}

/// Resources a job asks the budget for.
pub type ResourceRequest = PerfEstimate;

/// Result of an admission decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    /// Job id.
    pub id: String,
    /// `Queued` or `Delayed`.
    pub state: AdmissionState,
    /// Why the job was delayed.
    pub reason: Option<String>,
}

impl Admission {
    /// Whether the job may proceed to a ready queue.
    pub fn is_admitted(&self) -> bool {
        self.state == AdmissionState::Queued
    }
}

/// A job tracked by the budget manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetJob {
    /// Job id.
    pub id: String,
    /// Caller-defined kind (render, tts, ...).
    pub kind: String,
    /// Requested resources.
    pub request: ResourceRequest,
    /// Current state.
    pub state: AdmissionState,
    /// Last delay reason or error.
    pub reason: Option<String>,
    /// Registration order.
    pub sequence: u64,
    /// Registration time.
    pub registered_ms: u64,
    /// Start time.
    pub started_ms: Option<u64>,
    /// Finish time.
    pub finished_ms: Option<u64>,
}

/// Outcome of a delayed-job re-evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    /// True when rate limiting skipped the pass.
    pub skipped: bool,
    /// Jobs moved from delayed to queued, in registration order.
    pub promoted: Vec<String>,
    /// Jobs still delayed.
    pub still_delayed: usize,
    /// Memory released by opportunistic trimming (MB).
    pub evicted_mb: f64,
}

/// Outcome of an eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvictionReport {
    /// Amount asked for (MB).
    pub requested_mb: f64,
    /// Amount released (MB).
    pub freed_mb: f64,
    /// Evicted assets, oldest first.
    pub evicted: Vec<String>,
    /// Assets whose unload callback failed; they stay loaded.
    pub failed: Vec<String>,
}

/// Full observability view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    /// Limits in force.
    pub limits: BudgetLimits,
    /// Metrics sampled for this snapshot.
    pub metrics: MetricsSnapshot,
    /// Active jobs in registration order.
    pub jobs: Vec<BudgetJob>,
    /// Finished jobs retained.
    pub finished: usize,
    /// Registered assets, least recently used first.
    pub assets: Vec<AssetInfo>,
    /// Memory released by trimming during this snapshot (MB).
    pub evicted_mb: f64,
}

/// Cheap status for frequent polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetHealth {
    /// Whether the last observed metrics sample succeeded.
    pub metrics_ok: bool,
    /// Queued jobs.
    pub queued: usize,
    /// Delayed jobs.
    pub delayed: usize,
    /// Running jobs.
    pub running: usize,
    /// Finished jobs retained.
    pub finished: usize,
    /// Running-job cap.
    pub max_running_jobs: usize,
    /// Loaded lazy assets.
    pub loaded_assets: usize,
    /// Memory held by loaded lazy assets (MB).
    pub loaded_asset_mb: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    queued: usize,
    delayed: usize,
    running: usize,
}

impl Counts {
    const fn total(self) -> usize {
        self.queued + self.delayed + self.running
    }
}

/// Observed usage, optionally bumped by jobs promoted earlier in the same pass.
#[derive(Debug, Clone, Copy)]
struct Usage {
    cpu_percent: f64,
    ram_mb: f64,
    vram_mb: Option<f64>,
}

impl Usage {
    fn from_metrics(metrics: &MetricsSnapshot) -> Self {
        Self {
            cpu_percent: metrics.cpu_percent,
            ram_mb: metrics.mem_used_mb,
            vram_mb: metrics.first_gpu().map(|g| g.mem_used_mb),
        }
    }

    fn add(&mut self, request: &PerfEstimate) {
        self.cpu_percent += request.cpu_percent;
        self.ram_mb += request.ram_mb;
        if let Some(vram) = self.vram_mb.as_mut() {
            *vram += request.vram_mb;
        }
    }
}

/// Check a request against the limits. `Err` carries the delay reason.
fn evaluate(
    limits: &BudgetLimits,
    metrics_ok: bool,
    usage: &Usage,
    counts: Counts,
    request: &PerfEstimate,
) -> Result<(), String> {
    let total = counts.total();
    if total >= limits.max_queue_depth {
        return Err(format!(
            "queue depth cap reached ({total}/{})",
            limits.max_queue_depth
        ));
    }
    if counts.running >= limits.max_running_jobs {
        return Err(format!(
            "running job cap reached ({}/{})",
            counts.running, limits.max_running_jobs
        ));
    }
    if !metrics_ok && !request.is_zero() {
        return Err("metrics unavailable; holding job that requests resources".into());
    }
    if usage.cpu_percent + request.cpu_percent > limits.max_cpu_percent {
        return Err(format!(
            "cpu budget exceeded ({:.1}% + {:.1}% > {:.1}%)",
            usage.cpu_percent, request.cpu_percent, limits.max_cpu_percent
        ));
    }
    if limits.max_ram_mb > 0.0 && usage.ram_mb + request.ram_mb > limits.max_ram_mb {
        return Err(format!(
            "ram budget exceeded ({:.0} MB + {:.0} MB > {:.0} MB)",
            usage.ram_mb, request.ram_mb, limits.max_ram_mb
        ));
    }
    if let Some(vram_used) = usage.vram_mb {
        if limits.max_vram_mb > 0.0 && vram_used + request.vram_mb > limits.max_vram_mb {
            return Err(format!(
                "vram budget exceeded ({vram_used:.0} MB + {:.0} MB > {:.0} MB)",
                request.vram_mb, limits.max_vram_mb
            ));
        }
    }
    Ok(())
}

/// Memory to free so the snapshot fits the budgets again, plus configured headroom.
fn trim_target(limits: &BudgetLimits, metrics: &MetricsSnapshot) -> f64 {
    if !metrics.ok {
        return 0.0;
    }
    let ram_short = if limits.max_ram_mb > 0.0 {
        metrics.mem_used_mb - limits.max_ram_mb
    } else {
        0.0
    };
    let vram_short = match metrics.first_gpu() {
        Some(gpu) if limits.max_vram_mb > 0.0 => gpu.mem_used_mb - limits.max_vram_mb,
        _ => 0.0,
    };
    let shortfall = ram_short.max(vram_short);
    if shortfall > 0.0 {
        shortfall + limits.lazy_asset_target_mb
    } else {
        0.0
    }
}

struct BudgetState {
    limits: BudgetLimits,
    jobs: HashMap<String, BudgetJob>,
    history: VecDeque<BudgetJob>,
    next_sequence: u64,
    assets: AssetTable,
    last_refresh: Option<Instant>,
    last_metrics_ok: bool,
}

impl BudgetState {
    fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for job in self.jobs.values() {
            match job.state {
                AdmissionState::Queued => counts.queued += 1,
                AdmissionState::Delayed => counts.delayed += 1,
                AdmissionState::Running => counts.running += 1,
                AdmissionState::Complete | AdmissionState::Error => {}
            }
        }
        counts
    }

    fn push_history(&mut self, job: BudgetJob) {
        self.history.retain(|j| j.id != job.id);
        self.history.push_back(job);
        while self.history.len() > self.limits.history_limit {
            self.history.pop_front();
        }
    }
}

/// Gates job admission against configured limits and live metrics.
pub struct BudgetManager {
    state: Mutex<BudgetState>,
    metrics: Arc<dyn MetricsProvider>,
    events: Option<SharedEventSink>,
}

impl BudgetManager {
    /// Create a manager with validated limits.
    pub fn new(limits: BudgetLimits, metrics: Arc<dyn MetricsProvider>) -> CoreResult<Self> {
        limits.validate().map_err(SchedulerError::Validation)?;
        Ok(Self {
            state: Mutex::new(BudgetState {
                limits,
                jobs: HashMap::new(),
                history: VecDeque::new(),
                next_sequence: 0,
                assets: AssetTable::default(),
                last_refresh: None,
                last_metrics_ok: true,
            }),
            metrics,
            events: None,
        })
    }

    /// Attach an event sink.
    #[must_use]
    pub fn with_events(mut self, sink: SharedEventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Apply a partial limits update. Invalid updates change nothing.
    pub fn configure(&self, update: &BudgetLimitsUpdate) -> CoreResult<BudgetLimits> {
        let limits = {
            let mut state = self.state.lock();
            let limits = state.limits.merged(update);
            limits.validate().map_err(SchedulerError::Validation)?;
            state.limits = limits.clone();
            while state.history.len() > state.limits.history_limit {
                state.history.pop_front();
            }
            limits
        };
        tracing::info!(?limits, "budget limits updated");
        self.emit("budget.configured", &json!({"limits": limits}));
        Ok(limits)
    }

    /// Limits in force.
    pub fn limits(&self) -> BudgetLimits {
        self.state.lock().limits.clone()
    }

    fn sample(&self) -> MetricsSnapshot {
        let metrics = self.metrics.snapshot();
        if !metrics.ok {
            tracing::warn!("metrics provider reported failure; using zeroed metrics");
        }
        metrics
    }

    /// Register a job and decide whether it is admitted now.
    ///
    /// Re-registering a queued or delayed job re-evaluates it; re-registering a
    /// running job is refused.
    pub fn register_job(&self, id: &str, kind: &str, payload: &JobPayload) -> CoreResult<Admission> {
        self.admit(id, kind, payload, false)
    }

    /// Re-evaluate a job that is being retried.
    ///
    /// Unlike [`register_job`](Self::register_job) this accepts a job the
    /// budget still counts as running: that run is over, so its slot is
    /// released before the retry is gated.
    pub fn readmit(&self, id: &str, kind: &str, payload: &JobPayload) -> CoreResult<Admission> {
        self.admit(id, kind, payload, true)
    }

    fn admit(&self, id: &str, kind: &str, payload: &JobPayload, retry: bool) -> CoreResult<Admission> {
        let id = id.trim();
        if id.is_empty() {
            return Err(SchedulerError::Validation("job id must not be empty".into()));
        }
        let request = payload.perf();
        let metrics = self.sample();

        let admission = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !retry
                && state
                    .jobs
                    .get(id)
                    .is_some_and(|j| j.state == AdmissionState::Running)
            {
                return Err(SchedulerError::InvalidState {
                    id: id.to_string(),
                    reason: "job is already running".into(),
                });
            }
            state.jobs.remove(id);
            state.history.retain(|j| j.id != id);
            state.last_metrics_ok = metrics.ok;

            let verdict = evaluate(
                &state.limits,
                metrics.ok,
                &Usage::from_metrics(&metrics),
                state.counts(),
                &request,
            );
            let (job_state, reason) = match verdict {
                Ok(()) => (AdmissionState::Queued, None),
                Err(reason) => (AdmissionState::Delayed, Some(reason)),
            };
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.jobs.insert(
                id.to_string(),
                BudgetJob {
                    id: id.to_string(),
                    kind: kind.to_string(),
                    request,
                    state: job_state,
                    reason: reason.clone(),
                    sequence,
                    registered_ms: monotonic_ms(),
                    started_ms: None,
                    finished_ms: None,
                },
            );
            Admission {
                id: id.to_string(),
                state: job_state,
                reason,
            }
        };

        match &admission.reason {
            None => {
                tracing::debug!(job = id, kind, retry, "job admitted");
                self.emit("budget.queued", &json!({"id": id, "kind": kind}));
            }
            Some(reason) => {
                tracing::info!(job = id, kind, reason = %reason, "job delayed");
                self.emit("budget.delayed", &json!({"id": id, "kind": kind, "reason": reason}));
            }
        }
        Ok(admission)
    }

    /// Record that a worker started the job.
    pub fn mark_started(&self, id: &str) -> CoreResult<BudgetJob> {
        let job = {
            let mut state = self.state.lock();
            let job = state
                .jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
            if job.state == AdmissionState::Delayed {
                tracing::warn!(job = id, "starting a job the budget still holds delayed");
            }
            job.state = AdmissionState::Running;
            job.reason = None;
            job.started_ms = Some(monotonic_ms());
            job.clone()
        };
        self.emit("budget.started", &json!({"id": id}));
        Ok(job)
    }

    /// Record that the job finished. `error` marks it failed.
    ///
    /// Always re-samples metrics and trims lazy assets if budgets are exceeded.
    pub fn mark_finished(&self, id: &str, error: Option<String>) -> CoreResult<BudgetJob> {
        let job = {
            let mut state = self.state.lock();
            let mut job = state
                .jobs
                .remove(id)
                .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
            job.state = if error.is_some() {
                AdmissionState::Error
            } else {
                AdmissionState::Complete
            };
            job.reason = error;
            job.finished_ms = Some(monotonic_ms());
            state.push_history(job.clone());
            job
        };
        tracing::debug!(job = id, state = ?job.state, "job finished");
        self.emit("budget.finished", &json!({"id": id, "state": job.state}));
        self.auto_trim();
        Ok(job)
    }

    /// Re-evaluate delayed jobs, rate limited by `evaluation_interval_ms`.
    ///
    /// The pass is skipped when the previous one ran less than an interval ago
    /// and jobs are still delayed.
    pub fn refresh_queue(&self) -> RefreshOutcome {
        self.refresh(false)
    }

    /// Re-evaluate delayed jobs now, ignoring the rate limit.
    pub fn force_refresh(&self) -> RefreshOutcome {
        self.refresh(true)
    }

    fn refresh(&self, force: bool) -> RefreshOutcome {
        let now = Instant::now();
        {
            let state = self.state.lock();
            let interval = Duration::from_millis(state.limits.evaluation_interval_ms);
            let recent = state
                .last_refresh
                .is_some_and(|last| now.duration_since(last) < interval);
            let counts = state.counts();
            if !force && recent && counts.delayed > 0 {
                tracing::trace!("refresh skipped; evaluation interval not elapsed");
                return RefreshOutcome {
                    skipped: true,
                    still_delayed: counts.delayed,
                    ..RefreshOutcome::default()
                };
            }
        }

        let metrics = self.sample();
        let (mut outcome, target) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.last_refresh = Some(now);
            state.last_metrics_ok = metrics.ok;

            let mut delayed: Vec<(u64, String)> = state
                .jobs
                .values()
                .filter(|j| j.state == AdmissionState::Delayed)
                .map(|j| (j.sequence, j.id.clone()))
                .collect();
            delayed.sort_unstable();

            let mut usage = Usage::from_metrics(&metrics);
            let mut outcome = RefreshOutcome::default();
            for (_, id) in delayed {
                let mut counts = state.counts();
                counts.delayed -= 1;
                let Some(job) = state.jobs.get_mut(&id) else {
                    continue;
                };
                match evaluate(&state.limits, metrics.ok, &usage, counts, &job.request) {
                    Ok(()) => {
                        usage.add(&job.request);
                        job.state = AdmissionState::Queued;
                        job.reason = None;
                        outcome.promoted.push(id);
                    }
                    Err(reason) => {
                        job.reason = Some(reason);
                        outcome.still_delayed += 1;
                    }
                }
            }
            (outcome, trim_target(&state.limits, &metrics))
        };

        for id in &outcome.promoted {
            tracing::info!(job = %id, "delayed job promoted to queued");
            self.emit("budget.promoted", &json!({"id": id}));
        }
        if target > 0.0 {
            outcome.evicted_mb = self.evict_lazy_assets(target).freed_mb;
        }
        outcome
    }

    fn auto_trim(&self) -> f64 {
        let metrics = self.sample();
        let target = {
            let mut state = self.state.lock();
            state.last_metrics_ok = metrics.ok;
            trim_target(&state.limits, &metrics)
        };
        if target > 0.0 {
            tracing::info!(target_mb = target, "memory budget exceeded; trimming lazy assets");
            self.evict_lazy_assets(target).freed_mb
        } else {
            0.0
        }
    }

    /// Register a lazy asset. It starts loaded.
    pub fn register_asset(&self, name: &str, size_mb: f64, unload: Option<UnloadFn>) -> CoreResult<AssetInfo> {
        let info = self.state.lock().assets.register(name, size_mb, unload)?;
        tracing::debug!(asset = %info.name, size_mb, "lazy asset registered");
        Ok(info)
    }

    /// Mark an asset as just used.
    pub fn touch_asset(&self, name: &str) -> CoreResult<AssetInfo> {
        self.state.lock().assets.touch(name)
    }

    /// Forget an asset.
    pub fn unregister_asset(&self, name: &str) -> CoreResult<AssetInfo> {
        self.state.lock().assets.unregister(name)
    }

    /// Fallback unload callback for assets registered without one.
    pub fn set_global_unload(&self, unload: Option<UnloadFn>) {
        self.state.lock().assets.set_global_unload(unload);
    }

    /// Registered assets, least recently used first.
    pub fn assets(&self) -> Vec<AssetInfo> {
        self.state.lock().assets.list()
    }

    /// Unload least recently used assets until at least `target_mb` is freed
    /// or no loaded assets remain.
    ///
    /// Callbacks run without the lock held. A failing callback leaves its asset
    /// loaded and eviction continues with the next one.
    pub fn evict_lazy_assets(&self, target_mb: f64) -> EvictionReport {
        let mut report = EvictionReport {
            requested_mb: target_mb,
            ..EvictionReport::default()
        };
        let mut attempted = HashSet::new();
        while report.freed_mb < target_mb {
            let Some(victim) = self.state.lock().assets.next_victim(&attempted) else {
                break;
            };
            attempted.insert(victim.name.clone());
            if !run_unload(victim.unload.as_ref(), &victim.name) {
                report.failed.push(victim.name);
                continue;
            }
            if self
                .state
                .lock()
                .assets
                .mark_unloaded(&victim.name, victim.last_used_ms)
            {
                report.freed_mb += victim.size_mb;
                tracing::info!(asset = %victim.name, size_mb = victim.size_mb, "lazy asset evicted");
                self.emit(
                    "asset.evicted",
                    &json!({"name": victim.name, "size_mb": victim.size_mb}),
                );
                report.evicted.push(victim.name);
            }
        }
        if report.freed_mb < target_mb && target_mb > 0.0 {
            tracing::warn!(
                target_mb,
                freed_mb = report.freed_mb,
                "could not free the requested memory"
            );
        }
        report
    }

    /// Job by id, active or finished.
    pub fn get(&self, id: &str) -> Option<BudgetJob> {
        let state = self.state.lock();
        state
            .jobs
            .get(id)
            .cloned()
            .or_else(|| state.history.iter().rev().find(|j| j.id == id).cloned())
    }

    /// Full view. Samples metrics and trims assets when budgets are exceeded.
    pub fn snapshot(&self) -> BudgetSnapshot {
        let evicted_mb = self.auto_trim();
        let metrics = self.sample();
        let state = self.state.lock();
        let mut jobs: Vec<BudgetJob> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.sequence);
        BudgetSnapshot {
            limits: state.limits.clone(),
            metrics,
            jobs,
            finished: state.history.len(),
            assets: state.assets.list(),
            evicted_mb,
        }
    }

    /// Counts only; cheap enough to poll.
    pub fn health(&self) -> BudgetHealth {
        let state = self.state.lock();
        let counts = state.counts();
        BudgetHealth {
            metrics_ok: state.last_metrics_ok,
            queued: counts.queued,
            delayed: counts.delayed,
            running: counts.running,
            finished: state.history.len(),
            max_running_jobs: state.limits.max_running_jobs,
            loaded_assets: state.assets.loaded_count(),
            loaded_asset_mb: state.assets.loaded_mb(),
        }
    }

    fn emit(&self, name: &str, payload: &Value) {
        emit_safely(self.events.as_ref(), name, payload);
    }
}
