//! Dispatcher: the gate-then-enqueue path in front of the scheduler.
//!
//! `submit` asks the budget manager first and only enqueues admitted jobs.
//! Delayed specs are parked here until a refresh promotes them. Claim,
//! completion, and failure are mirrored into the budget so running-job
//! accounting stays in step with the scheduler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::AdvisorThresholds;
use crate::core::{
    choose_device_with, Admission, AdmissionState, AdvisorContext, BudgetManager,
    CompletionReport, CoreResult, DeviceDecision, DeviceRequest, Job, JobQueue, JobScheduler,
    JobSpec, JobStatus, MetricsProvider, ProviderRegistry, SchedulerError,
};
use crate::runtime::api::{CoreHealth, DispatchRefresh, SubmitOutcome};
use crate::util::ids::generate_job_id;

/// Work held back by the budget.
enum Parked {
    /// A new submission, not yet known to the scheduler.
    Fresh(JobSpec),
    /// A retry of a job the scheduler already holds.
    Retry { priority: Option<i64> },
}

#[derive(Default)]
struct DispatchState {
    parked: HashMap<String, Parked>,
    /// Ids between their duplicate check and their enqueue or park.
    inflight: HashSet<String>,
}

/// Holds an id in `inflight` until dropped.
struct Reservation<'a> {
    state: &'a Mutex<DispatchState>,
    id: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.state.lock().inflight.remove(&self.id);
    }
}

/// Front door combining admission, routing, and queueing.
pub struct Dispatcher {
    scheduler: Arc<JobScheduler>,
    budget: Arc<BudgetManager>,
    registry: Arc<ProviderRegistry>,
    metrics: Arc<dyn MetricsProvider>,
    thresholds: AdvisorThresholds,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    /// Wire a dispatcher over existing components.
    pub fn new(
        scheduler: Arc<JobScheduler>,
        budget: Arc<BudgetManager>,
        registry: Arc<ProviderRegistry>,
        metrics: Arc<dyn MetricsProvider>,
        thresholds: AdvisorThresholds,
    ) -> Self {
        Self {
            scheduler,
            budget,
            registry,
            metrics,
            thresholds,
            state: Mutex::new(DispatchState::default()),
        }
    }

    /// Live context for the advisor.
    pub fn advisor_context(&self) -> AdvisorContext {
        let metrics = self.metrics.snapshot();
        let gpu = metrics.first_gpu().filter(|_| metrics.ok);
        AdvisorContext {
            has_local_gpu: gpu.is_some(),
            local_queue_depth: self.scheduler.depth(JobQueue::Local),
            local_vram_gb: gpu.map_or(0.0, |g| g.mem_free_mb() / 1024.0),
            remote_available: self.registry.remote_available(),
            remote_queue_depth: self.scheduler.depth(JobQueue::Remote),
        }
    }

    /// Claim `id` for one submit or retry. Fails while it is parked, while
    /// another caller holds it, or when `live` rejects the scheduler record.
    fn reserve(
        &self,
        id: &str,
        live: impl FnOnce(Option<&Job>) -> CoreResult<()>,
    ) -> CoreResult<Reservation<'_>> {
        let mut state = self.state.lock();
        if state.parked.contains_key(id) {
            return Err(SchedulerError::InvalidState {
                id: id.to_string(),
                reason: "job is waiting for admission".into(),
            });
        }
        if state.inflight.contains(id) {
            return Err(SchedulerError::InvalidState {
                id: id.to_string(),
                reason: "job is already being dispatched".into(),
            });
        }
        live(self.scheduler.get(id).as_ref())?;
        state.inflight.insert(id.to_string());
        Ok(Reservation {
            state: &self.state,
            id: id.to_string(),
        })
    }

    /// Route, gate, and enqueue a job.
    ///
    /// `queue = "auto"` is resolved through the advisor; a remote decision
    /// without a provider picks the preferred available remote provider.
    pub fn submit(&self, mut spec: JobSpec) -> CoreResult<SubmitOutcome> {
        spec.validate()?;
        let id = spec
            .id
            .as_deref()
            .map_or_else(generate_job_id, |id| id.trim().to_string());
        spec.id = Some(id.clone());

        let reservation = self
            .reserve(&id, |job| match job {
                Some(job) if !job.status.is_terminal() => Err(SchedulerError::Validation(
                    format!("job `{id}` is already submitted"),
                )),
                _ => Ok(()),
            })
            .map_err(|e| match e {
                SchedulerError::InvalidState { .. } => {
                    SchedulerError::Validation(format!("job `{id}` is already submitted"))
                }
                other => other,
            })?;

        let advice = spec.wants_auto_queue().then(|| {
            let advice = choose_device_with(
                &DeviceRequest::from_spec(&spec),
                &self.advisor_context(),
                &self.thresholds,
            );
            let queue = if advice.decision == DeviceDecision::Remote {
                if spec.provider_id.is_none() {
                    spec.provider_id = self.registry.best_remote().map(|p| p.id);
                }
                JobQueue::Remote
            } else {
                JobQueue::Local
            };
            tracing::debug!(job = %id, decision = %advice.decision, reason = %advice.reason, "auto queue resolved");
            spec.queue = Some(queue.to_string());
            advice
        });

        let kind = spec.queue.clone().unwrap_or_else(|| JobQueue::Local.to_string());
        let admission = self.budget.register_job(&id, &kind, &spec.payload)?;
        if !admission.is_admitted() {
            self.state.lock().parked.insert(id.clone(), Parked::Fresh(spec));
            drop(reservation);
            return Ok(SubmitOutcome {
                id,
                admission,
                job: None,
                advice,
            });
        }

        let job = self.enqueue_admitted(spec);
        drop(reservation);
        Ok(SubmitOutcome {
            id,
            admission,
            job: Some(job?),
            advice,
        })
    }

    fn enqueue_admitted(&self, spec: JobSpec) -> CoreResult<Job> {
        let id = spec.id.clone().unwrap_or_default();
        self.scheduler.enqueue(spec).inspect_err(|e| {
            tracing::warn!(job = %id, "enqueue after admission failed: {e}");
            self.release(&id, Some(e.to_string()));
        })
    }

    fn requeue_admitted(&self, id: &str, priority: Option<i64>) -> CoreResult<Job> {
        self.scheduler.requeue(id, priority).inspect_err(|e| {
            tracing::warn!(job = id, "requeue after admission failed: {e}");
            self.release(id, Some(e.to_string()));
        })
    }

    /// Re-evaluate delayed jobs and enqueue the promoted ones.
    pub fn refresh(&self) -> DispatchRefresh {
        let refresh = self.budget.refresh_queue();
        let mut report = DispatchRefresh {
            refresh,
            ..DispatchRefresh::default()
        };
        for id in &report.refresh.promoted {
            let (parked, _reservation) = {
                let mut state = self.state.lock();
                let Some(parked) = state.parked.remove(id) else {
                    continue;
                };
                state.inflight.insert(id.clone());
                (
                    parked,
                    Reservation {
                        state: &self.state,
                        id: id.clone(),
                    },
                )
            };
            let result = match parked {
                Parked::Fresh(spec) => self.enqueue_admitted(spec),
                Parked::Retry { priority } => self.requeue_admitted(id, priority),
            };
            match result {
                Ok(_) => report.enqueued.push(id.clone()),
                Err(_) => report.failed.push(id.clone()),
            }
        }
        report
    }

    /// Claim the best job on `queue` and mark it started in the budget.
    ///
    /// A job the budget has no record of (enqueued on the scheduler directly)
    /// is registered on the spot so it still counts against the running cap.
    pub fn claim(&self, queue: JobQueue, worker_id: &str, device_id: Option<&str>) -> Option<Job> {
        let job = self.scheduler.claim(queue, worker_id, device_id)?;
        let started = match self.budget.mark_started(&job.id) {
            Err(e) if e.is_not_found() => {
                tracing::debug!(job = %job.id, "claimed job unknown to budget; registering");
                self.budget
                    .readmit(&job.id, job.queue.as_str(), &job.payload)
                    .and_then(|_| self.budget.mark_started(&job.id))
            }
            other => other,
        };
        if let Err(e) = started {
            tracing::warn!(job = %job.id, "claimed job not tracked by budget: {e}");
        }
        Some(job)
    }

    /// Complete a job, release its budget, and admit waiting work.
    pub fn complete(&self, id: &str, report: CompletionReport) -> CoreResult<Job> {
        let job = self.scheduler.complete(id, report)?;
        self.state.lock().parked.remove(id);
        self.release(id, None);
        self.refresh();
        Ok(job)
    }

    /// Fail a job, release its budget, and admit waiting work.
    pub fn fail(&self, id: &str, error: Option<String>) -> CoreResult<Job> {
        let job = self.scheduler.fail(id, error.clone())?;
        self.state.lock().parked.remove(id);
        self.release(id, Some(error.unwrap_or_else(|| "failed".into())));
        self.refresh();
        Ok(job)
    }

    /// Retry a job through the budget gate.
    ///
    /// A job that is already queued comes back unchanged. Otherwise the budget
    /// re-evaluates it: an admitted retry is requeued at once, a delayed one is
    /// parked and requeued when a refresh promotes it.
    pub fn requeue(&self, id: &str, priority: Option<i64>) -> CoreResult<SubmitOutcome> {
        let reservation = self.reserve(id, |job| match job {
            Some(_) => Ok(()),
            None => Err(SchedulerError::JobNotFound(id.to_string())),
        })?;
        let current = self
            .scheduler
            .get(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;

        if current.status == JobStatus::Queued {
            let job = self.scheduler.requeue(id, priority)?;
            return Ok(SubmitOutcome {
                id: id.to_string(),
                admission: Admission {
                    id: id.to_string(),
                    state: AdmissionState::Queued,
                    reason: None,
                },
                job: Some(job),
                advice: None,
            });
        }

        let admission = self
            .budget
            .readmit(id, current.queue.as_str(), &current.payload)?;
        if !admission.is_admitted() {
            self.state
                .lock()
                .parked
                .insert(id.to_string(), Parked::Retry { priority });
            drop(reservation);
            return Ok(SubmitOutcome {
                id: id.to_string(),
                admission,
                job: None,
                advice: None,
            });
        }

        let job = self.requeue_admitted(id, priority);
        drop(reservation);
        Ok(SubmitOutcome {
            id: id.to_string(),
            admission,
            job: Some(job?),
            advice: None,
        })
    }

    /// Cancel a parked, queued, or running job. Returns the scheduler record,
    /// or `None` when a new submission never left the parking lot. Canceling a
    /// parked retry drops the retry.
    pub fn cancel(&self, id: &str) -> CoreResult<Option<Job>> {
        let parked = self.state.lock().parked.remove(id);
        match parked {
            Some(Parked::Fresh(_)) => {
                self.release(id, Some("canceled".into()));
                Ok(None)
            }
            Some(Parked::Retry { .. }) => {
                self.release(id, Some("canceled".into()));
                // A finished job waiting on a retry keeps its final status.
                let job = match self.scheduler.cancel(id) {
                    Err(SchedulerError::InvalidState { .. }) => self.scheduler.get(id),
                    other => Some(other?),
                };
                self.refresh();
                Ok(job)
            }
            None => {
                let job = self.scheduler.cancel(id)?;
                self.release(id, Some("canceled".into()));
                self.refresh();
                Ok(Some(job))
            }
        }
    }

    /// Jobs waiting for admission, by id.
    pub fn parked(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().parked.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cheap aggregate health.
    pub fn health(&self) -> CoreHealth {
        let budget = self.budget.health();
        CoreHealth {
            ok: budget.metrics_ok,
            budget,
            local_depth: self.scheduler.depth(JobQueue::Local),
            remote_depth: self.scheduler.depth(JobQueue::Remote),
            parked: self.state.lock().parked.len(),
            providers: self.registry.list().len(),
            remote_available: self.registry.remote_available(),
        }
    }

    fn release(&self, id: &str, error: Option<String>) {
        if let Err(e) = self.budget.mark_finished(id, error) {
            tracing::debug!(job = id, "budget had no record to release: {e}");
        }
    }
}
