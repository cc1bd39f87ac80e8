//! API-facing request/response models.

use serde::{Deserialize, Serialize};

use crate::core::{Admission, Advice, BudgetHealth, Job, RefreshOutcome};

/// Result of submitting a job through the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    /// Job id, generated when the spec had none.
    pub id: String,
    /// Admission decision.
    pub admission: Admission,
    /// The queued job; `None` while the job is delayed.
    pub job: Option<Job>,
    /// Advisor output for `auto` submissions.
    pub advice: Option<Advice>,
}

/// Result of a dispatcher refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchRefresh {
    /// Budget re-evaluation outcome.
    pub refresh: RefreshOutcome,
    /// Promoted jobs that reached a queue.
    pub enqueued: Vec<String>,
    /// Promoted jobs the scheduler rejected.
    pub failed: Vec<String>,
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreHealth {
    /// Healthy flag: metrics are flowing.
    pub ok: bool,
    /// Budget counters.
    pub budget: BudgetHealth,
    /// Jobs waiting on the local queue.
    pub local_depth: usize,
    /// Jobs waiting on the remote queue.
    pub remote_depth: usize,
    /// Delayed specs held by the dispatcher.
    pub parked: usize,
    /// Registered providers.
    pub providers: usize,
    /// Whether any remote provider can take work.
    pub remote_available: bool,
}
