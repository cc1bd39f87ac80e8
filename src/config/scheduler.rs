//! Scheduler, advisor, and root configuration.

use serde::{Deserialize, Serialize};

use super::{env_parse, BudgetLimits};
use crate::core::cost::DEFAULT_REMOTE_COST_PER_MINUTE;

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Terminal jobs kept in history; the oldest is evicted beyond this.
    pub history_limit: usize,
    /// Base rate for remote jobs whose provider publishes none.
    pub remote_default_cost_per_minute: f64,
    /// Default number of finished entries on the board.
    pub board_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            history_limit: 200,
            remote_default_cost_per_minute: DEFAULT_REMOTE_COST_PER_MINUTE,
            board_limit: 100,
        }
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.history_limit == 0 {
            return Err("history_limit must be greater than 0".into());
        }
        if !self.remote_default_cost_per_minute.is_finite() || self.remote_default_cost_per_minute < 0.0 {
            return Err("remote_default_cost_per_minute must be a non-negative number".into());
        }
        Ok(())
    }
}

/// Thresholds for the device advisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorThresholds {
    /// VRAM shortfall (GB) tolerated before a job leaves the local GPU.
    pub vram_margin_gb: f64,
    /// Work size (pixels) at or above which a job is large.
    pub large_work_size: u64,
    /// Work size (pixels) at or below which a job is tiny.
    pub tiny_work_size: u64,
    /// Local queue depth at which remote offload starts.
    pub busy_queue_depth: usize,
    /// Local queue depth at which jobs fall back to CPU when no remote exists.
    pub saturated_queue_depth: usize,
}

impl Default for AdvisorThresholds {
    fn default() -> Self {
        Self {
            vram_margin_gb: 0.5,
            large_work_size: 2048 * 2048,
            tiny_work_size: 256 * 256,
            busy_queue_depth: 4,
            saturated_queue_depth: 8,
        }
    }
}

impl AdvisorThresholds {
    /// Validate threshold ordering.
    pub fn validate(&self) -> Result<(), String> {
        if self.tiny_work_size >= self.large_work_size {
            return Err("tiny_work_size must be below large_work_size".into());
        }
        if self.saturated_queue_depth < self.busy_queue_depth {
            return Err("saturated_queue_depth must be at least busy_queue_depth".into());
        }
        if !self.vram_margin_gb.is_finite() || self.vram_margin_gb < 0.0 {
            return Err("vram_margin_gb must be a non-negative number".into());
        }
        Ok(())
    }
}

/// Root configuration for a compute core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Admission limits.
    pub budget: BudgetLimits,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Advisor thresholds.
    pub advisor: AdvisorThresholds,
    /// Provider catalog file; in-memory when absent.
    pub providers_path: Option<String>,
}

impl CoreConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.budget.validate().map_err(|e| format!("budget invalid: {e}"))?;
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        self.advisor.validate().map_err(|e| format!("advisor invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `BROKER_*` environment variables.
    pub fn from_env() -> Result<Self, String> {
        let mut cfg = Self {
            budget: BudgetLimits::from_env()?,
            ..Self::default()
        };
        if let Some(limit) = env_parse("BROKER_SCHEDULER_HISTORY_LIMIT")? {
            cfg.scheduler.history_limit = limit;
        }
        if let Some(rate) = env_parse("BROKER_REMOTE_DEFAULT_COST_PER_MINUTE")? {
            cfg.scheduler.remote_default_cost_per_minute = rate;
        }
        cfg.providers_path = env_parse("BROKER_PROVIDERS_PATH")?;
        cfg.validate()?;
        Ok(cfg)
    }
}
