//! Budget limits gating job admission.

use serde::{Deserialize, Serialize};

use super::env_parse;

/// Process-wide admission limits. Hot-reloadable through
/// [`BudgetManager::configure`](crate::core::BudgetManager::configure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetLimits {
    /// Maximum host CPU percent (current + requested).
    pub max_cpu_percent: f64,
    /// Maximum host RAM in MB; 0 = unlimited.
    pub max_ram_mb: f64,
    /// Maximum VRAM on the first GPU in MB; 0 = unlimited.
    pub max_vram_mb: f64,
    /// Maximum concurrently running jobs.
    pub max_running_jobs: usize,
    /// Maximum queued + delayed + running jobs.
    pub max_queue_depth: usize,
    /// Extra headroom freed on top of any shortfall when trimming lazy assets.
    pub lazy_asset_target_mb: f64,
    /// Minimum time between delayed-job re-evaluations while jobs are still delayed.
    pub evaluation_interval_ms: u64,
    /// Finished jobs retained for inspection.
    pub history_limit: usize,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_cpu_percent: 90.0,
            max_ram_mb: 0.0,
            max_vram_mb: 0.0,
            max_running_jobs: num_cpus::get().max(1),
            max_queue_depth: 256,
            lazy_asset_target_mb: 512.0,
            evaluation_interval_ms: 1_000,
            history_limit: 200,
        }
    }
}

impl BudgetLimits {
    /// Validate limit values.
    pub fn validate(&self) -> Result<(), String> {
        if !self.max_cpu_percent.is_finite() || self.max_cpu_percent <= 0.0 {
            return Err("max_cpu_percent must be greater than 0".into());
        }
        for (name, value) in [
            ("max_ram_mb", self.max_ram_mb),
            ("max_vram_mb", self.max_vram_mb),
            ("lazy_asset_target_mb", self.lazy_asset_target_mb),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be a non-negative number"));
            }
        }
        if self.max_running_jobs == 0 {
            return Err("max_running_jobs must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse limits from a JSON string and validate. Missing fields take defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let limits: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        limits.validate()?;
        Ok(limits)
    }

    /// Defaults overridden by `BROKER_*` environment variables (a `.env` file is honoured).
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let update = BudgetLimitsUpdate {
            max_cpu_percent: env_parse("BROKER_MAX_CPU_PERCENT")?,
            max_ram_mb: env_parse("BROKER_MAX_RAM_MB")?,
            max_vram_mb: env_parse("BROKER_MAX_VRAM_MB")?,
            max_running_jobs: env_parse("BROKER_MAX_RUNNING_JOBS")?,
            max_queue_depth: env_parse("BROKER_MAX_QUEUE_DEPTH")?,
            lazy_asset_target_mb: env_parse("BROKER_LAZY_ASSET_TARGET_MB")?,
            evaluation_interval_ms: env_parse("BROKER_EVALUATION_INTERVAL_MS")?,
            history_limit: env_parse("BROKER_HISTORY_LIMIT")?,
        };
        let limits = Self::default().merged(&update);
        limits.validate()?;
        Ok(limits)
    }

    /// Copy with every field present in `update` replaced.
    #[must_use]
    pub fn merged(&self, update: &BudgetLimitsUpdate) -> Self {
        Self {
            max_cpu_percent: update.max_cpu_percent.unwrap_or(self.max_cpu_percent),
            max_ram_mb: update.max_ram_mb.unwrap_or(self.max_ram_mb),
            max_vram_mb: update.max_vram_mb.unwrap_or(self.max_vram_mb),
            max_running_jobs: update.max_running_jobs.unwrap_or(self.max_running_jobs),
            max_queue_depth: update.max_queue_depth.unwrap_or(self.max_queue_depth),
            lazy_asset_target_mb: update.lazy_asset_target_mb.unwrap_or(self.lazy_asset_target_mb),
            evaluation_interval_ms: update
                .evaluation_interval_ms
                .unwrap_or(self.evaluation_interval_ms),
            history_limit: update.history_limit.unwrap_or(self.history_limit),
        }
    }
}

/// Partial update applied by hot reload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetLimitsUpdate {
    /// New CPU limit.
    pub max_cpu_percent: Option<f64>,
    /// New RAM limit.
    pub max_ram_mb: Option<f64>,
    /// New VRAM limit.
    pub max_vram_mb: Option<f64>,
    /// New running-job cap.
    pub max_running_jobs: Option<usize>,
    /// New depth cap.
    pub max_queue_depth: Option<usize>,
    /// New eviction headroom.
    pub lazy_asset_target_mb: Option<f64>,
    /// New evaluation interval.
    pub evaluation_interval_ms: Option<u64>,
    /// New history cap.
    pub history_limit: Option<usize>,
}
