//! Configuration models for budgets, scheduling, and device advice.

pub mod budget;
pub mod scheduler;

pub use self::budget::{BudgetLimits, BudgetLimitsUpdate};
pub use self::scheduler::{AdvisorThresholds, CoreConfig, SchedulerConfig};

use std::str::FromStr;

/// Read and parse an optional environment variable.
pub(crate) fn env_parse<T>(key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{key}: cannot parse `{raw}`: {e}")),
        Err(_) => Ok(None),
    }
}
