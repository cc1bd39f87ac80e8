//! Error types for scheduler, budget, and registry operations.

use thiserror::Error;

/// Errors produced by core components.
///
/// Admission denial is not represented here: a job that does not fit the
/// budget is returned as `delayed`, never as an error.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No job with this id is known.
    #[error("job not found: {0}")]
    JobNotFound(String),
    /// No provider with this id is registered.
    #[error("provider not found: {0}")]
    ProviderNotFound(String),
    /// No lazy asset with this name is registered.
    #[error("asset not found: {0}")]
    AssetNotFound(String),
    /// Malformed job or provider specification.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Operation is not allowed in the entity's current state.
    #[error("invalid state for {id}: {reason}")]
    InvalidState {
        /// Entity identifier.
        id: String,
        /// Why the operation was refused.
        reason: String,
    },
    /// The provider may be deactivated but never removed.
    #[error("provider `{0}` is protected and cannot be removed")]
    ProtectedProvider(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// Whether this error reports an unknown id.
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::JobNotFound(_) | Self::ProviderNotFound(_) | Self::AssetNotFound(_)
        )
    }
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, SchedulerError>;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
