//! Tests for error types

use prometheus_compute_broker::core::SchedulerError;

#[test]
fn test_job_not_found_error() {
    let err = SchedulerError::JobNotFound("job-1".to_string());
    assert_eq!(format!("{err}"), "job not found: job-1");
    assert!(err.is_not_found());
}

#[test]
fn test_validation_error() {
    let err = SchedulerError::Validation("job id must not be empty".to_string());
    assert_eq!(format!("{err}"), "validation failed: job id must not be empty");
    assert!(!err.is_not_found());
}

#[test]
fn test_invalid_state_error() {
    let err = SchedulerError::InvalidState {
        id: "job-1".to_string(),
        reason: "job already finished".to_string(),
    };
    assert_eq!(format!("{err}"), "invalid state for job-1: job already finished");
}

#[test]
fn test_protected_provider_error() {
    let err = SchedulerError::ProtectedProvider("local".to_string());
    assert_eq!(
        format!("{err}"),
        "provider `local` is protected and cannot be removed"
    );
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("disk full".to_string());
    assert_eq!(format!("{err}"), "backend error: disk full");
}

#[test]
fn test_not_found_covers_every_entity() {
    assert!(SchedulerError::ProviderNotFound("p".into()).is_not_found());
    assert!(SchedulerError::AssetNotFound("a".into()).is_not_found());
}
