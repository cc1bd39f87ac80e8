//! Tests for configuration validation

use prometheus_compute_broker::config::{
    AdvisorThresholds, BudgetLimits, BudgetLimitsUpdate, CoreConfig, SchedulerConfig,
};

#[test]
fn test_budget_defaults_are_valid() {
    let limits = BudgetLimits::default();
    assert!(limits.validate().is_ok());
    assert!(limits.max_running_jobs >= 1);
    assert!(limits.max_ram_mb.abs() < f64::EPSILON);
}

#[test]
fn test_budget_invalid_running_cap() {
    let invalid = BudgetLimits {
        max_running_jobs: 0,
        ..BudgetLimits::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_budget_invalid_cpu_limit() {
    let invalid = BudgetLimits {
        max_cpu_percent: f64::NAN,
        ..BudgetLimits::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_budget_negative_memory_limit() {
    let invalid = BudgetLimits {
        max_vram_mb: -1.0,
        ..BudgetLimits::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_budget_from_json_fills_defaults() {
    let limits = BudgetLimits::from_json_str(r#"{"max_running_jobs": 2, "max_ram_mb": 8192}"#)
        .expect("parse limits");
    assert_eq!(limits.max_running_jobs, 2);
    assert!((limits.max_ram_mb - 8192.0).abs() < f64::EPSILON);
    assert_eq!(limits.max_queue_depth, BudgetLimits::default().max_queue_depth);
}

#[test]
fn test_budget_from_json_rejects_invalid() {
    assert!(BudgetLimits::from_json_str(r#"{"max_queue_depth": 0}"#).is_err());
    assert!(BudgetLimits::from_json_str("not json").is_err());
}

#[test]
fn test_budget_merge_only_touches_given_fields() {
    let base = BudgetLimits::default();
    let merged = base.merged(&BudgetLimitsUpdate {
        max_running_jobs: Some(1),
        ..BudgetLimitsUpdate::default()
    });
    assert_eq!(merged.max_running_jobs, 1);
    assert!((merged.max_cpu_percent - base.max_cpu_percent).abs() < f64::EPSILON);
    assert_eq!(merged.evaluation_interval_ms, base.evaluation_interval_ms);
}

#[test]
fn test_scheduler_config_validation() {
    assert!(SchedulerConfig::default().validate().is_ok());
    let invalid = SchedulerConfig {
        history_limit: 0,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
    let negative_rate = SchedulerConfig {
        remote_default_cost_per_minute: -0.1,
        ..SchedulerConfig::default()
    };
    assert!(negative_rate.validate().is_err());
}

#[test]
fn test_advisor_thresholds_default_valid() {
    let thresholds = AdvisorThresholds::default();
    assert!(thresholds.validate().is_ok());
    assert!(thresholds.tiny_work_size < thresholds.large_work_size);
}

#[test]
fn test_core_config_from_json() {
    let cfg = CoreConfig::from_json_str(
        r#"{
            "budget": {"max_running_jobs": 3},
            "scheduler": {"history_limit": 50},
            "providers_path": "/tmp/providers.json"
        }"#,
    )
    .expect("parse core config");
    assert_eq!(cfg.budget.max_running_jobs, 3);
    assert_eq!(cfg.scheduler.history_limit, 50);
    assert_eq!(cfg.providers_path.as_deref(), Some("/tmp/providers.json"));
}

#[test]
fn test_core_config_reports_section() {
    let err = CoreConfig::from_json_str(r#"{"scheduler": {"history_limit": 0}}"#).unwrap_err();
    assert!(err.contains("scheduler invalid"));
}
