//! Tests for builder modules

use std::sync::Arc;

use prometheus_compute_broker::builders::ComputeCoreBuilder;
use prometheus_compute_broker::config::CoreConfig;
use prometheus_compute_broker::core::{
    InMemoryEventSink, JobQueue, JobSpec, MetricsSnapshot, PerfEstimate, ProviderMeta,
    ProviderSpec, StaticMetrics,
};
use prometheus_compute_broker::util::generate_job_id;

fn temp_catalog_path() -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("broker-builder-{}", generate_job_id()))
        .join("providers.json")
}

#[test]
fn test_builder_shares_registry_with_scheduler() {
    let core = ComputeCoreBuilder::new(CoreConfig::default())
        .with_metrics(Arc::new(StaticMetrics::new(MetricsSnapshot::host(0.0, 0.0, 0.0))))
        .build()
        .expect("build core");
    core.registry
        .register(ProviderSpec::remote("farm").with_meta(ProviderMeta {
            cost_per_minute: Some(2.0),
            ..ProviderMeta::default()
        }))
        .unwrap();
    let preview = core
        .scheduler
        .preview_cost(
            &JobSpec::new("p")
                .with_queue("remote")
                .with_provider("farm")
                .with_duration_sec(30.0),
        )
        .unwrap();
    assert!((preview.base_cost - 1.0).abs() < 1e-9);
}

#[test]
fn test_builder_wires_event_sink_everywhere() {
    let sink = Arc::new(InMemoryEventSink::new(32));
    let core = ComputeCoreBuilder::new(CoreConfig::default())
        .with_metrics(Arc::new(StaticMetrics::new(MetricsSnapshot::host(0.0, 0.0, 0.0))))
        .with_events(sink.clone())
        .build()
        .expect("build core");
    core.dispatcher.submit(JobSpec::new("a")).unwrap();
    core.registry.register(ProviderSpec::remote("farm")).unwrap();
    let names = sink.names();
    assert!(names.iter().any(|n| n == "budget.queued"));
    assert!(names.iter().any(|n| n == "job.enqueued"));
    assert!(names.iter().any(|n| n == "provider.registered"));
}

#[test]
fn test_builder_without_metrics_is_conservative() {
    let core = ComputeCoreBuilder::new(CoreConfig::default()).build().expect("build core");
    let hungry = core
        .dispatcher
        .submit(JobSpec::new("hungry").with_perf(PerfEstimate::new(5.0, 0.0, 0.0)))
        .unwrap();
    assert!(hungry.job.is_none());
    assert!(core.dispatcher.submit(JobSpec::new("light")).unwrap().job.is_some());
    assert_eq!(core.scheduler.depth(JobQueue::Local), 1);
}

#[test]
fn test_builder_persists_catalog_to_providers_path() {
    let path = temp_catalog_path();
    let config = CoreConfig {
        providers_path: Some(path.to_string_lossy().into_owned()),
        ..CoreConfig::default()
    };
    let first = ComputeCoreBuilder::new(config.clone()).build().expect("build core");
    first.registry.register(ProviderSpec::remote("Lan Box")).unwrap();
    drop(first);

    let second = ComputeCoreBuilder::new(config).build().expect("rebuild core");
    assert!(second.registry.get("lan-box").is_some());
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_builder_loads_json_config_file() {
    let path = temp_catalog_path().with_file_name("broker.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{"budget": {"max_running_jobs": 3, "max_queue_depth": 7}}"#).unwrap();

    let core = ComputeCoreBuilder::from_json_file(&path)
        .expect("load config")
        .with_metrics(Arc::new(StaticMetrics::new(MetricsSnapshot::host(0.0, 0.0, 0.0))))
        .build()
        .expect("build core");
    assert_eq!(core.config.budget.max_running_jobs, 3);
    assert_eq!(core.budget.limits().max_queue_depth, 7);
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_builder_config_errors_carry_context() {
    let missing = temp_catalog_path().with_file_name("absent.json");
    let err = ComputeCoreBuilder::from_json_file(&missing).err().expect("missing file");
    assert!(format!("{err:#}").contains("reading broker configuration"));

    let path = temp_catalog_path().with_file_name("broken.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{"budget": {"max_running_jobs": 0}}"#).unwrap();
    let err = ComputeCoreBuilder::from_json_file(&path).err().expect("invalid limits");
    let message = format!("{err:#}");
    assert!(message.contains("parsing broker configuration"));
    assert!(message.contains("max_running_jobs"));
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
