//! Tests for runtime glue: API models and the tokio maintenance tasks

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus_compute_broker::config::{BudgetLimits, CoreConfig};
use prometheus_compute_broker::builders::ComputeCoreBuilder;
use prometheus_compute_broker::core::{
    JobQueue, JobSpec, MetricsSnapshot, PerfEstimate, Provider, ProviderSpec, StaticMetrics,
};
use prometheus_compute_broker::runtime::{spawn_health_monitor, spawn_maintenance, HealthProbe};

struct AlwaysDown;

#[async_trait]
impl HealthProbe for AlwaysDown {
    async fn probe(&self, _provider: &Provider) -> Result<(), String> {
        Err("unreachable".into())
    }
}

#[test]
fn test_submit_outcome_serializes() {
    let core = ComputeCoreBuilder::new(CoreConfig::default())
        .with_metrics(Arc::new(StaticMetrics::new(MetricsSnapshot::host(0.0, 0.0, 0.0))))
        .build()
        .unwrap();
    let outcome = core.dispatcher.submit(JobSpec::new("a")).unwrap();
    let value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(value["admission"]["state"], "queued");
    assert_eq!(value["job"]["queue"], "local");

    let health = serde_json::to_value(core.dispatcher.health()).unwrap();
    assert_eq!(health["local_depth"], 1);
    assert_eq!(health["ok"], true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_maintenance_promotes_delayed_jobs() {
    let metrics = Arc::new(StaticMetrics::new(MetricsSnapshot::host(99.0, 0.0, 0.0)));
    let config = CoreConfig {
        budget: BudgetLimits {
            evaluation_interval_ms: 0,
            ..BudgetLimits::default()
        },
        ..CoreConfig::default()
    };
    let core = ComputeCoreBuilder::new(config)
        .with_metrics(metrics.clone())
        .build()
        .unwrap();
    let outcome = core
        .dispatcher
        .submit(JobSpec::new("hot").with_perf(PerfEstimate::new(5.0, 0.0, 0.0)))
        .unwrap();
    assert!(outcome.job.is_none());

    let handle = spawn_maintenance(core.dispatcher.clone(), Duration::from_millis(10));
    metrics.update(|m| m.cpu_percent = 10.0);
    tokio::time::timeout(Duration::from_secs(2), async {
        while core.scheduler.depth(JobQueue::Local) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("delayed job was promoted");
    handle.abort();
    assert!(core.dispatcher.parked().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_monitor_marks_providers_down() {
    let core = ComputeCoreBuilder::new(CoreConfig::default()).build().unwrap();
    core.registry.register(ProviderSpec::remote("farm")).unwrap();
    assert!(core.registry.remote_available());

    let handle = spawn_health_monitor(
        core.registry.clone(),
        Arc::new(AlwaysDown),
        Duration::from_millis(10),
        Duration::from_millis(50),
    );
    tokio::time::timeout(Duration::from_secs(2), async {
        while core.registry.remote_available() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("provider marked down");
    handle.abort();
    let health = core.registry.get("farm").unwrap().last_health.unwrap();
    assert_eq!(health.error.as_deref(), Some("unreachable"));
}
