//! Async glue: provider health probing and periodic maintenance.
//!
//! Probes run outside every registry lock; only their results are pushed in
//! through [`ProviderRegistry::record_health`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::core::{HealthStatus, HealthUpdate, Provider, ProviderRegistry};
use crate::runtime::Dispatcher;

/// Checks whether a provider is reachable.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe one provider. `Err` carries a human-readable failure.
    async fn probe(&self, provider: &Provider) -> Result<(), String>;
}

/// Probe every active provider once and record the results.
///
/// A probe that does not answer within `timeout` is recorded as failed with
/// error `"timeout"`.
pub async fn probe_providers(
    registry: &ProviderRegistry,
    probe: &dyn HealthProbe,
    timeout: Duration,
) -> Vec<(String, HealthStatus)> {
    let mut results = Vec::new();
    for provider in registry.list_unmasked().into_iter().filter(|p| p.active) {
        let started = Instant::now();
        let update = match tokio::time::timeout(timeout, probe.probe(&provider)).await {
            Ok(Ok(())) => HealthUpdate::healthy(started.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(error)) => HealthUpdate::unhealthy(error),
            Err(_) => HealthUpdate::unhealthy("timeout"),
        };
        if !update.ok {
            tracing::warn!(provider = %provider.id, error = ?update.error, "provider probe failed");
        }
        match registry.record_health(&provider.id, update) {
            Ok(status) => results.push((provider.id, status)),
            // removed while the probe was in flight
            Err(e) => tracing::debug!(provider = %provider.id, "skipping probe result: {e}"),
        }
    }
    results
}

/// Probe providers every `interval` on the current tokio runtime.
pub fn spawn_health_monitor(
    registry: Arc<ProviderRegistry>,
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let results = probe_providers(&registry, probe.as_ref(), timeout).await;
            tracing::trace!(probed = results.len(), "provider health pass done");
        }
    })
}

/// Call [`Dispatcher::refresh`] every `interval` so delayed jobs get promoted
/// without caller polling.
pub fn spawn_maintenance(dispatcher: Arc<Dispatcher>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let report = dispatcher.refresh();
            if !report.enqueued.is_empty() {
                tracing::debug!(enqueued = report.enqueued.len(), "maintenance admitted delayed jobs");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProviderSpec;

    struct ScriptedProbe;

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, provider: &Provider) -> Result<(), String> {
            match provider.id.as_str() {
                "down" => Err("connection refused".into()),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn records_success_failure_and_timeout() {
        let registry = ProviderRegistry::new();
        for id in ["up", "down", "slow"] {
            registry.register(ProviderSpec::remote(id).with_id(id)).unwrap();
        }
        let results = probe_providers(&registry, &ScriptedProbe, Duration::from_millis(50)).await;
        assert_eq!(results.len(), 4);

        let health = |id: &str| registry.get(id).unwrap().last_health.unwrap();
        assert!(health("up").ok);
        assert!(health("local").ok);
        assert_eq!(health("down").error.as_deref(), Some("connection refused"));
        assert_eq!(health("slow").error.as_deref(), Some("timeout"));
        assert!(registry.best_remote().is_some_and(|p| p.id == "up"));
    }

    #[tokio::test]
    async fn inactive_providers_are_skipped() {
        let registry = ProviderRegistry::new();
        registry.register(ProviderSpec::remote("idle").with_id("idle")).unwrap();
        registry.set_active("idle", false).unwrap();
        let results = probe_providers(&registry, &ScriptedProbe, Duration::from_millis(50)).await;
        assert_eq!(results.len(), 1);
        assert!(registry.get("idle").unwrap().last_health.is_none());
    }
}
