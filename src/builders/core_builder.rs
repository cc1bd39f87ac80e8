//! Builder wiring the registry, scheduler, budget manager, and dispatcher together.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::config::CoreConfig;
use crate::core::{
    AppResult, BudgetManager, JobScheduler, MetricsProvider, MetricsSnapshot, ProviderRegistry,
    SchedulerError, SharedEventSink,
};
use crate::infra::store::{JsonFileProviderStore, ProviderStore};
use crate::runtime::Dispatcher;

/// One fully wired instance of the compute core.
///
/// Construct once at startup and share the handles with every consumer.
#[derive(Clone)]
pub struct ComputeCore {
    /// Configuration the core was built from.
    pub config: CoreConfig,
    /// Provider catalog.
    pub registry: Arc<ProviderRegistry>,
    /// Priority queues.
    pub scheduler: Arc<JobScheduler>,
    /// Admission control.
    pub budget: Arc<BudgetManager>,
    /// Gate-then-enqueue front door.
    pub dispatcher: Arc<Dispatcher>,
}

/// Builds a [`ComputeCore`] from configuration and collaborators.
#[derive(Default)]
pub struct ComputeCoreBuilder {
    config: CoreConfig,
    metrics: Option<Arc<dyn MetricsProvider>>,
    events: Option<SharedEventSink>,
    store: Option<Box<dyn ProviderStore>>,
}

impl ComputeCoreBuilder {
    /// Start from a configuration.
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Start from `CoreConfig::from_env` (`.env` and `BROKER_*` variables).
    pub fn from_env() -> AppResult<Self> {
        let config = CoreConfig::from_env()
            .map_err(anyhow::Error::msg)
            .context("loading broker configuration from the environment")?;
        Ok(Self::new(config))
    }

    /// Start from a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading broker configuration {}", path.display()))?;
        let config = CoreConfig::from_json_str(&raw)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("parsing broker configuration {}", path.display()))?;
        Ok(Self::new(config))
    }

    /// Metrics source used for admission and advice.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsProvider>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Event sink shared by every component.
    #[must_use]
    pub fn with_events(mut self, sink: SharedEventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Provider store; overrides `providers_path`.
    #[must_use]
    pub fn with_store(mut self, store: Box<dyn ProviderStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration and construct every component.
    pub fn build(self) -> Result<ComputeCore, SchedulerError> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::Validation(format!("config invalid: {e}")))?;

        let store = match (self.store, &self.config.providers_path) {
            (Some(store), _) => Some(store),
            (None, Some(path)) => {
                Some(Box::new(JsonFileProviderStore::new(path)?) as Box<dyn ProviderStore>)
            }
            (None, None) => None,
        };
        let mut registry = match store {
            Some(store) => ProviderRegistry::with_store(store)?,
            None => ProviderRegistry::new(),
        };

        let metrics = self.metrics.unwrap_or_else(|| {
            tracing::warn!("no metrics provider configured; resource-hungry jobs will be delayed");
            let fallback: Arc<dyn MetricsProvider> = Arc::new(MetricsSnapshot::unavailable);
            fallback
        });

        let mut budget = BudgetManager::new(self.config.budget.clone(), metrics.clone())?;
        let mut scheduler = JobScheduler::new(self.config.scheduler.clone())?;
        if let Some(sink) = &self.events {
            registry = registry.with_events(sink.clone());
            budget = budget.with_events(sink.clone());
            scheduler = scheduler.with_events(sink.clone());
        }

        let registry = Arc::new(registry);
        let scheduler = Arc::new(scheduler.with_registry(registry.clone()));
        let budget = Arc::new(budget);
        let dispatcher = Arc::new(Dispatcher::new(
            scheduler.clone(),
            budget.clone(),
            registry.clone(),
            metrics,
            self.config.advisor.clone(),
        ));

        tracing::info!(
            providers = registry.list().len(),
            max_running_jobs = self.config.budget.max_running_jobs,
            "compute core built"
        );
        Ok(ComputeCore {
            config: self.config,
            registry,
            scheduler,
            budget,
            dispatcher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JobQueue, JobSpec, StaticMetrics};

    #[test]
    fn builds_with_defaults() {
        let core = ComputeCoreBuilder::new(CoreConfig::default())
            .with_metrics(Arc::new(StaticMetrics::new(MetricsSnapshot::host(0.0, 0.0, 0.0))))
            .build()
            .unwrap();
        assert!(core.registry.get("local").is_some());
        core.scheduler.enqueue(JobSpec::new("a")).unwrap();
        assert_eq!(core.scheduler.depth(JobQueue::Local), 1);
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = CoreConfig::default();
        config.budget.max_running_jobs = 0;
        assert!(matches!(
            ComputeCoreBuilder::new(config).build(),
            Err(SchedulerError::Validation(_))
        ));
    }
}
