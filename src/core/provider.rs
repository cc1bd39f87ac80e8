//! Provider registry: catalog of local and remote compute endpoints.
//!
//! The registry never talks to providers itself. Health probes run elsewhere
//! and push their results in through [`ProviderRegistry::record_health`].

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::core::events::{emit_safely, SharedEventSink};
use crate::core::{CoreResult, SchedulerError};
use crate::infra::store::ProviderStore;
use crate::util::clock::now_ms;
use crate::util::ids::slugify;

/// Id of the built-in local provider. It can be deactivated but never removed.
pub const LOCAL_PROVIDER_ID: &str = "local";

/// Replacement text for secret-like values on untrusted read paths.
pub const SECRET_MASK: &str = "***";

const SECRET_MARKERS: [&str; 4] = ["key", "secret", "token", "password"];

/// Whether a field name looks like it holds a credential.
pub fn is_secret_key(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|m| lower.contains(m))
}

/// Where a provider runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// This host.
    Local,
    /// GPU rental service, LAN node, or SSH host.
    Remote,
}

/// Pricing and capability metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMeta {
    /// Base rate per minute of run time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_minute: Option<f64>,
    /// Rate per GB sent to the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_cost_per_gb: Option<f64>,
    /// Rate per GB received from the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_cost_per_gb: Option<f64>,
    /// Rate per GB of VRAM per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_cost_per_gb_minute: Option<f64>,
    /// Currency code for all rates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Smallest VRAM allocation the provider offers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_vram_gb: Option<f64>,
    /// Anything else (credentials, regions, instance types).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Last observed health. Consumers decide how fresh it must be.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the probe succeeded.
    pub ok: bool,
    /// When the result was observed (ms since epoch).
    #[serde(default)]
    pub ts: u64,
    /// Probe round-trip time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Probe error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Probe-specific details.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Health result pushed by a probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthUpdate {
    /// Whether the probe succeeded.
    pub ok: bool,
    /// Observation time; stamped with the current time when absent.
    #[serde(default)]
    pub ts: Option<u64>,
    /// Probe round-trip time.
    #[serde(default)]
    pub latency_ms: Option<f64>,
    /// Probe error.
    #[serde(default)]
    pub error: Option<String>,
    /// Probe-specific details, merged into the stored status.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HealthUpdate {
    /// Successful probe with a latency.
    pub fn healthy(latency_ms: f64) -> Self {
        Self {
            ok: true,
            latency_ms: Some(latency_ms),
            ..Self::default()
        }
    }

    /// Failed probe.
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// A compute endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    /// Unique id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Local or remote.
    pub kind: ProviderKind,
    /// Connection descriptor (service name or SSH target).
    #[serde(default)]
    pub service: String,
    /// HTTP base URL, when the provider speaks HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Inactive providers are never selected.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Lower is preferred.
    #[serde(default)]
    pub priority: i64,
    /// Pricing and capability metadata.
    #[serde(default)]
    pub meta: ProviderMeta,
    /// Last observed health.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health: Option<HealthStatus>,
    #[serde(skip)]
    order: u64,
}

const fn default_active() -> bool {
    true
}

impl Provider {
    /// The built-in local provider.
    pub fn local() -> Self {
        Self {
            id: LOCAL_PROVIDER_ID.into(),
            name: "Local".into(),
            kind: ProviderKind::Local,
            service: LOCAL_PROVIDER_ID.into(),
            base_url: None,
            active: true,
            priority: 0,
            meta: ProviderMeta::default(),
            last_health: None,
            order: 0,
        }
    }

    /// Whether the provider can currently take work: active, and not known to be down.
    pub fn is_available(&self) -> bool {
        self.active && self.last_health.as_ref().is_none_or(|h| h.ok)
    }

    /// Copy with secret-like values replaced by [`SECRET_MASK`].
    #[must_use]
    pub fn masked(&self) -> Self {
        let mut out = self.clone();
        mask_map(&mut out.meta.extra);
        if let Some(health) = out.last_health.as_mut() {
            mask_map(&mut health.extra);
        }
        out
    }
}

fn mask_map(map: &mut Map<String, Value>) {
    for (key, value) in map.iter_mut() {
        if is_secret_key(key) && !value.is_null() {
            *value = Value::String(SECRET_MASK.into());
        } else {
            mask_value(value);
        }
    }
}

fn mask_value(value: &mut Value) {
    match value {
        Value::Object(map) => mask_map(map),
        Value::Array(items) => items.iter_mut().for_each(mask_value),
        _ => {}
    }
}

/// Put `previous` back wherever `incoming` carries the mask, at any depth.
fn restore_masked(incoming: &mut Value, previous: &Value) {
    if incoming.as_str() == Some(SECRET_MASK) {
        incoming.clone_from(previous);
        return;
    }
    match (incoming, previous) {
        (Value::Object(map), Value::Object(prev)) => {
            for (key, value) in map.iter_mut() {
                if let Some(previous) = prev.get(key) {
                    restore_masked(value, previous);
                }
            }
        }
        (Value::Array(items), Value::Array(prev)) => {
            for (value, previous) in items.iter_mut().zip(prev) {
                restore_masked(value, previous);
            }
        }
        _ => {}
    }
}

/// Replace `incoming` meta, keeping existing secrets wherever the incoming value is masked.
fn merge_masked_meta(existing: &ProviderMeta, mut incoming: ProviderMeta) -> ProviderMeta {
    for (key, value) in &mut incoming.extra {
        if let Some(previous) = existing.extra.get(key) {
            restore_masked(value, previous);
        }
    }
    incoming
}

/// Registration / admin-edit input. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Id; generated from `name` when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Defaults to remote, except for `local`.
    #[serde(default)]
    pub kind: Option<ProviderKind>,
    /// Connection descriptor.
    #[serde(default)]
    pub service: Option<String>,
    /// HTTP base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Active flag.
    #[serde(default)]
    pub active: Option<bool>,
    /// Priority (lower preferred).
    #[serde(default)]
    pub priority: Option<i64>,
    /// Metadata; replaces the stored metadata when present.
    #[serde(default)]
    pub meta: Option<ProviderMeta>,
}

impl ProviderSpec {
    /// Spec for a remote provider with a display name.
    pub fn remote(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            kind: Some(ProviderKind::Remote),
            ..Self::default()
        }
    }

    /// Set an explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: ProviderMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    fn resolve_id(&self) -> CoreResult<String> {
        if let Some(id) = &self.id {
            let id = id.trim();
            if id.is_empty() {
                return Err(SchedulerError::Validation("provider id must not be empty".into()));
            }
            return Ok(id.to_string());
        }
        let name = self.name.as_deref().unwrap_or_default();
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(SchedulerError::Validation(
                "provider needs an id or a name to derive one from".into(),
            ));
        }
        Ok(slug)
    }
}

/// Exported catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCatalog {
    /// Format version.
    #[serde(default = "catalog_version")]
    pub version: u32,
    /// Export time.
    #[serde(default)]
    pub exported_at_ms: u64,
    /// Providers sorted by priority.
    pub providers: Vec<Provider>,
}

const fn catalog_version() -> u32 {
    1
}

/// How an import combines with the current catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Upsert imported providers; keep everything else.
    Merge,
    /// Drop everything not in the catalog (except `local`, which is re-created if missing).
    Replace,
}

#[derive(Debug, Default)]
struct RegistryState {
    providers: HashMap<String, Provider>,
    next_order: u64,
}

impl RegistryState {
    fn with_local() -> Self {
        let mut state = Self::default();
        state.ensure_local();
        state
    }

    fn ensure_local(&mut self) {
        if !self.providers.contains_key(LOCAL_PROVIDER_ID) {
            let mut local = Provider::local();
            local.order = self.next_order;
            self.next_order += 1;
            self.providers.insert(local.id.clone(), local);
        }
    }

    fn insert_new(&mut self, mut provider: Provider) {
        provider.order = self.next_order;
        self.next_order += 1;
        self.providers.insert(provider.id.clone(), provider);
    }

    fn sorted(&self) -> Vec<Provider> {
        let mut list: Vec<Provider> = self.providers.values().cloned().collect();
        list.sort_by_key(|p| (p.priority, p.order));
        list
    }

    fn upsert(&mut self, spec: ProviderSpec) -> CoreResult<Provider> {
        let id = spec.resolve_id()?;
        let is_local = id == LOCAL_PROVIDER_ID;
        if is_local && spec.kind == Some(ProviderKind::Remote) {
            return Err(SchedulerError::Validation(
                "provider `local` must have kind `local`".into(),
            ));
        }
        if let Some(existing) = self.providers.get_mut(&id) {
            if let Some(name) = spec.name {
                existing.name = name;
            }
            if let Some(kind) = spec.kind {
                existing.kind = kind;
            }
            if let Some(service) = spec.service {
                existing.service = service;
            }
            if spec.base_url.is_some() {
                existing.base_url = spec.base_url;
            }
            if let Some(active) = spec.active {
                existing.active = active;
            }
            if let Some(priority) = spec.priority {
                existing.priority = priority;
            }
            if let Some(meta) = spec.meta {
                existing.meta = merge_masked_meta(&existing.meta, meta);
            }
            return Ok(existing.clone());
        }
        let default_priority = i64::try_from(self.providers.len()).unwrap_or(i64::MAX);
        let provider = Provider {
            name: spec.name.unwrap_or_else(|| id.clone()),
            kind: if is_local {
                ProviderKind::Local
            } else {
                spec.kind.unwrap_or(ProviderKind::Remote)
            },
            service: spec.service.unwrap_or_default(),
            base_url: spec.base_url,
            active: spec.active.unwrap_or(true),
            priority: spec.priority.unwrap_or(default_priority),
            meta: spec.meta.unwrap_or_default(),
            last_health: None,
            order: 0,
            id,
        };
        self.insert_new(provider.clone());
        Ok(self.providers[&provider.id].clone())
    }
}

/// Durable catalog of compute endpoints.
///
/// Reads return clones; the lock is never held across store I/O or event delivery.
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
    store: Option<Box<dyn ProviderStore>>,
    /// Held across export and save so snapshots reach the store in order.
    persist_lock: Mutex<()>,
    events: Option<SharedEventSink>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// In-memory registry containing only the local provider.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::with_local()),
            store: None,
            persist_lock: Mutex::new(()),
            events: None,
        }
    }

    /// Registry backed by a store; loads the stored catalog if there is one.
    pub fn with_store(store: Box<dyn ProviderStore>) -> CoreResult<Self> {
        let mut state = RegistryState::default();
        if let Some(catalog) = store.load()? {
            for provider in catalog.providers {
                state.insert_new(provider);
            }
        }
        state.ensure_local();
        tracing::info!(providers = state.providers.len(), "provider registry loaded");
        Ok(Self {
            state: RwLock::new(state),
            store: Some(store),
            persist_lock: Mutex::new(()),
            events: None,
        })
    }

    /// Attach an event sink.
    #[must_use]
    pub fn with_events(mut self, sink: SharedEventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Register or update a provider (upsert keyed by id).
    pub fn register(&self, spec: ProviderSpec) -> CoreResult<Provider> {
        let provider = self.state.write().upsert(spec)?;
        tracing::info!(provider = %provider.id, kind = ?provider.kind, "provider registered");
        self.persist();
        self.emit("provider.registered", &json!({"id": provider.id}));
        Ok(provider)
    }

    /// Remove a provider. `local` cannot be removed.
    pub fn remove(&self, id: &str) -> CoreResult<Provider> {
        if id == LOCAL_PROVIDER_ID {
            return Err(SchedulerError::ProtectedProvider(id.to_string()));
        }
        let removed = self
            .state
            .write()
            .providers
            .remove(id)
            .ok_or_else(|| SchedulerError::ProviderNotFound(id.to_string()))?;
        tracing::info!(provider = id, "provider removed");
        self.persist();
        self.emit("provider.removed", &json!({"id": id}));
        Ok(removed)
    }

    /// Activate or deactivate a provider.
    pub fn set_active(&self, id: &str, active: bool) -> CoreResult<Provider> {
        let provider = {
            let mut state = self.state.write();
            let provider = state
                .providers
                .get_mut(id)
                .ok_or_else(|| SchedulerError::ProviderNotFound(id.to_string()))?;
            provider.active = active;
            provider.clone()
        };
        tracing::info!(provider = id, active, "provider active flag changed");
        self.persist();
        Ok(provider)
    }

    /// Assign `priority = index` to each listed id. Unlisted providers keep their priority.
    pub fn set_priority_order<S: AsRef<str>>(&self, ordered_ids: &[S]) -> CoreResult<Vec<Provider>> {
        let list = {
            let mut state = self.state.write();
            if let Some(missing) = ordered_ids
                .iter()
                .map(AsRef::as_ref)
                .find(|id| !state.providers.contains_key(*id))
            {
                return Err(SchedulerError::ProviderNotFound(missing.to_string()));
            }
            for (index, id) in ordered_ids.iter().enumerate() {
                if let Some(provider) = state.providers.get_mut(id.as_ref()) {
                    provider.priority = i64::try_from(index).unwrap_or(i64::MAX);
                }
            }
            state.sorted()
        };
        self.persist();
        Ok(list.iter().map(Provider::masked).collect())
    }

    /// Merge a probe result into the provider's last health.
    pub fn record_health(&self, id: &str, update: HealthUpdate) -> CoreResult<HealthStatus> {
        let status = {
            let mut state = self.state.write();
            let provider = state
                .providers
                .get_mut(id)
                .ok_or_else(|| SchedulerError::ProviderNotFound(id.to_string()))?;
            let health = provider.last_health.get_or_insert_with(HealthStatus::default);
            health.ok = update.ok;
            health.ts = update.ts.unwrap_or_else(now_ms);
            if update.latency_ms.is_some() {
                health.latency_ms = update.latency_ms;
            }
            if update.error.is_some() || update.ok {
                health.error = update.error;
            }
            health.extra.extend(update.extra);
            health.clone()
        };
        if !status.ok {
            tracing::warn!(provider = id, error = ?status.error, "provider health check failed");
        }
        self.persist();
        self.emit("provider.health", &json!({"id": id, "ok": status.ok}));
        Ok(status)
    }

    /// Provider by id, unmasked. For trusted callers.
    pub fn get(&self, id: &str) -> Option<Provider> {
        self.state.read().providers.get(id).cloned()
    }

    /// All providers sorted by priority, secrets masked.
    pub fn list(&self) -> Vec<Provider> {
        self.state.read().sorted().iter().map(Provider::masked).collect()
    }

    /// All providers sorted by priority, secrets included. For trusted callers.
    pub fn list_unmasked(&self) -> Vec<Provider> {
        self.state.read().sorted()
    }

    /// Whether any active remote provider is not known to be down.
    pub fn remote_available(&self) -> bool {
        self.best_remote().is_some()
    }

    /// Preferred available remote provider.
    pub fn best_remote(&self) -> Option<Provider> {
        self.state
            .read()
            .sorted()
            .into_iter()
            .find(|p| p.kind == ProviderKind::Remote && p.is_available())
    }

    /// Export the catalog, optionally with secrets.
    pub fn export(&self, include_secrets: bool) -> ProviderCatalog {
        let providers = self.state.read().sorted();
        ProviderCatalog {
            version: catalog_version(),
            exported_at_ms: now_ms(),
            providers: if include_secrets {
                providers
            } else {
                providers.iter().map(Provider::masked).collect()
            },
        }
    }

    /// Import a catalog. Returns the number of providers imported.
    ///
    /// Every entry is validated before anything is applied.
    pub fn import(&self, catalog: ProviderCatalog, mode: ImportMode) -> CoreResult<usize> {
        for provider in &catalog.providers {
            if provider.id.trim().is_empty() {
                return Err(SchedulerError::Validation("imported provider has an empty id".into()));
            }
            if provider.id == LOCAL_PROVIDER_ID && provider.kind != ProviderKind::Local {
                return Err(SchedulerError::Validation(
                    "imported provider `local` must have kind `local`".into(),
                ));
            }
        }
        let count = catalog.providers.len();
        {
            let mut state = self.state.write();
            let previous = match mode {
                ImportMode::Replace => std::mem::take(&mut state.providers),
                ImportMode::Merge => HashMap::new(),
            };
            for mut provider in catalog.providers {
                let existing = state
                    .providers
                    .get(&provider.id)
                    .or_else(|| previous.get(&provider.id));
                if let Some(existing) = existing {
                    provider.meta = merge_masked_meta(&existing.meta, provider.meta);
                    provider.order = existing.order;
                    state.providers.insert(provider.id.clone(), provider);
                } else {
                    state.insert_new(provider);
                }
            }
            if let Some(local) = previous.get(LOCAL_PROVIDER_ID) {
                state
                    .providers
                    .entry(LOCAL_PROVIDER_ID.to_string())
                    .or_insert_with(|| local.clone());
            }
            state.ensure_local();
        }
        tracing::info!(count, ?mode, "provider catalog imported");
        self.persist();
        self.emit("provider.imported", &json!({"count": count}));
        Ok(count)
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _ordered = self.persist_lock.lock();
        let catalog = self.export(true);
        if let Err(e) = store.save(&catalog) {
            tracing::error!("failed to persist provider catalog: {e}");
        }
    }

    fn emit(&self, name: &str, payload: &Value) {
        emit_safely(self.events.as_ref(), name, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_meta() -> ProviderMeta {
        let mut meta = ProviderMeta {
            cost_per_minute: Some(0.5),
            currency: Some("USD".into()),
            ..ProviderMeta::default()
        };
        meta.extra.insert("api_key".into(), json!("sk-live-123"));
        meta.extra.insert("region".into(), json!("eu-west"));
        meta
    }

    #[test]
    fn local_provider_always_present_and_protected() {
        let registry = ProviderRegistry::new();
        assert!(registry.get(LOCAL_PROVIDER_ID).is_some());
        let err = registry.remove(LOCAL_PROVIDER_ID).unwrap_err();
        assert!(matches!(err, SchedulerError::ProtectedProvider(_)));
        let local = registry.set_active(LOCAL_PROVIDER_ID, false).unwrap();
        assert!(!local.active);
    }

    #[test]
    fn register_generates_slug_and_upserts() {
        let registry = ProviderRegistry::new();
        let first = registry.register(ProviderSpec::remote("RunPod A100")).unwrap();
        assert_eq!(first.id, "runpod-a100");
        assert_eq!(first.kind, ProviderKind::Remote);

        let again = registry
            .register(ProviderSpec::remote("RunPod A100 (renamed)").with_id("runpod-a100"))
            .unwrap();
        assert_eq!(again.name, "RunPod A100 (renamed)");
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn register_rejects_nameless_spec() {
        let registry = ProviderRegistry::new();
        let err = registry.register(ProviderSpec::default()).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[test]
    fn list_sorts_by_priority_then_registration() {
        let registry = ProviderRegistry::new();
        registry.register(ProviderSpec::remote("b").with_priority(5)).unwrap();
        registry.register(ProviderSpec::remote("a").with_priority(5)).unwrap();
        registry.register(ProviderSpec::remote("c").with_priority(1)).unwrap();
        let ids: Vec<String> = registry.list().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["local", "c", "b", "a"]);
    }

    #[test]
    fn priority_order_leaves_unlisted_alone() {
        let registry = ProviderRegistry::new();
        registry.register(ProviderSpec::remote("a").with_priority(10)).unwrap();
        registry.register(ProviderSpec::remote("b").with_priority(20)).unwrap();
        registry.set_priority_order(&["b", "local"]).unwrap();
        assert_eq!(registry.get("b").unwrap().priority, 0);
        assert_eq!(registry.get("local").unwrap().priority, 1);
        assert_eq!(registry.get("a").unwrap().priority, 10);
        assert!(registry.set_priority_order(&["ghost"]).unwrap_err().is_not_found());
    }

    #[test]
    fn list_masks_secrets_but_get_does_not() {
        let registry = ProviderRegistry::new();
        registry
            .register(ProviderSpec::remote("vast").with_meta(secret_meta()))
            .unwrap();
        let listed = registry.list().into_iter().find(|p| p.id == "vast").unwrap();
        assert_eq!(listed.meta.extra["api_key"], SECRET_MASK);
        assert_eq!(listed.meta.extra["region"], "eu-west");
        assert_eq!(registry.get("vast").unwrap().meta.extra["api_key"], "sk-live-123");
    }

    #[test]
    fn record_health_stamps_and_merges() {
        let registry = ProviderRegistry::new();
        registry.register(ProviderSpec::remote("lan")).unwrap();
        let down = registry.record_health("lan", HealthUpdate::unhealthy("refused")).unwrap();
        assert!(!down.ok);
        assert!(down.ts > 0);
        assert!(!registry.remote_available());

        let up = registry
            .record_health(
                "lan",
                HealthUpdate {
                    ts: Some(42),
                    ..HealthUpdate::healthy(12.5)
                },
            )
            .unwrap();
        assert!(up.ok);
        assert_eq!(up.ts, 42);
        assert_eq!(up.error, None);
        assert!(registry.remote_available());
        assert!(registry.record_health("ghost", HealthUpdate::healthy(1.0)).is_err());
    }

    #[test]
    fn export_import_round_trip_with_secrets() {
        let source = ProviderRegistry::new();
        source
            .register(ProviderSpec::remote("vast").with_meta(secret_meta()))
            .unwrap();
        let catalog = source.export(true);

        let target = ProviderRegistry::new();
        target.register(ProviderSpec::remote("stale")).unwrap();
        target.import(catalog, ImportMode::Replace).unwrap();
        let ids: Vec<String> = target.list_unmasked().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["local", "vast"]);
        assert_eq!(target.get("vast").unwrap().meta.extra["api_key"], "sk-live-123");
    }

    #[test]
    fn merge_import_keeps_secrets_behind_masks() {
        let registry = ProviderRegistry::new();
        registry
            .register(ProviderSpec::remote("vast").with_meta(secret_meta()))
            .unwrap();
        let masked = registry.export(false);
        assert_eq!(masked.providers[1].meta.extra["api_key"], SECRET_MASK);

        registry.register(ProviderSpec::remote("extra")).unwrap();
        registry.import(masked, ImportMode::Merge).unwrap();
        assert_eq!(registry.get("vast").unwrap().meta.extra["api_key"], "sk-live-123");
        assert!(registry.get("extra").is_some());
    }

    #[test]
    fn replace_import_recreates_local() {
        let registry = ProviderRegistry::new();
        let catalog = ProviderCatalog {
            version: 1,
            exported_at_ms: 0,
            providers: vec![],
        };
        registry.import(catalog, ImportMode::Replace).unwrap();
        assert!(registry.get(LOCAL_PROVIDER_ID).is_some());
    }

    #[test]
    fn nested_secrets_are_masked_on_read_paths() {
        let registry = ProviderRegistry::new();
        let mut meta = ProviderMeta::default();
        meta.extra.insert(
            "auth".into(),
            json!({"api_key": "sk-live-123", "user": "render-bot"}),
        );
        meta.extra.insert(
            "mirrors".into(),
            json!([{"url": "https://a.example", "token": "t-1"}]),
        );
        registry
            .register(ProviderSpec::remote("nested").with_meta(meta))
            .unwrap();

        let listed = registry.list().into_iter().find(|p| p.id == "nested").unwrap();
        assert_eq!(listed.meta.extra["auth"]["api_key"], SECRET_MASK);
        assert_eq!(listed.meta.extra["auth"]["user"], "render-bot");
        assert_eq!(listed.meta.extra["mirrors"][0]["token"], SECRET_MASK);
        assert_eq!(listed.meta.extra["mirrors"][0]["url"], "https://a.example");

        let exported = registry.export(false);
        let text = serde_json::to_string(&exported).unwrap();
        assert!(!text.contains("sk-live-123"));
        assert!(!text.contains("t-1"));

        registry.import(exported, ImportMode::Merge).unwrap();
        let kept = registry.get("nested").unwrap();
        assert_eq!(kept.meta.extra["auth"]["api_key"], "sk-live-123");
        assert_eq!(kept.meta.extra["mirrors"][0]["token"], "t-1");
    }

    #[test]
    fn concurrent_mutations_persist_the_latest_catalog() {
        use crate::infra::store::InMemoryProviderStore;
        use std::sync::Arc;

        let store = Arc::new(InMemoryProviderStore::new());
        let registry = ProviderRegistry::with_store(Box::new(store.clone())).unwrap();
        std::thread::scope(|scope| {
            for t in 0..8 {
                let registry = &registry;
                scope.spawn(move || {
                    for n in 0..25 {
                        registry
                            .register(ProviderSpec::remote(format!("p-{t}-{n}")))
                            .unwrap();
                    }
                });
            }
        });

        let saved = store.snapshot().unwrap();
        assert_eq!(saved.providers.len(), 201);
        assert_eq!(saved.providers, registry.export(true).providers);
    }
}
