//! Tests for the provider registry and its stores

use std::sync::Arc;

use prometheus_compute_broker::core::{
    HealthUpdate, ImportMode, InMemoryEventSink, ProviderCatalog, ProviderKind, ProviderMeta,
    ProviderRegistry, ProviderSpec, SchedulerError, SECRET_MASK,
};
use prometheus_compute_broker::infra::InMemoryProviderStore;
use serde_json::json;

fn remote_with_key(name: &str, key: &str) -> ProviderSpec {
    let mut meta = ProviderMeta {
        cost_per_minute: Some(0.4),
        ..ProviderMeta::default()
    };
    meta.extra.insert("api_key".into(), json!(key));
    ProviderSpec::remote(name).with_meta(meta)
}

#[test]
fn test_list_is_sorted_by_priority_then_registration() {
    let registry = ProviderRegistry::new();
    registry.register(ProviderSpec::remote("b").with_priority(5)).unwrap();
    registry.register(ProviderSpec::remote("a").with_priority(5)).unwrap();
    registry.register(ProviderSpec::remote("c").with_priority(1)).unwrap();
    let ids: Vec<String> = registry.list().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, ["local", "c", "b", "a"]);
}

#[test]
fn test_set_priority_order_keeps_unmentioned() {
    let registry = ProviderRegistry::new();
    registry.register(ProviderSpec::remote("x").with_priority(10)).unwrap();
    registry.register(ProviderSpec::remote("y").with_priority(20)).unwrap();
    registry.set_priority_order(&["y", "local"]).unwrap();
    assert_eq!(registry.get("y").unwrap().priority, 0);
    assert_eq!(registry.get("local").unwrap().priority, 1);
    assert_eq!(registry.get("x").unwrap().priority, 10);

    let err = registry.set_priority_order(&["ghost"]).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_secrets_are_masked_on_list_and_export() {
    let registry = ProviderRegistry::new();
    registry.register(remote_with_key("RunPod", "sk-123")).unwrap();

    let listed = registry.list().into_iter().find(|p| p.id == "runpod").unwrap();
    assert_eq!(listed.meta.extra["api_key"], SECRET_MASK);
    assert_eq!(registry.get("runpod").unwrap().meta.extra["api_key"], "sk-123");

    let masked = registry.export(false);
    let full = registry.export(true);
    let find = |c: &ProviderCatalog| {
        c.providers.iter().find(|p| p.id == "runpod").unwrap().meta.extra["api_key"].clone()
    };
    assert_eq!(find(&masked), SECRET_MASK);
    assert_eq!(find(&full), "sk-123");
}

#[test]
fn test_merge_import_keeps_existing_secret_for_masked_value() {
    let registry = ProviderRegistry::new();
    registry.register(remote_with_key("RunPod", "sk-123")).unwrap();
    let exported = registry.export(false);
    registry.import(exported, ImportMode::Merge).unwrap();
    assert_eq!(registry.get("runpod").unwrap().meta.extra["api_key"], "sk-123");
}

#[test]
fn test_replace_import_drops_others_but_keeps_local() {
    let source = ProviderRegistry::new();
    source.register(ProviderSpec::remote("Only")).unwrap();
    let catalog = source.export(true);

    let target = ProviderRegistry::new();
    target.register(ProviderSpec::remote("Old")).unwrap();
    target.import(catalog, ImportMode::Replace).unwrap();
    assert!(target.get("old").is_none());
    assert!(target.get("only").is_some());
    assert!(target.get("local").is_some());
}

#[test]
fn test_import_rejects_remote_local() {
    let registry = ProviderRegistry::new();
    let mut catalog = registry.export(true);
    catalog.providers[0].kind = ProviderKind::Remote;
    assert!(matches!(
        registry.import(catalog, ImportMode::Merge),
        Err(SchedulerError::Validation(_))
    ));
}

#[test]
fn test_record_health_stamps_time_and_gates_availability() {
    let registry = ProviderRegistry::new();
    registry.register(ProviderSpec::remote("farm")).unwrap();
    assert!(registry.remote_available());

    let status = registry
        .record_health("farm", HealthUpdate::unhealthy("503"))
        .unwrap();
    assert!(status.ts > 0);
    assert!(!registry.remote_available());

    registry.record_health("farm", HealthUpdate::healthy(42.0)).unwrap();
    assert_eq!(registry.best_remote().unwrap().id, "farm");
    assert!(registry
        .record_health("ghost", HealthUpdate::healthy(1.0))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_mutations_are_persisted_and_reloaded() {
    let store = Arc::new(InMemoryProviderStore::new());
    let registry = ProviderRegistry::with_store(Box::new(store.clone())).unwrap();
    registry.register(remote_with_key("Lan Node", "tok")).unwrap();
    registry.set_active("lan-node", false).unwrap();
    assert!(store.save_count() >= 2);

    let reloaded = ProviderRegistry::with_store(Box::new(store.clone())).unwrap();
    let node = reloaded.get("lan-node").unwrap();
    assert!(!node.active);
    assert_eq!(node.meta.extra["api_key"], "tok");
}

#[test]
fn test_registry_events() {
    let sink = Arc::new(InMemoryEventSink::new(8));
    let registry = ProviderRegistry::new().with_events(sink.clone());
    registry.register(ProviderSpec::remote("farm")).unwrap();
    registry.remove("farm").unwrap();
    let names = sink.names();
    assert_eq!(names.first().map(String::as_str), Some("provider.registered"));
    assert_eq!(names.len(), 2);
}
