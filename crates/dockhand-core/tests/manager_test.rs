//! Lifecycle manager tests.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{bump_mtime, eventually, eventually_within, Fixture};
use dockhand_core::{EnvironmentOverlay, LifecycleError, ManagerOverrides, ManagerState};
use dockhand_module_sdk::{EventType, HealthState};
use serde_json::json;

fn names(descriptors: &[dockhand_core::ModuleDescriptor]) -> Vec<String> {
    descriptors.iter().map(|d| d.name.clone()).collect()
}

#[tokio::test]
async fn test_start_loads_enabled_modules() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    fixture.add_module("beta");
    fixture.add_module("gamma");
    let manager = fixture.manager().await;

    let mut config = manager.store().load_config("beta").unwrap();
    config.enabled = false;
    manager.store().save_config(&mut config).unwrap();

    let loaded = manager.start().await.unwrap();
    assert_eq!(loaded, vec!["alpha".to_string(), "gamma".to_string()]);
    assert_eq!(manager.state(), ManagerState::Running);
    assert_eq!(names(&manager.list_modules().await), loaded);

    let descriptors = manager.descriptors().await;
    assert_eq!(descriptors.len(), 3);
    assert!(!descriptors.iter().find(|d| d.name == "beta").unwrap().enabled);

    manager.stop().await.unwrap();
    assert!(manager.list_modules().await.is_empty());
    assert_eq!(fixture.behavior("alpha").cleanups(), 1);
}

#[tokio::test]
async fn test_environment_overlay_can_disable() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    let manager = fixture.manager().await;

    let mut config = manager.store().load_config("alpha").unwrap().with_overlay(
        "production",
        EnvironmentOverlay {
            enabled: Some(false),
            settings: Default::default(),
        },
    );
    manager.store().save_config(&mut config).unwrap();

    manager
        .initialize(ManagerOverrides {
            environment: Some("production".to_string()),
            ..fixture.overrides()
        })
        .await
        .unwrap();
    assert!(manager.start().await.unwrap().is_empty());
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_respects_module_cap() {
    let fixture = Fixture::new();
    for name in ["alpha", "beta", "gamma"] {
        fixture.add_module(name);
    }
    let manager = fixture.manager().await;
    manager
        .initialize(ManagerOverrides {
            max_modules: Some(2),
            ..fixture.overrides()
        })
        .await
        .unwrap();

    let loaded = manager.start().await.unwrap();
    assert_eq!(loaded, vec!["alpha".to_string(), "beta".to_string()]);
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_load_failure_does_not_affect_others() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    fixture.add_module("beta");
    fixture.behavior("alpha").fail_init.store(true, Ordering::SeqCst);
    let manager = fixture.manager().await;

    let loaded = manager.start().await.unwrap();
    assert_eq!(loaded, vec!["beta".to_string()]);
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_load_module_passes_effective_config() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    let manager = fixture.manager().await;
    manager
        .initialize(ManagerOverrides {
            host: Some("edge-1".to_string()),
            workspace_dir: Some(fixture.modules_dir.path().to_path_buf()),
            ..fixture.overrides()
        })
        .await
        .unwrap();

    let mut config = manager
        .store()
        .load_config("alpha")
        .unwrap()
        .with_setting("mode", json!("fast"));
    manager.store().save_config(&mut config).unwrap();

    manager.load_module("alpha").await.unwrap();
    let seen = fixture.behavior("alpha").last_config.lock().clone().unwrap();
    assert_eq!(seen.get_str("mode"), Some("fast"));
    assert_eq!(seen.host.as_deref(), Some("edge-1"));
    assert_eq!(seen.workspace.as_deref(), Some(fixture.modules_dir.path()));
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_load_writes_no_config() {
    let fixture = Fixture::new();
    let mut bad = Fixture::info("bad");
    bad.version = "latest".to_string();
    fixture.write_module("bad.dhm", &bad);
    let manager = fixture.manager().await;

    let mut global = manager.global_config();
    global.default_enabled = false;
    manager.update_global_config(global).await.unwrap();

    assert!(matches!(
        manager.load_module("late").await,
        Err(LifecycleError::NotFound(_))
    ));
    assert!(manager.load_module("bad").await.is_err());
    assert!(!fixture.config_dir.path().join("late.json").exists());
    assert!(!fixture.config_dir.path().join("bad.json").exists());

    // a module installed later still follows default_enabled
    fixture.add_module("late");
    let descriptors = manager.descriptors().await;
    assert!(!descriptors.iter().find(|d| d.name == "late").unwrap().enabled);
    assert!(manager.start().await.unwrap().is_empty());
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_unload_unknown_module() {
    let fixture = Fixture::new();
    let manager = fixture.manager().await;
    let err = manager.unload_module("ghost").await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotLoaded(_)));
}

#[tokio::test]
async fn test_three_consecutive_health_failures_unload() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    fixture.add_module("beta");
    let manager = fixture.manager().await;
    manager.start().await.unwrap();

    let alpha = fixture.behavior("alpha");
    alpha.set_unhealthy(true);

    assert!(manager.check_health().await.is_empty());
    assert!(manager.check_health().await.is_empty());
    assert_eq!(manager.check_health().await, vec!["alpha".to_string()]);

    assert_eq!(names(&manager.list_modules().await), vec!["beta".to_string()]);
    assert_eq!(alpha.cleanups(), 1);
    let tracked: Vec<String> = manager
        .tracked_health()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(tracked, vec!["beta".to_string()]);

    // no automatic recovery
    alpha.set_unhealthy(false);
    manager.check_health().await;
    assert!(manager.get_module("alpha").await.is_none());

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_interleaved_success_prevents_unload() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    let manager = fixture.manager().await;
    manager.start().await.unwrap();
    let alpha = fixture.behavior("alpha");

    for unhealthy in [true, true, false, true, true] {
        alpha.set_unhealthy(unhealthy);
        assert!(manager.check_health().await.is_empty());
    }
    assert!(manager.get_module("alpha").await.is_some());

    let records = manager.tracked_health();
    let record = &records[0];
    assert_eq!(record.consecutive_failures, 2);
    assert_eq!(record.last_state, Some(HealthState::Unhealthy));

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_health_result_ignored_after_instance_swap() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    let manager = fixture.manager().await;

    let mut global = manager.global_config();
    global.default_timeout_secs = 1;
    global.health.failure_threshold = 1;
    global.health.timeout_secs = 5;
    manager.update_global_config(global).await.unwrap();

    manager.load_module("alpha").await.unwrap();
    let alpha = fixture.behavior("alpha");
    alpha.set_unhealthy(true);
    alpha.health_delay_ms.store(2000, Ordering::SeqCst);

    let pass = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.check_health().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // cleanup waits on the in-flight check and gives up after a second
    manager.unload_module("alpha").await.unwrap();
    manager.load_module("alpha").await.unwrap();
    assert_eq!(alpha.inits(), 2);

    assert!(pass.await.unwrap().is_empty());
    assert!(manager.get_module("alpha").await.is_some());
    assert_eq!(manager.tracked_health()[0].consecutive_failures, 0);

    alpha.health_delay_ms.store(0, Ordering::SeqCst);
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_health_ticker_unloads_until_stopped() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    let manager = fixture.manager().await;

    let mut global = manager.global_config();
    global.health.interval_secs = 1;
    global.health.failure_threshold = 1;
    manager.update_global_config(global).await.unwrap();

    manager.start().await.unwrap();
    let alpha = fixture.behavior("alpha");
    alpha.set_unhealthy(true);

    assert!(eventually_within(Duration::from_secs(5), || alpha.cleanups() == 1).await);
    assert!(manager.get_module("alpha").await.is_none());

    manager.stop().await.unwrap();
    manager.load_module("alpha").await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(manager.get_module("alpha").await.is_some());
    assert_eq!(alpha.cleanups(), 1);

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_module_health_does_not_count() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    let manager = fixture.manager().await;
    manager.load_module("alpha").await.unwrap();
    fixture.behavior("alpha").set_unhealthy(true);

    for _ in 0..5 {
        let status = manager.module_health("alpha").await.unwrap();
        assert!(status.is_unhealthy());
    }
    assert_eq!(manager.tracked_health()[0].consecutive_failures, 0);
    assert!(matches!(
        manager.module_health("ghost").await,
        Err(LifecycleError::NotLoaded(_))
    ));
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_fire_event_without_hooks() {
    let fixture = Fixture::new();
    let manager = fixture.manager().await;
    assert_eq!(manager.fire_event(EventType::PreCommand, HashMap::new()), 0);
}

#[tokio::test]
async fn test_panicking_hook_does_not_block_others() {
    let fixture = Fixture::new();
    for name in ["alpha", "beta", "gamma"] {
        fixture.add_module(name);
    }
    fixture.behavior("beta").hook_panics.store(true, Ordering::SeqCst);
    let manager = fixture.manager().await;
    manager.start().await.unwrap();

    let data = HashMap::from([("command".to_string(), json!("up"))]);
    assert_eq!(manager.fire_event(EventType::PostCommand, data), 3);

    let alpha = fixture.behavior("alpha");
    let gamma = fixture.behavior("gamma");
    assert!(eventually(|| alpha.hook_hits() == 1 && gamma.hook_hits() == 1).await);
    assert_eq!(fixture.behavior("beta").hook_hits(), 0);

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_unload_removes_hooks() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    fixture.add_module("beta");
    let manager = fixture.manager().await;
    manager.start().await.unwrap();

    manager.unload_module("alpha").await.unwrap();
    assert_eq!(manager.fire_event(EventType::PostCommand, HashMap::new()), 1);
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_events_reach_hooks() {
    use dockhand_module_sdk::Hook;

    let fixture = Fixture::new();
    fixture.add_module("alpha");
    let manager = fixture.manager().await;

    let seen = Arc::new(AtomicUsize::new(0));
    let hooks = [EventType::ModuleLoaded, EventType::ModuleUnloaded]
        .into_iter()
        .map(|event_type| {
            let counter = seen.clone();
            Hook::new(event_type, move |event| {
                let counter = counter.clone();
                async move {
                    if event.get("module") == Some(&json!("alpha")) {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(())
                }
            })
        })
        .collect();
    manager.hooks().register("observer", hooks);

    manager.load_module("alpha").await.unwrap();
    manager.unload_module("alpha").await.unwrap();
    assert!(eventually(|| seen.load(Ordering::SeqCst) == 2).await);

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_get_tools_flattens_loaded_modules() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    fixture.add_module("beta");
    let manager = fixture.manager().await;
    manager.start().await.unwrap();

    let tools = manager.get_tools().await;
    let mut tool_names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
    tool_names.sort();
    assert_eq!(tool_names, vec!["alpha.ping", "beta.ping"]);

    let out = tools[0].invoke(json!({})).await.unwrap();
    assert!(out["module"].is_string());
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_reload_matches_fresh_start() {
    let fixture = Fixture::new();
    for name in ["alpha", "beta", "gamma"] {
        fixture.add_module(name);
    }
    let manager = fixture.manager().await;
    let mut config = manager.store().load_config("gamma").unwrap();
    config.enabled = false;
    manager.store().save_config(&mut config).unwrap();

    manager.start().await.unwrap();
    let started = names(&manager.list_modules().await);

    let reloaded = manager.reload().await.unwrap();
    assert_eq!(reloaded, started);
    assert_eq!(names(&manager.list_modules().await), started);
    assert_eq!(fixture.behavior("alpha").inits(), 2);
    assert_eq!(fixture.behavior("alpha").cleanups(), 1);
    assert_eq!(manager.fire_event(EventType::PostCommand, HashMap::new()), 2);

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_hot_reload_disables_module() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    let manager = fixture.manager().await;
    manager.start().await.unwrap();

    let mut config = manager.store().load_config("alpha").unwrap();
    config.enabled = false;
    manager.store().save_config(&mut config).unwrap();
    bump_mtime(&fixture.config_dir.path().join("alpha.json"));

    assert_eq!(manager.check_config_updates().await, vec!["alpha".to_string()]);
    assert!(manager.get_module("alpha").await.is_none());
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_hot_reload_restarts_enabled_module() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    let manager = fixture.manager().await;
    manager.start().await.unwrap();

    let mut config = manager
        .store()
        .load_config("alpha")
        .unwrap()
        .with_setting("mode", json!("safe"));
    manager.store().save_config(&mut config).unwrap();
    bump_mtime(&fixture.config_dir.path().join("alpha.json"));

    assert_eq!(manager.check_config_updates().await, vec!["alpha".to_string()]);
    let alpha = fixture.behavior("alpha");
    assert_eq!(alpha.inits(), 2);
    let seen = alpha.last_config.lock().clone().unwrap();
    assert_eq!(seen.get_str("mode"), Some("safe"));

    // nothing pending on the next pass
    assert!(manager.check_config_updates().await.is_empty());
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_hot_reload_ticker_applies_changes_until_stopped() {
    let fixture = Fixture::new();
    fixture.add_module("alpha");
    let manager = fixture.manager().await;
    manager
        .initialize(ManagerOverrides {
            hot_reload_enabled: Some(true),
            hot_reload_interval_secs: Some(1),
            ..fixture.overrides()
        })
        .await
        .unwrap();
    manager.start().await.unwrap();
    let alpha = fixture.behavior("alpha");
    let config_path = fixture.config_dir.path().join("alpha.json");

    let mut config = manager.store().load_config("alpha").unwrap();
    config.enabled = false;
    manager.store().save_config(&mut config).unwrap();
    bump_mtime(&config_path);

    assert!(eventually_within(Duration::from_secs(5), || alpha.cleanups() == 1).await);
    assert!(manager.get_module("alpha").await.is_none());

    manager.stop().await.unwrap();

    config.enabled = true;
    manager.store().save_config(&mut config).unwrap();
    manager.load_module("alpha").await.unwrap();
    assert_eq!(alpha.inits(), 2);

    let mut config = config.with_setting("mode", json!("safe"));
    manager.store().save_config(&mut config).unwrap();
    bump_mtime(&config_path);
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(manager.get_module("alpha").await.is_some());
    assert_eq!(alpha.inits(), 2);
    manager.stop().await.unwrap();
}
