//! Lifecycle manager.
//!
//! Composes the config store, registry, hook dispatcher and health tracker
//! into a supervised runtime:
//!
//! - `initialize` loads `global.json` and applies caller overrides
//! - `start` loads every enabled module and spawns the health and
//!   hot-reload tickers
//! - `stop` cancels the tickers and unloads everything
//! - `reload` rebuilds the loaded set without a process restart

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dockhand_module_sdk::{EventType, HealthStatus, ModuleConfig, ToolSpec};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{GlobalConfig, ManagerOverrides, PersistedConfig};
use crate::discovery::ModuleDescriptor;
use crate::error::{LifecycleError, Result};
use crate::health::{HealthRecord, HealthTracker, HealthVerdict};
use crate::hooks::HookDispatcher;
use crate::loader::{ModuleLoader, NativeModuleLoader};
use crate::registry::{DynModule, ModuleRegistry};
use crate::store::ConfigStore;

/// State of the whole subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

struct ManagerInner {
    store: Arc<ConfigStore>,
    registry: Arc<ModuleRegistry>,
    hooks: HookDispatcher,
    health: HealthTracker,
    global: RwLock<GlobalConfig>,
    state: Mutex<ManagerState>,
    /// Cancellation context shared by the tickers, created on start
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
    /// Modules whose config changed since the last hot-reload pass
    pending_reloads: Arc<Mutex<BTreeSet<String>>>,
    /// Serializes start, stop and reload
    lifecycle: tokio::sync::Mutex<()>,
}

/// Supervised runtime for extension modules. Cheap to clone.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<ManagerInner>,
}

impl LifecycleManager {
    pub fn new(config_dir: impl Into<PathBuf>, loader: Arc<dyn ModuleLoader>) -> Self {
        let global = GlobalConfig::default();
        Self {
            inner: Arc::new(ManagerInner {
                store: Arc::new(ConfigStore::new(config_dir)),
                registry: Arc::new(ModuleRegistry::new(loader, &global)),
                hooks: HookDispatcher::new(global.max_concurrent_hooks),
                health: HealthTracker::new(global.health.failure_threshold),
                global: RwLock::new(global),
                state: Mutex::new(ManagerState::Uninitialized),
                shutdown: Mutex::new(None),
                tickers: Mutex::new(Vec::new()),
                pending_reloads: Arc::new(Mutex::new(BTreeSet::new())),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Manager backed by the shared-library loader.
    pub fn with_native_loader(config_dir: impl Into<PathBuf>) -> Self {
        Self::new(config_dir, Arc::new(NativeModuleLoader::new()))
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.inner.registry
    }

    /// Hook table, for host components that subscribe directly.
    pub fn hooks(&self) -> &HookDispatcher {
        &self.inner.hooks
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ManagerState::Running
    }

    pub fn global_config(&self) -> GlobalConfig {
        self.inner.global.read().clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load the global config and overlay `overrides`.
    pub async fn initialize(&self, overrides: ManagerOverrides) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.is_running() {
            return Err(LifecycleError::AlreadyRunning);
        }

        let mut global = self.inner.store.load_global()?;
        overrides.apply(&mut global);
        self.apply_global(global);

        *self.inner.state.lock() = ManagerState::Initialized;
        let global = self.global_config();
        tracing::info!(
            environment = %global.environment,
            search_paths = ?global.search_paths,
            max_modules = global.max_modules,
            "Lifecycle manager initialized"
        );
        Ok(())
    }

    /// Persist a new global config and apply it.
    pub async fn update_global_config(&self, global: GlobalConfig) -> Result<()> {
        self.inner.store.save_global(&global)?;
        self.apply_global(global);
        Ok(())
    }

    fn apply_global(&self, global: GlobalConfig) {
        self.inner.registry.apply_policy(&global);
        self.inner.hooks.set_max_concurrency(global.max_concurrent_hooks);
        self.inner.health.set_threshold(global.health.failure_threshold);
        *self.inner.global.write() = global;
    }

    /// Load enabled modules and start supervision.
    ///
    /// Returns the names loaded by this call.
    pub async fn start(&self) -> Result<Vec<String>> {
        let _guard = self.inner.lifecycle.lock().await;
        match self.state() {
            ManagerState::Uninitialized => return Err(LifecycleError::NotInitialized),
            ManagerState::Running => return Err(LifecycleError::AlreadyRunning),
            ManagerState::Initialized | ManagerState::Stopped => {}
        }

        let loaded = self.load_enabled().await;
        self.spawn_tickers();
        *self.inner.state.lock() = ManagerState::Running;

        tracing::info!(loaded = loaded.len(), "Lifecycle manager started");
        Ok(loaded)
    }

    /// Cancel tickers and unload every module. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.state() == ManagerState::Uninitialized {
            return Ok(());
        }

        if let Some(shutdown) = self.inner.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        let tickers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tickers.lock());
        for ticker in tickers {
            if let Err(e) = ticker.await {
                tracing::warn!(error = %e, "Supervision task ended abnormally");
            }
        }

        self.unload_all().await;

        let was_running = {
            let mut state = self.inner.state.lock();
            let was_running = *state == ManagerState::Running;
            if was_running {
                *state = ManagerState::Stopped;
            }
            was_running
        };
        if was_running {
            tracing::info!("Lifecycle manager stopped");
        }
        Ok(())
    }

    /// Unload everything, reset supervision state and load again.
    pub async fn reload(&self) -> Result<Vec<String>> {
        let _guard = self.inner.lifecycle.lock().await;
        self.ensure_initialized()?;

        let unloaded = self.unload_all().await;
        self.inner.hooks.clear();
        self.inner.health.clear();

        let loaded = self.load_enabled().await;
        tracing::info!(
            unloaded = unloaded.len(),
            loaded = loaded.len(),
            "Modules reloaded"
        );
        Ok(loaded)
    }

    // ========================================================================
    // Modules
    // ========================================================================

    /// Load `name` with its effective config and attach hooks, health
    /// tracking and a config watch.
    pub async fn load_module(&self, name: &str) -> Result<DynModule> {
        self.ensure_initialized()?;
        let config = self.effective_config(name)?;

        let (module, created) = self.inner.registry.load_tracked(name, &config).await?;
        if created {
            self.attach(name, &module).await;
        }
        Ok(module)
    }

    pub async fn unload_module(&self, name: &str) -> Result<()> {
        self.inner.registry.unload(name).await?;
        self.detach(name);
        Ok(())
    }

    /// Resolved runtime config for `name` in the active environment.
    pub fn effective_config(&self, name: &str) -> Result<ModuleConfig> {
        let global = self.global_config();
        let mut config = self
            .inner
            .store
            .get_effective_config(name, &global.environment)?;
        config.workspace = global.workspace_dir;
        config.host = global.host;
        config.context = global.context;
        Ok(config)
    }

    pub async fn list_modules(&self) -> Vec<ModuleDescriptor> {
        self.inner.registry.list().await
    }

    pub async fn get_module(&self, name: &str) -> Option<DynModule> {
        self.inner.registry.get(name).await
    }

    /// Discovered modules with enablement resolved for the active environment.
    ///
    /// Modules without a config file fall back to `default_enabled`.
    pub async fn descriptors(&self) -> Vec<ModuleDescriptor> {
        let global = self.global_config();
        let mut descriptors = self.inner.registry.discover().await;
        for descriptor in &mut descriptors {
            descriptor.enabled = self.resolve_enabled(&descriptor.name, &global);
        }
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    fn resolve_enabled(&self, name: &str, global: &GlobalConfig) -> bool {
        match self.inner.store.read_config(name) {
            Ok(Some(config)) => config.is_enabled_in(&global.environment),
            Ok(None) => global.default_enabled,
            Err(e) => {
                tracing::warn!(module = %name, error = %e, "Unreadable module config, treating as disabled");
                false
            }
        }
    }

    /// Flattened tools of every loaded module.
    pub async fn get_tools(&self) -> Vec<ToolSpec> {
        let mut tools = Vec::new();
        for (_, module) in self.inner.registry.modules().await {
            let module = module.read().await;
            tools.extend(module.tools());
        }
        tools
    }

    /// Dispatch an event to matching hooks without waiting for them.
    pub fn fire_event(&self, event_type: EventType, data: HashMap<String, Value>) -> usize {
        self.inner.hooks.fire(event_type, data)
    }

    // ========================================================================
    // Supervision
    // ========================================================================

    /// Run one health pass, returning the modules force-unloaded.
    pub async fn check_health(&self) -> Vec<String> {
        let timeout = Duration::from_secs(self.global_config().health.timeout_secs.max(1));
        let mut unloaded = Vec::new();

        for name in self.inner.health.names() {
            let Some(module) = self.inner.registry.get(&name).await else {
                self.inner.health.untrack(&name);
                continue;
            };
            let status = run_health_check(&module, timeout).await;

            // the instance may have been replaced while the check ran
            let current = self.inner.registry.get(&name).await;
            if !current.is_some_and(|current| Arc::ptr_eq(&current, &module)) {
                tracing::debug!(module = %name, "Module replaced during health check, discarding result");
                continue;
            }

            match self.inner.health.record(&name, &status) {
                None | Some(HealthVerdict::Healthy) => {}
                Some(HealthVerdict::Failing(failures)) => {
                    tracing::warn!(
                        module = %name,
                        failures,
                        message = %status.message,
                        "Module unhealthy"
                    );
                }
                Some(HealthVerdict::ThresholdReached) => {
                    tracing::warn!(
                        module = %name,
                        policy = "health-auto-unload",
                        message = %status.message,
                        "Health failure threshold reached, unloading module"
                    );
                    match self.unload_module(&name).await {
                        Ok(()) => unloaded.push(name),
                        Err(LifecycleError::NotLoaded(_)) => {
                            self.inner.health.untrack(&name);
                        }
                        Err(e) => {
                            tracing::warn!(module = %name, error = %e, "Forced unload failed");
                        }
                    }
                }
            }
        }
        unloaded
    }

    /// One on-demand health call. Does not touch the failure counters.
    pub async fn module_health(&self, name: &str) -> Result<HealthStatus> {
        let module = self
            .inner
            .registry
            .get(name)
            .await
            .ok_or_else(|| LifecycleError::NotLoaded(name.to_string()))?;
        let timeout = Duration::from_secs(self.global_config().health.timeout_secs.max(1));
        Ok(run_health_check(&module, timeout).await)
    }

    pub fn tracked_health(&self) -> Vec<HealthRecord> {
        self.inner.health.snapshot()
    }

    /// Poll watched configs and apply changes to loaded modules.
    ///
    /// A module disabled by the change is unloaded; one still enabled is
    /// restarted with its fresh config. Returns the names acted on.
    pub async fn check_config_updates(&self) -> Vec<String> {
        self.inner.store.check_for_updates();
        let pending: BTreeSet<String> = std::mem::take(&mut *self.inner.pending_reloads.lock());
        let GlobalConfig {
            environment,
            default_enabled,
            ..
        } = self.global_config();

        let mut applied = Vec::new();
        for name in pending {
            if !self.inner.registry.is_loaded(&name).await {
                continue;
            }
            let enabled = match self.inner.store.read_config(&name) {
                Ok(Some(config)) => config.is_enabled_in(&environment),
                Ok(None) => default_enabled,
                Err(e) => {
                    tracing::warn!(module = %name, error = %e, "Changed config is unreadable, keeping module");
                    continue;
                }
            };

            let data = HashMap::from([("module".to_string(), Value::from(name.clone()))]);
            self.inner.hooks.fire(EventType::ConfigChanged, data);

            if let Err(e) = self.unload_module(&name).await {
                tracing::warn!(module = %name, error = %e, "Hot-reload unload failed");
                continue;
            }
            if enabled {
                tracing::info!(module = %name, "Config changed, restarting module");
                if let Err(e) = self.load_module(&name).await {
                    tracing::warn!(module = %name, error = %e, "Hot-reload restart failed");
                    continue;
                }
            } else {
                tracing::info!(module = %name, "Module disabled by config change");
            }
            applied.push(name);
        }
        applied
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_initialized(&self) -> Result<()> {
        if self.state() == ManagerState::Uninitialized {
            return Err(LifecycleError::NotInitialized);
        }
        Ok(())
    }

    /// Load enabled descriptors in name order until the module cap.
    async fn load_enabled(&self) -> Vec<String> {
        let max_modules = self.global_config().max_modules;
        let mut loaded = Vec::new();

        for descriptor in self.descriptors().await {
            if !descriptor.enabled {
                tracing::debug!(module = %descriptor.name, "Module disabled, not loading");
                continue;
            }
            if self.inner.registry.len().await >= max_modules {
                tracing::info!(max_modules, "Module cap reached, skipping remaining modules");
                break;
            }
            match self.load_module(&descriptor.name).await {
                Ok(_) => loaded.push(descriptor.name),
                Err(e) => {
                    tracing::warn!(module = %descriptor.name, error = %e, "Failed to load module");
                }
            }
        }
        loaded
    }

    async fn unload_all(&self) -> Vec<String> {
        let names = self.inner.registry.unload_all().await;
        for name in &names {
            self.detach(name);
        }
        names
    }

    async fn attach(&self, name: &str, module: &DynModule) {
        let hooks = module.read().await.hooks();
        self.inner.hooks.register(name, hooks);
        self.inner.health.track(name);

        let pending = self.inner.pending_reloads.clone();
        let watched = self.inner.store.watch_config(
            name,
            Arc::new(move |config: &PersistedConfig| -> Result<()> {
                pending.lock().insert(config.name().to_string());
                Ok(())
            }),
        );
        if let Err(e) = watched {
            tracing::warn!(module = %name, error = %e, "Failed to watch module config");
        }

        let data = HashMap::from([("module".to_string(), Value::from(name))]);
        self.inner.hooks.fire(EventType::ModuleLoaded, data);
    }

    fn detach(&self, name: &str) {
        self.inner.hooks.remove_module(name);
        self.inner.health.untrack(name);
        self.inner.store.unwatch_config(name);
        self.inner.pending_reloads.lock().remove(name);

        let data = HashMap::from([("module".to_string(), Value::from(name))]);
        self.inner.hooks.fire(EventType::ModuleUnloaded, data);
    }

    fn spawn_tickers(&self) {
        let global = self.global_config();
        let (tx, rx) = watch::channel(false);
        let mut tickers = Vec::new();

        tickers.push(self.spawn_ticker(
            "health",
            Duration::from_secs(global.health.interval_secs.max(1)),
            rx.clone(),
            |manager| async move {
                manager.check_health().await;
            },
        ));

        if global.hot_reload.enabled {
            tickers.push(self.spawn_ticker(
                "hot-reload",
                Duration::from_secs(global.hot_reload.interval_secs.max(1)),
                rx,
                |manager| async move {
                    manager.check_config_updates().await;
                },
            ));
        }

        *self.inner.shutdown.lock() = Some(tx);
        self.inner.tickers.lock().extend(tickers);
    }

    /// Run `work` every `period` until shutdown or the manager is dropped.
    fn spawn_ticker<F, Fut>(
        &self,
        name: &'static str,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
        work: F,
    ) -> JoinHandle<()>
    where
        F: Fn(LifecycleManager) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let inner: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        work(LifecycleManager { inner }).await;
                    }
                }
            }
            tracing::debug!(ticker = name, "Supervision ticker stopped");
        })
    }
}

/// Call `health` with a bound. Timeouts and panics count as unhealthy.
async fn run_health_check(module: &DynModule, timeout: Duration) -> HealthStatus {
    let check = async {
        let module = module.read().await;
        let status = AssertUnwindSafe(module.health()).catch_unwind().await;
        status
    };
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(status)) => status,
        Ok(Err(_)) => HealthStatus::unhealthy("health check panicked"),
        Err(_) => HealthStatus::unhealthy(format!("health check timed out after {:?}", timeout)),
    }
}
