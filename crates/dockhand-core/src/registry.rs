//! Module registry.
//!
//! Owns the map of loaded module instances. Discovery, validation and
//! initialization all happen before an entry is inserted, so a failed load
//! never leaves a half-registered module behind.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dockhand_module_sdk::{Module, ModuleConfig};
use futures::FutureExt;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::config::GlobalConfig;
use crate::discovery::{Discovery, ModuleDescriptor};
use crate::error::{LifecycleError, Result};
use crate::loader::ModuleLoader;
use crate::validator::Validator;

/// Shared handle to a loaded module instance.
pub type DynModule = Arc<RwLock<Box<dyn Module>>>;

struct LoadedModule {
    descriptor: ModuleDescriptor,
    module: DynModule,
}

/// Load-time policy derived from `GlobalConfig`.
#[derive(Clone)]
struct RegistryPolicy {
    global: GlobalConfig,
    validator: Validator,
    timeout: Duration,
}

impl RegistryPolicy {
    fn new(global: &GlobalConfig, loader: &dyn ModuleLoader) -> Self {
        Self {
            global: global.clone(),
            validator: Validator::new(global, loader.extensions()),
            timeout: Duration::from_secs(global.default_timeout_secs),
        }
    }

    /// Config handed to `initialize` when the caller supplies none.
    fn base_config(&self) -> ModuleConfig {
        ModuleConfig {
            workspace: self.global.workspace_dir.clone(),
            host: self.global.host.clone(),
            context: self.global.context.clone(),
            environment: std::env::vars().collect(),
            ..ModuleConfig::default()
        }
    }
}

/// Registry of loaded modules keyed by name.
pub struct ModuleRegistry {
    loader: Arc<dyn ModuleLoader>,
    policy: parking_lot::RwLock<RegistryPolicy>,
    modules: RwLock<HashMap<String, LoadedModule>>,
    /// Serializes load/unload per name
    load_locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ModuleRegistry {
    pub fn new(loader: Arc<dyn ModuleLoader>, global: &GlobalConfig) -> Self {
        let policy = RegistryPolicy::new(global, loader.as_ref());
        Self {
            loader,
            policy: parking_lot::RwLock::new(policy),
            modules: RwLock::new(HashMap::new()),
            load_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Replace search paths, security policy and timeouts.
    pub fn apply_policy(&self, global: &GlobalConfig) {
        *self.policy.write() = RegistryPolicy::new(global, self.loader.as_ref());
    }

    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    /// Scan search paths. Loaded modules carry their load timestamp.
    pub async fn discover(&self) -> Vec<ModuleDescriptor> {
        let (search_paths, default_enabled) = {
            let policy = self.policy.read();
            (policy.global.search_paths.clone(), policy.global.default_enabled)
        };
        let mut descriptors =
            Discovery::new(self.loader.as_ref(), &search_paths).discover(default_enabled);

        let modules = self.modules.read().await;
        for descriptor in &mut descriptors {
            if let Some(loaded) = modules.get(&descriptor.name) {
                descriptor.loaded_at = loaded.descriptor.loaded_at;
            }
        }
        descriptors
    }

    /// Load `name` with the base config. Returns the existing instance if
    /// it is already loaded.
    pub async fn load(&self, name: &str) -> Result<DynModule> {
        let config = self.policy.read().base_config();
        self.load_with_config(name, &config).await
    }

    pub async fn load_with_config(&self, name: &str, config: &ModuleConfig) -> Result<DynModule> {
        self.load_tracked(name, config).await.map(|(module, _)| module)
    }

    /// Load and report whether this call created the instance.
    pub(crate) async fn load_tracked(
        &self,
        name: &str,
        config: &ModuleConfig,
    ) -> Result<(DynModule, bool)> {
        if let Some(module) = self.get(name).await {
            return Ok((module, false));
        }

        let _guard = self.lock_name(name).await;

        if let Some(module) = self.get(name).await {
            return Ok((module, false));
        }

        let mut descriptor = self
            .discover()
            .await
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?;

        let (validator, timeout) = {
            let policy = self.policy.read();
            (policy.validator.clone(), policy.timeout)
        };
        {
            let modules = self.modules.read().await;
            validator.validate(&descriptor, |dep| modules.contains_key(dep))?;
        }

        let mut instance = self.loader.open(&descriptor.path)?;
        let outcome = tokio::time::timeout(
            timeout,
            AssertUnwindSafe(instance.initialize(config)).catch_unwind(),
        )
        .await;
        match outcome {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(LifecycleError::init_failed(name, e)),
            Ok(Err(_)) => return Err(LifecycleError::init_failed(name, "panicked during initialize")),
            Err(_) => {
                return Err(LifecycleError::Timeout {
                    operation: "initialize",
                    name: name.to_string(),
                    after: timeout,
                })
            }
        }

        descriptor.loaded_at = Some(Utc::now());
        let module: DynModule = Arc::new(RwLock::new(instance));
        self.modules.write().await.insert(
            name.to_string(),
            LoadedModule {
                descriptor: descriptor.clone(),
                module: module.clone(),
            },
        );

        tracing::info!(
            module = %name,
            version = %descriptor.info.version,
            module_type = %descriptor.module_type,
            "Module loaded"
        );
        Ok((module, true))
    }

    /// Remove `name` and run its cleanup.
    ///
    /// Cleanup failures are logged; the module is unloaded regardless.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let _guard = self.lock_name(name).await;

        let loaded = self
            .modules
            .write()
            .await
            .remove(name)
            .ok_or_else(|| LifecycleError::NotLoaded(name.to_string()))?;

        let timeout = self.policy.read().timeout;
        let cleanup = async {
            let mut module = loaded.module.write().await;
            let result = AssertUnwindSafe(module.cleanup()).catch_unwind().await;
            result
        };
        match tokio::time::timeout(timeout, cleanup).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                tracing::warn!(module = %name, error = %e, "Module cleanup failed");
            }
            Ok(Err(_)) => {
                tracing::error!(module = %name, "Module panicked during cleanup");
            }
            Err(_) => {
                tracing::warn!(module = %name, timeout = ?timeout, "Module cleanup timed out");
            }
        }

        tracing::info!(module = %name, "Module unloaded");
        Ok(())
    }

    /// Unload everything, returning the names that were loaded.
    pub async fn unload_all(&self) -> Vec<String> {
        let names = self.loaded_names().await;
        for name in &names {
            if let Err(e) = self.unload(name).await {
                tracing::warn!(module = %name, error = %e, "Failed to unload module");
            }
        }
        names
    }

    pub async fn get(&self, name: &str) -> Option<DynModule> {
        self.modules.read().await.get(name).map(|m| m.module.clone())
    }

    pub async fn descriptor(&self, name: &str) -> Option<ModuleDescriptor> {
        self.modules
            .read()
            .await
            .get(name)
            .map(|m| m.descriptor.clone())
    }

    /// Descriptors of loaded modules, sorted by name.
    pub async fn list(&self) -> Vec<ModuleDescriptor> {
        let mut list: Vec<ModuleDescriptor> = self
            .modules
            .read()
            .await
            .values()
            .map(|m| m.descriptor.clone())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Loaded instances, sorted by name.
    pub async fn modules(&self) -> Vec<(String, DynModule)> {
        let mut modules: Vec<(String, DynModule)> = self
            .modules
            .read()
            .await
            .iter()
            .map(|(name, m)| (name.clone(), m.module.clone()))
            .collect();
        modules.sort_by(|a, b| a.0.cmp(&b.0));
        modules
    }

    pub async fn loaded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.modules.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.modules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.modules.read().await.is_empty()
    }

    async fn lock_name<'a>(&'a self, name: &'a str) -> NameLockGuard<'a> {
        let lock = self
            .load_locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        NameLockGuard {
            locks: &self.load_locks,
            name,
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Exclusive hold on one name. The table entry is dropped with the last holder.
struct NameLockGuard<'a> {
    locks: &'a parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    name: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameLockGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        self.guard.take();
        if locks
            .get(self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(self.name);
        }
    }
}
