//! Shared fixtures: an in-process loader and scratch directories.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dockhand_core::{
    GlobalConfig, LifecycleError, LifecycleManager, ManagerOverrides, ModuleLoader, Result,
};
use dockhand_module_sdk::{
    EventType, HealthStatus, Hook, Module, ModuleConfig, ModuleError, ModuleInfo, ModuleResult,
    ToolSpec,
};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

pub const EXT: &str = "dhm";

/// Knobs and counters shared between a test and every instance of one module.
#[derive(Default)]
pub struct Behavior {
    pub inits: AtomicUsize,
    pub cleanups: AtomicUsize,
    pub hook_hits: AtomicUsize,
    pub unhealthy: AtomicBool,
    pub fail_init: AtomicBool,
    pub fail_cleanup: AtomicBool,
    pub hook_panics: AtomicBool,
    pub init_delay_ms: AtomicU64,
    pub health_delay_ms: AtomicU64,
    pub last_config: Mutex<Option<ModuleConfig>>,
}

impl Behavior {
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn hook_hits(&self) -> usize {
        self.hook_hits.load(Ordering::SeqCst)
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }
}

struct FakeModule {
    info: ModuleInfo,
    behavior: Arc<Behavior>,
}

#[async_trait]
impl Module for FakeModule {
    fn info(&self) -> ModuleInfo {
        self.info.clone()
    }

    async fn initialize(&mut self, config: &ModuleConfig) -> ModuleResult<()> {
        self.behavior.inits.fetch_add(1, Ordering::SeqCst);
        let delay = self.behavior.init_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.behavior.fail_init.load(Ordering::SeqCst) {
            return Err(ModuleError::InitializationFailed("configured to fail".into()));
        }
        *self.behavior.last_config.lock() = Some(config.clone());
        Ok(())
    }

    fn tools(&self) -> Vec<ToolSpec> {
        let name = self.info.name.clone();
        vec![ToolSpec::new(
            format!("{}.ping", self.info.name),
            "Reply with the module name",
            move |_args| {
                let name = name.clone();
                async move { Ok(json!({ "module": name })) }
            },
        )]
    }

    fn hooks(&self) -> Vec<Hook> {
        let behavior = self.behavior.clone();
        vec![Hook::new(EventType::PostCommand, move |_event| {
            let behavior = behavior.clone();
            async move {
                if behavior.hook_panics.load(Ordering::SeqCst) {
                    panic!("hook configured to panic");
                }
                behavior.hook_hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })]
    }

    async fn cleanup(&mut self) -> ModuleResult<()> {
        self.behavior.cleanups.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_cleanup.load(Ordering::SeqCst) {
            return Err(ModuleError::ExecutionFailed("cleanup failed".into()));
        }
        Ok(())
    }

    async fn health(&self) -> HealthStatus {
        let delay = self.behavior.health_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.behavior.unhealthy.load(Ordering::SeqCst) {
            HealthStatus::unhealthy("configured unhealthy")
        } else {
            HealthStatus::healthy()
        }
    }
}

/// Loader reading a JSON `ModuleInfo` from each `.dhm` file.
#[derive(Default)]
pub struct FakeLoader {
    behaviors: Mutex<HashMap<String, Arc<Behavior>>>,
}

impl FakeLoader {
    pub fn behavior(&self, name: &str) -> Arc<Behavior> {
        self.behaviors
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

impl ModuleLoader for FakeLoader {
    fn extensions(&self) -> &[&str] {
        &[EXT]
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Module>> {
        let bytes = std::fs::read(path)?;
        let info: ModuleInfo = serde_json::from_slice(&bytes).map_err(|e| {
            LifecycleError::LoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        let behavior = self.behavior(&info.name);
        Ok(Box::new(FakeModule { info, behavior }))
    }
}

/// Scratch config and module directories plus the loader serving them.
pub struct Fixture {
    pub config_dir: TempDir,
    pub modules_dir: TempDir,
    pub loader: Arc<FakeLoader>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            config_dir: TempDir::new().unwrap(),
            modules_dir: TempDir::new().unwrap(),
            loader: Arc::new(FakeLoader::default()),
        }
    }

    pub fn info(name: &str) -> ModuleInfo {
        ModuleInfo::new(name, "1.0.0").with_description(format!("{} test module", name))
    }

    /// Write a well-formed module file.
    pub fn add_module(&self, name: &str) -> PathBuf {
        self.write_module(&format!("{}.{}", name, EXT), &Self::info(name))
    }

    pub fn write_module(&self, file: &str, info: &ModuleInfo) -> PathBuf {
        self.write_raw(file, &serde_json::to_vec(info).unwrap())
    }

    pub fn write_raw(&self, file: &str, bytes: &[u8]) -> PathBuf {
        let path = self.modules_dir.path().join(file);
        std::fs::write(&path, bytes).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    pub fn behavior(&self, name: &str) -> Arc<Behavior> {
        self.loader.behavior(name)
    }

    /// Global config pointing at the scratch module directory.
    pub fn global(&self) -> GlobalConfig {
        let mut global = GlobalConfig::default();
        global.search_paths = vec![self.modules_dir.path().to_path_buf()];
        global.security.trusted_paths = global.search_paths.clone();
        global.default_timeout_secs = 2;
        global
    }

    pub fn overrides(&self) -> ManagerOverrides {
        ManagerOverrides {
            search_paths: Some(vec![self.modules_dir.path().to_path_buf()]),
            hot_reload_enabled: Some(false),
            ..Default::default()
        }
    }

    pub async fn manager(&self) -> LifecycleManager {
        let manager = LifecycleManager::new(self.config_dir.path(), self.loader.clone());
        manager.initialize(self.overrides()).await.unwrap();
        manager
    }
}

/// Move a file's mtime forward so pollers see a change.
pub fn bump_mtime(path: &Path) {
    let current = std::fs::metadata(path).unwrap().modified().unwrap();
    let base = current.max(SystemTime::now());
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(base + Duration::from_secs(2)).unwrap();
}

/// Poll until `check` holds or a second passes.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    eventually_within(Duration::from_secs(1), check).await
}

/// Poll until `check` holds or `limit` passes.
pub async fn eventually_within(limit: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
