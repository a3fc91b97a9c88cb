//! Configuration store.
//!
//! Persists one `<name>.json` per module plus `global.json` in a single
//! directory, caches parsed configs keyed by file modification time, and
//! polls watched files for hot-reload.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;
use dockhand_module_sdk::ModuleConfig;
use parking_lot::RwLock;
use tempfile::NamedTempFile;

use crate::config::{defaults, GlobalConfig, PersistedConfig};
use crate::error::{LifecycleError, Result};

/// Callback invoked with the reloaded config when a watched file changes.
pub type ConfigChangeCallback = Arc<dyn Fn(&PersistedConfig) -> Result<()> + Send + Sync>;

struct CachedConfig {
    config: PersistedConfig,
    modified: SystemTime,
}

struct WatchedConfig {
    callback: ConfigChangeCallback,
    /// mtime at registration or at the last delivered change
    modified: Option<SystemTime>,
}

/// File-backed module configuration store.
pub struct ConfigStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, CachedConfig>>,
    watchers: RwLock<HashMap<String, WatchedConfig>>,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
            watchers: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a module's config file.
    pub fn config_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name == defaults::GLOBAL_FILE.trim_end_matches(".json")
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            return Err(LifecycleError::Config(format!(
                "invalid config name '{}'",
                name
            )));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }

    /// Load a module config, creating and persisting a default on first use.
    pub fn load_config(&self, name: &str) -> Result<PersistedConfig> {
        if let Some(config) = self.read_config(name)? {
            return Ok(config);
        }
        let mut config = PersistedConfig::new(name);
        self.save_config(&mut config)?;
        tracing::info!(module = %name, path = %self.config_path(name)?.display(), "Created default module config");
        Ok(config)
    }

    /// Read a module config without provisioning one. `None` when no file exists.
    pub fn read_config(&self, name: &str) -> Result<Option<PersistedConfig>> {
        let path = self.config_path(name)?;
        let Some(modified) = modified_time(&path)? else {
            return Ok(None);
        };

        if let Some(cached) = self.cache.read().get(name) {
            if modified <= cached.modified {
                return Ok(Some(cached.config.clone()));
            }
        }

        let config: PersistedConfig = read_json(&path)?;
        if config.name() != name {
            return Err(LifecycleError::Config(format!(
                "{} declares name '{}', expected '{}'",
                path.display(),
                config.name(),
                name
            )));
        }

        self.cache.write().insert(
            name.to_string(),
            CachedConfig {
                config: config.clone(),
                modified,
            },
        );
        Ok(Some(config))
    }

    /// Stamp `last_modified` and write the config atomically.
    ///
    /// The cache is only updated once the file is in place.
    pub fn save_config(&self, config: &mut PersistedConfig) -> Result<()> {
        let path = self.config_path(config.name())?;
        config.last_modified = Utc::now();
        write_json_atomic(&path, config)?;

        let modified = modified_time(&path)?.unwrap_or_else(SystemTime::now);
        self.cache.write().insert(
            config.name().to_string(),
            CachedConfig {
                config: config.clone(),
                modified,
            },
        );
        tracing::debug!(module = %config.name(), "Saved module config");
        Ok(())
    }

    /// Resolve the runtime config for `environment`.
    ///
    /// Settings layer base then overlay, later keys winning. The process
    /// environment is carried in `ModuleConfig::environment`. A module
    /// without a config file resolves to defaults and nothing is written.
    pub fn get_effective_config(&self, name: &str, environment: &str) -> Result<ModuleConfig> {
        let persisted = self
            .read_config(name)?
            .unwrap_or_else(|| PersistedConfig::new(name));

        let mut settings = persisted.settings;
        if let Some(overlay) = persisted.environments.get(environment) {
            for (key, value) in &overlay.settings {
                settings.insert(key.clone(), value.clone());
            }
        }

        Ok(ModuleConfig {
            settings,
            environment: std::env::vars().collect(),
            ..ModuleConfig::default()
        })
    }

    /// Invoke `callback` whenever `check_for_updates` sees a newer file.
    pub fn watch_config(&self, name: &str, callback: ConfigChangeCallback) -> Result<()> {
        let path = self.config_path(name)?;
        let modified = modified_time(&path)?;
        self.watchers.write().insert(
            name.to_string(),
            WatchedConfig { callback, modified },
        );
        tracing::debug!(module = %name, "Watching module config");
        Ok(())
    }

    pub fn unwatch_config(&self, name: &str) -> bool {
        self.watchers.write().remove(name).is_some()
    }

    pub fn watched(&self) -> Vec<String> {
        let mut names: Vec<String> = self.watchers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Poll watched files once, returning how many changes were delivered.
    ///
    /// Callback errors are logged and do not affect other watchers.
    pub fn check_for_updates(&self) -> usize {
        let snapshot: Vec<(String, ConfigChangeCallback, Option<SystemTime>)> = self
            .watchers
            .read()
            .iter()
            .map(|(name, w)| (name.clone(), w.callback.clone(), w.modified))
            .collect();

        let mut delivered = Vec::new();
        for (name, callback, recorded) in snapshot {
            let current = match self.config_path(&name).and_then(|p| modified_time(&p)) {
                Ok(Some(current)) => current,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(module = %name, error = %e, "Failed to stat module config");
                    continue;
                }
            };
            if recorded.is_some_and(|recorded| current <= recorded) {
                continue;
            }

            match self.load_config(&name) {
                Ok(config) => {
                    tracing::info!(module = %name, "Module config changed");
                    if let Err(e) = callback(&config) {
                        tracing::warn!(module = %name, error = %e, "Config change callback failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(module = %name, error = %e, "Failed to reload module config");
                }
            }
            delivered.push((name, current));
        }

        let count = delivered.len();
        if count > 0 {
            let mut watchers = self.watchers.write();
            for (name, current) in delivered {
                if let Some(watcher) = watchers.get_mut(&name) {
                    watcher.modified = Some(current);
                }
            }
        }
        count
    }

    /// Load `global.json`, writing defaults when it is absent.
    pub fn load_global(&self) -> Result<GlobalConfig> {
        let path = self.dir.join(defaults::GLOBAL_FILE);
        if modified_time(&path)?.is_none() {
            let config = GlobalConfig::default();
            self.save_global(&config)?;
            tracing::info!(path = %path.display(), "Created default global config");
            return Ok(config);
        }
        read_json(&path)
    }

    pub fn save_global(&self, config: &GlobalConfig) -> Result<()> {
        write_json_atomic(&self.dir.join(defaults::GLOBAL_FILE), config)
    }
}

fn modified_time(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| LifecycleError::Config(format!("{}: {}", path.display(), e)))
}

/// Write through a uniquely named sibling temp file, then rename over `path`.
fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let bytes = serde_json::to_vec_pretty(value)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
