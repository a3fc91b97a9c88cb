//! Global policy and per-module persisted configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dockhand_module_sdk::Dependency;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default values for the global policy document.
pub mod defaults {
    /// Directory name under `~/.config`
    pub const CONFIG_DIR_NAME: &str = "dockhand";
    pub const GLOBAL_FILE: &str = "global.json";
    pub const SEARCH_PATHS: &[&str] = &["~/.config/dockhand/modules", "/usr/local/lib/dockhand/modules"];
    pub const ENVIRONMENT: &str = "development";
    pub const TIMEOUT_SECS: u64 = 30;
    pub const MAX_MODULES: usize = 50;
    pub const HOT_RELOAD_INTERVAL_SECS: u64 = 5;
    pub const HEALTH_INTERVAL_SECS: u64 = 30;
    pub const HEALTH_FAILURE_THRESHOLD: u32 = 3;
    pub const HEALTH_TIMEOUT_SECS: u64 = 10;
    pub const MAX_CONCURRENT_HOOKS: usize = 16;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG_DIR: &str = "DOCKHAND_CONFIG_DIR";
    pub const ENVIRONMENT: &str = "DOCKHAND_ENV";
    pub const LOG_JSON: &str = "DOCKHAND_LOG_JSON";
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Config directory from `DOCKHAND_CONFIG_DIR`, else `~/.config/dockhand`.
pub fn default_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(env_vars::CONFIG_DIR) {
        if !dir.is_empty() {
            return expand_home(Path::new(&dir));
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(defaults::CONFIG_DIR_NAME)
}

fn default_search_paths() -> Vec<PathBuf> {
    defaults::SEARCH_PATHS.iter().map(PathBuf::from).collect()
}

// ============================================================================
// Global Config
// ============================================================================

/// Hot-reload ticker policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadPolicy {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for HotReloadPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: defaults::HOT_RELOAD_INTERVAL_SECS,
        }
    }
}

/// Load-time security policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Skip the trusted-path check
    pub allow_unsigned: bool,
    /// Modules must live under one of these prefixes
    pub trusted_paths: Vec<PathBuf>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allow_unsigned: false,
            trusted_paths: default_search_paths(),
        }
    }
}

/// Health supervision policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    pub interval_secs: u64,
    /// Consecutive unhealthy checks before a forced unload
    pub failure_threshold: u32,
    pub timeout_secs: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            interval_secs: defaults::HEALTH_INTERVAL_SECS,
            failure_threshold: defaults::HEALTH_FAILURE_THRESHOLD,
            timeout_secs: defaults::HEALTH_TIMEOUT_SECS,
        }
    }
}

/// Process-wide policy, persisted as `global.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub search_paths: Vec<PathBuf>,
    pub default_enabled: bool,
    /// Bound on `initialize` and `cleanup`
    pub default_timeout_secs: u64,
    pub max_modules: usize,
    /// Active environment name used for overlays
    pub environment: String,
    pub hot_reload: HotReloadPolicy,
    pub security: SecurityPolicy,
    pub health: HealthPolicy,
    pub max_concurrent_hooks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
            default_enabled: true,
            default_timeout_secs: defaults::TIMEOUT_SECS,
            max_modules: defaults::MAX_MODULES,
            environment: defaults::ENVIRONMENT.to_string(),
            hot_reload: HotReloadPolicy::default(),
            security: SecurityPolicy::default(),
            health: HealthPolicy::default(),
            max_concurrent_hooks: defaults::MAX_CONCURRENT_HOOKS,
            workspace_dir: None,
            host: None,
            context: None,
        }
    }
}

impl GlobalConfig {
    /// Search paths with `~` expanded.
    pub fn resolved_search_paths(&self) -> Vec<PathBuf> {
        self.search_paths.iter().map(|p| expand_home(p)).collect()
    }

    /// Trusted prefixes with `~` expanded.
    pub fn resolved_trusted_paths(&self) -> Vec<PathBuf> {
        self.security
            .trusted_paths
            .iter()
            .map(|p| expand_home(p))
            .collect()
    }
}

/// Caller-supplied values overlaid on the loaded `GlobalConfig`.
#[derive(Debug, Clone, Default)]
pub struct ManagerOverrides {
    pub search_paths: Option<Vec<PathBuf>>,
    pub trusted_paths: Option<Vec<PathBuf>>,
    pub environment: Option<String>,
    pub max_modules: Option<usize>,
    pub hot_reload_enabled: Option<bool>,
    pub hot_reload_interval_secs: Option<u64>,
    pub allow_unsigned: Option<bool>,
    pub workspace_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub context: Option<String>,
}

impl ManagerOverrides {
    pub fn apply(self, config: &mut GlobalConfig) {
        if let Some(paths) = self.search_paths {
            // Trusted paths that mirrored the search paths keep mirroring them.
            if self.trusted_paths.is_none() && config.security.trusted_paths == config.search_paths
            {
                config.security.trusted_paths = paths.clone();
            }
            config.search_paths = paths;
        }
        if let Some(paths) = self.trusted_paths {
            config.security.trusted_paths = paths;
        }
        if let Some(env) = self.environment {
            config.environment = env;
        }
        if let Some(max) = self.max_modules {
            config.max_modules = max;
        }
        if let Some(enabled) = self.hot_reload_enabled {
            config.hot_reload.enabled = enabled;
        }
        if let Some(secs) = self.hot_reload_interval_secs {
            config.hot_reload.interval_secs = secs;
        }
        if let Some(allow) = self.allow_unsigned {
            config.security.allow_unsigned = allow;
        }
        if self.workspace_dir.is_some() {
            config.workspace_dir = self.workspace_dir;
        }
        if self.host.is_some() {
            config.host = self.host;
        }
        if self.context.is_some() {
            config.context = self.context;
        }
    }
}

// ============================================================================
// Per-module Config
// ============================================================================

/// Environment-specific patch over a module's base config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentOverlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

/// On-disk module configuration, one `<name>.json` per module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedConfig {
    name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentOverlay>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    pub last_modified: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl PersistedConfig {
    /// Fresh default: enabled, no settings, overlays or dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            settings: BTreeMap::new(),
            environments: BTreeMap::new(),
            dependencies: Vec::new(),
            last_modified: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn with_overlay(mut self, environment: impl Into<String>, overlay: EnvironmentOverlay) -> Self {
        self.environments.insert(environment.into(), overlay);
        self
    }

    /// Enabled flag after applying the overlay for `environment`.
    pub fn is_enabled_in(&self, environment: &str) -> bool {
        self.environments
            .get(environment)
            .and_then(|overlay| overlay.enabled)
            .unwrap_or(self.enabled)
    }
}
