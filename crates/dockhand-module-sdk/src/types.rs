//! Data types shared between the host and modules.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModuleResult;

// ============================================================================
// Module Metadata
// ============================================================================

/// Kind of a declared dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Another Dockhand module
    Module,
    /// An executable that must be installed on the host
    Binary,
    /// An external service (advisory only)
    Service,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module => write!(f, "module"),
            Self::Binary => write!(f, "binary"),
            Self::Service => write!(f, "service"),
        }
    }
}

/// A dependency declared by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version: impl Into<String>, kind: DependencyKind) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind,
        }
    }

    pub fn module(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(name, version, DependencyKind::Module)
    }

    pub fn binary(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(name, version, DependencyKind::Binary)
    }

    pub fn service(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(name, version, DependencyKind::Service)
    }
}

/// Module metadata returned by `Module::info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Unique module name, the identity key in the registry
    pub name: String,
    /// Module version (`MAJOR.MINOR[.PATCH]`)
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
    /// Free-form classification tags
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Minimum host version this module runs on, empty for any
    #[serde(default)]
    pub min_host_version: String,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
            license: String::new(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            min_host_version: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = license.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_min_host_version(mut self, version: impl Into<String>) -> Self {
        self.min_host_version = version.into();
        self
    }

    /// Classify this module from its tags and name.
    pub fn module_type(&self) -> ModuleType {
        ModuleType::infer(self)
    }
}

/// Advisory classification of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    #[default]
    Core,
    Workflow,
    Integration,
    Filter,
    Monitoring,
}

impl ModuleType {
    /// Infer the type from tag and name substrings.
    ///
    /// Rules are checked in order; the first match wins.
    pub fn infer(info: &ModuleInfo) -> Self {
        let haystack: Vec<String> = info
            .tags
            .iter()
            .chain(std::iter::once(&info.name))
            .map(|s| s.to_lowercase())
            .collect();
        let mentions = |needles: &[&str]| {
            haystack
                .iter()
                .any(|text| needles.iter().any(|needle| text.contains(needle)))
        };

        if mentions(&["workflow", "automation"]) {
            Self::Workflow
        } else if mentions(&["filter", "output"]) {
            Self::Filter
        } else if mentions(&["monitor", "metric"]) {
            Self::Monitoring
        } else if mentions(&["integration"]) {
            Self::Integration
        } else {
            Self::Core
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Workflow => write!(f, "workflow"),
            Self::Integration => write!(f, "integration"),
            Self::Filter => write!(f, "filter"),
            Self::Monitoring => write!(f, "monitoring"),
        }
    }
}

// ============================================================================
// Runtime Configuration
// ============================================================================

/// Effective configuration handed to `Module::initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Resolved settings (base, then environment overlay)
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    /// Workspace the host operates on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    /// Target host identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Target context identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Process environment variables
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Get a setting deserialized into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.settings
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key)?.as_str()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.settings.get(key)?.as_bool()
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.environment.get(key).map(String::as_str)
    }
}

// ============================================================================
// Health
// ============================================================================

/// Coarse health of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Point-in-time health snapshot reported by a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
    pub last_check: DateTime<Utc>,
}

impl HealthStatus {
    pub fn new(status: HealthState, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: BTreeMap::new(),
            last_check: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(HealthState::Healthy, "")
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthState::Degraded, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthState::Unhealthy, message)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn is_unhealthy(&self) -> bool {
        self.status == HealthState::Unhealthy
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::healthy()
    }
}

// ============================================================================
// Tools
// ============================================================================

/// Handler invoked when a tool is called.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ModuleResult<Value>> + Send + Sync>;

/// A named, schema-described, invocable unit published by a module.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments
    pub input_schema: Value,
    handler: ToolHandler,
}

impl ToolSpec {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ModuleResult<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({ "type": "object" }),
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Call the tool.
    pub fn invoke(&self, args: Value) -> BoxFuture<'static, ModuleResult<Value>> {
        (self.handler)(args)
    }

    /// Serializable view without the handler.
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

/// Tool metadata as published to the protocol layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}
