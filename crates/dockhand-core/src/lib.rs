//! Dockhand module lifecycle.
//!
//! Discovers extension modules on configured search paths, validates them,
//! resolves their configuration and supervises them at runtime.
//!
//! ## Components
//!
//! - **Discovery**: scans search paths and reads module metadata
//! - **Validator**: structural, filesystem and dependency checks before a load
//! - **Registry**: owns loaded instances keyed by name
//! - **ConfigStore**: per-module JSON configs with environment overlays
//! - **LifecycleManager**: start/stop, health supervision, hot-reload and
//!   event dispatch

pub mod config;
pub mod discovery;
pub mod error;
pub mod health;
pub mod hooks;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod store;
pub mod validator;

pub use config::{
    EnvironmentOverlay, GlobalConfig, HealthPolicy, HotReloadPolicy, ManagerOverrides,
    PersistedConfig, SecurityPolicy,
};
pub use discovery::{Discovery, ModuleDescriptor};
pub use error::{LifecycleError, Result, ValidationError};
pub use health::{FailureCounter, HealthRecord, HealthTracker, HealthVerdict};
pub use hooks::HookDispatcher;
pub use loader::{ModuleLoader, NativeModule, NativeModuleLoader, NATIVE_EXTENSION};
pub use manager::{LifecycleManager, ManagerState};
pub use registry::{DynModule, ModuleRegistry};
pub use store::{ConfigChangeCallback, ConfigStore};
pub use validator::Validator;

/// Version of this host, compared against `min_host_version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
