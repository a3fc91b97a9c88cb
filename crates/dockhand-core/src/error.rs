//! Error types for the module lifecycle subsystem.

use std::path::PathBuf;
use std::time::Duration;

use dockhand_module_sdk::ModuleError;

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Lifecycle error types.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Module absent from discovery.
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Module not loaded: {0}")]
    NotLoaded(String),

    #[error("Module already loaded: {0}")]
    AlreadyLoaded(String),

    /// Structural, security or dependency check failed.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Module '{name}' failed to initialize: {reason}")]
    InitializationFailed { name: String, reason: String },

    /// Config parse or persistence error.
    #[error("Config error: {0}")]
    Config(String),

    #[error("{operation} of module '{name}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        name: String,
        after: Duration,
    },

    /// Library open or symbol resolution failed.
    #[error("Failed to load {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    #[error("ABI version mismatch in {path}: expected {expected}, found {found}")]
    AbiMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("Lifecycle manager not initialized")]
    NotInitialized,

    #[error("Lifecycle manager already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),
}

/// Reasons the validator rejects a module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid module name '{0}'")]
    InvalidName(String),

    #[error("invalid version '{version}' for {subject}")]
    InvalidVersion { subject: String, version: String },

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("module file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("module file is not executable: {0}")]
    NotExecutable(PathBuf),

    #[error("extension not allowed: {0}")]
    ExtensionNotAllowed(PathBuf),

    #[error("module is outside trusted paths: {0}")]
    Untrusted(PathBuf),

    #[error("required binary '{0}' not found")]
    MissingBinary(String),

    #[error("module requires host {required}, running {current}")]
    HostVersion { required: String, current: String },
}

impl LifecycleError {
    pub(crate) fn init_failed(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::InitializationFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn load_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::LoadFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
