//! Module error types.

/// Errors returned by module code.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// Initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Execution failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not supported by this module
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Module result type
pub type ModuleResult<T> = Result<T, ModuleError>;
