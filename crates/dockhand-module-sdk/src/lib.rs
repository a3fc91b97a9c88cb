//! Dockhand Module SDK
//!
//! This SDK defines the contract between the Dockhand host and its
//! dynamically loaded extension modules.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dockhand_module_sdk::prelude::*;
//!
//! #[derive(Default)]
//! struct MyModule;
//!
//! #[async_trait]
//! impl Module for MyModule {
//!     fn info(&self) -> ModuleInfo {
//!         ModuleInfo::new("my-module", "1.0.0").with_description("My module")
//!     }
//!
//!     async fn initialize(&mut self, _config: &ModuleConfig) -> ModuleResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! export_module!(MyModule);
//! ```
//!
//! # FFI Exports
//!
//! `export_module!` generates the two symbols the host resolves:
//! - `dockhand_module_abi_version()` -> u32
//! - `dockhand_module_create()` -> *mut Box<dyn Module>
//!
//! The instance crosses the boundary as a Rust trait object, so modules must
//! be built with the same compiler release as the host.

pub mod error;
pub mod event;
#[macro_use]
pub mod macros;
pub mod module;
pub mod types;

pub use error::{ModuleError, ModuleResult};
pub use event::{Event, EventType, Hook, HookHandler};
pub use module::{
    Module, ModuleAbiVersionFn, ModuleCreateFn, ABI_VERSION_SYMBOL, CREATE_SYMBOL,
    MODULE_ABI_VERSION,
};
pub use types::{
    Dependency, DependencyKind, HealthState, HealthStatus, ModuleConfig, ModuleInfo,
    ModuleType, ToolDescriptor, ToolHandler, ToolSpec,
};

/// Re-exports for module authors.
pub mod prelude {
    pub use crate::error::{ModuleError, ModuleResult};
    pub use crate::event::{Event, EventType, Hook};
    pub use crate::module::Module;
    pub use crate::types::{
        Dependency, DependencyKind, HealthState, HealthStatus, ModuleConfig, ModuleInfo,
        ModuleType, ToolSpec,
    };
    pub use crate::export_module;
    pub use async_trait::async_trait;
    pub use serde_json::{json, Value};
}

// Lets modules implement `Module` without a direct async-trait dependency.
pub use async_trait::async_trait;
