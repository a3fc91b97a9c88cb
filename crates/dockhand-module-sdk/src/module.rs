//! The `Module` trait and the native ABI constants.

use async_trait::async_trait;

use crate::error::ModuleResult;
use crate::event::Hook;
use crate::types::{HealthStatus, ModuleConfig, ModuleInfo, ToolSpec};

/// ABI version written by `export_module!` and checked by the host loader.
pub const MODULE_ABI_VERSION: u32 = 1;

/// Symbol returning the module's ABI version.
pub const ABI_VERSION_SYMBOL: &[u8] = b"dockhand_module_abi_version\0";

/// Symbol constructing the module instance.
pub const CREATE_SYMBOL: &[u8] = b"dockhand_module_create\0";

pub type ModuleAbiVersionFn = unsafe extern "C" fn() -> u32;

#[allow(improper_ctypes_definitions)]
pub type ModuleCreateFn = unsafe extern "C" fn() -> *mut Box<dyn Module>;

/// A loadable extension module.
///
/// The host calls `info` during discovery, `initialize` once when loading,
/// `tools` and `hooks` after a successful initialize, `health` periodically
/// and `cleanup` when unloading.
#[async_trait]
pub trait Module: Send + Sync {
    /// Module metadata. Must be cheap and must not depend on `initialize`.
    fn info(&self) -> ModuleInfo;

    /// Prepare the module with its effective configuration.
    async fn initialize(&mut self, config: &ModuleConfig) -> ModuleResult<()>;

    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    fn hooks(&self) -> Vec<Hook> {
        Vec::new()
    }

    /// Release resources. Called at most once per successful initialize.
    async fn cleanup(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::healthy()
    }
}
