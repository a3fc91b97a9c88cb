//! Module loaders.
//!
//! A loader turns a file found on a search path into a live `Module`
//! instance. The native loader opens shared libraries built with
//! `export_module!`; other loaders (tests, sandboxes) plug in through the
//! same trait.

mod native;

use std::path::Path;

use dockhand_module_sdk::Module;

use crate::error::Result;

pub use native::{NativeModule, NativeModuleLoader};

/// Shared library extension for the current platform.
#[cfg(target_os = "macos")]
pub const NATIVE_EXTENSION: &str = "dylib";
#[cfg(target_os = "windows")]
pub const NATIVE_EXTENSION: &str = "dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const NATIVE_EXTENSION: &str = "so";

/// Opens module files and instantiates them.
pub trait ModuleLoader: Send + Sync {
    /// File extensions (without the dot) this loader accepts.
    fn extensions(&self) -> &[&str];

    /// Open `path` and build a fresh, uninitialized instance.
    fn open(&self, path: &Path) -> Result<Box<dyn Module>>;

    fn handles(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions().contains(&ext))
    }
}
