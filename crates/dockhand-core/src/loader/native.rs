//! Shared-library loader built on libloading.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dockhand_module_sdk::{
    HealthStatus, Hook, Module, ModuleAbiVersionFn, ModuleConfig, ModuleCreateFn, ModuleInfo,
    ModuleResult, ToolSpec, ABI_VERSION_SYMBOL, CREATE_SYMBOL, MODULE_ABI_VERSION,
};
use libloading::{Library, Symbol};

use super::{ModuleLoader, NATIVE_EXTENSION};
use crate::error::{LifecycleError, Result};

/// Loads modules exported with `export_module!`.
#[derive(Debug, Default)]
pub struct NativeModuleLoader {
    _private: (),
}

impl NativeModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModuleLoader for NativeModuleLoader {
    fn extensions(&self) -> &[&str] {
        &[NATIVE_EXTENSION]
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Module>> {
        // SAFETY: running library initializers is inherent to loading a module;
        // the validator has already vetted the path.
        let library = unsafe { Library::new(path) }
            .map_err(|e| LifecycleError::load_failed(path, format!("open failed: {}", e)))?;

        let found = unsafe {
            let abi: Symbol<ModuleAbiVersionFn> = library
                .get(ABI_VERSION_SYMBOL)
                .map_err(|e| LifecycleError::load_failed(path, format!("missing ABI symbol: {}", e)))?;
            abi()
        };
        if found != MODULE_ABI_VERSION {
            return Err(LifecycleError::AbiMismatch {
                path: path.to_path_buf(),
                expected: MODULE_ABI_VERSION,
                found,
            });
        }

        let raw = unsafe {
            let create: Symbol<ModuleCreateFn> = library
                .get(CREATE_SYMBOL)
                .map_err(|e| LifecycleError::load_failed(path, format!("missing factory symbol: {}", e)))?;
            create()
        };
        if raw.is_null() {
            return Err(LifecycleError::load_failed(path, "factory returned null"));
        }

        // SAFETY: the pointer comes from Box::into_raw in export_module!.
        let instance = unsafe { *Box::from_raw(raw) };
        tracing::debug!(path = %path.display(), "Opened native module");

        Ok(Box::new(NativeModule {
            instance,
            library: Arc::new(library),
        }))
    }
}

/// A module instance paired with the library that holds its code.
///
/// Field order matters: the instance drops before the library.
/// Tool and hook handlers keep their own reference to the library.
pub struct NativeModule {
    instance: Box<dyn Module>,
    library: Arc<Library>,
}

#[async_trait]
impl Module for NativeModule {
    fn info(&self) -> ModuleInfo {
        self.instance.info()
    }

    async fn initialize(&mut self, config: &ModuleConfig) -> ModuleResult<()> {
        self.instance.initialize(config).await
    }

    fn tools(&self) -> Vec<ToolSpec> {
        self.instance
            .tools()
            .into_iter()
            .map(|tool| {
                let library = self.library.clone();
                let schema = tool.input_schema.clone();
                ToolSpec::new(tool.name.clone(), tool.description.clone(), move |args| {
                    let library = library.clone();
                    let call = tool.invoke(args);
                    async move {
                        let out = call.await;
                        drop(library);
                        out
                    }
                })
                .with_input_schema(schema)
            })
            .collect()
    }

    fn hooks(&self) -> Vec<Hook> {
        self.instance
            .hooks()
            .into_iter()
            .map(|hook| {
                let library = self.library.clone();
                Hook::new(hook.event_type, move |event| {
                    let library = library.clone();
                    let call = hook.invoke(event);
                    async move {
                        let out = call.await;
                        drop(library);
                        out
                    }
                })
            })
            .collect()
    }

    async fn cleanup(&mut self) -> ModuleResult<()> {
        self.instance.cleanup().await
    }

    async fn health(&self) -> HealthStatus {
        self.instance.health().await
    }
}
