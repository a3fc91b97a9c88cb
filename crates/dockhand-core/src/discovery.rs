//! Module discovery across search paths.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dockhand_module_sdk::{ModuleInfo, ModuleType};
use serde::{Deserialize, Serialize};

use crate::config::expand_home;
use crate::error::{LifecycleError, Result};
use crate::loader::ModuleLoader;

/// Discovery-time record of a module file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub module_type: ModuleType,
    pub info: ModuleInfo,
    pub enabled: bool,
    /// Set once the module is loaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
}

impl ModuleDescriptor {
    pub fn new(path: impl Into<PathBuf>, info: ModuleInfo) -> Self {
        Self {
            name: info.name.clone(),
            path: path.into(),
            module_type: ModuleType::infer(&info),
            info,
            enabled: true,
            loaded_at: None,
        }
    }
}

/// Scans search paths for files a loader understands.
pub struct Discovery<'a> {
    loader: &'a dyn ModuleLoader,
    search_paths: Vec<PathBuf>,
}

impl<'a> Discovery<'a> {
    pub fn new(loader: &'a dyn ModuleLoader, search_paths: &[PathBuf]) -> Self {
        Self {
            loader,
            search_paths: search_paths.iter().map(|p| expand_home(p)).collect(),
        }
    }

    /// Describe every loadable candidate.
    ///
    /// Missing directories are ignored. Candidates that fail to open or
    /// describe themselves are logged and skipped. When two files declare
    /// the same name, the first one found wins.
    pub fn discover(&self, default_enabled: bool) -> Vec<ModuleDescriptor> {
        let mut seen = HashSet::new();
        let mut discovered = Vec::new();

        for search_path in &self.search_paths {
            if !search_path.is_dir() {
                tracing::debug!(path = %search_path.display(), "Search path does not exist, skipping");
                continue;
            }

            let mut candidates: Vec<PathBuf> = match std::fs::read_dir(search_path) {
                Ok(entries) => entries
                    .flatten()
                    .map(|entry| entry.path())
                    .filter(|path| path.is_file() && self.loader.handles(path))
                    .collect(),
                Err(e) => {
                    tracing::warn!(path = %search_path.display(), error = %e, "Failed to read search path");
                    continue;
                }
            };
            candidates.sort();

            for path in candidates {
                match self.describe(&path) {
                    Ok(info) => {
                        if !seen.insert(info.name.clone()) {
                            tracing::warn!(
                                module = %info.name,
                                path = %path.display(),
                                "Duplicate module name, keeping first"
                            );
                            continue;
                        }
                        tracing::debug!(module = %info.name, path = %path.display(), "Discovered module");
                        let mut descriptor = ModuleDescriptor::new(path, info);
                        descriptor.enabled = default_enabled;
                        discovered.push(descriptor);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping module candidate");
                    }
                }
            }
        }

        discovered
    }

    /// Open a candidate just long enough to read its metadata.
    fn describe(&self, path: &Path) -> Result<ModuleInfo> {
        let info = catch_unwind(AssertUnwindSafe(|| {
            self.loader.open(path).map(|module| module.info())
        }))
        .map_err(|_| LifecycleError::load_failed(path, "panicked while describing module"))??;

        if info.name.trim().is_empty() {
            return Err(LifecycleError::load_failed(path, "module reports an empty name"));
        }
        Ok(info)
    }
}
