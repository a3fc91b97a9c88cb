//! Load-time validation of module metadata, files and dependencies.

use std::path::{Path, PathBuf};

use dockhand_module_sdk::{Dependency, DependencyKind, ModuleInfo};
use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;

use crate::config::{expand_home, GlobalConfig};
use crate::discovery::ModuleDescriptor;
use crate::error::ValidationError;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,50}$").expect("module name pattern is valid"));

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+(\.\d+)?$").expect("version pattern is valid"));

/// Install locations searched for binary dependencies when `PATH` misses.
const FALLBACK_BIN_DIRS: &[&str] = &[
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
    "/usr/sbin",
    "/sbin",
    "/opt/homebrew/bin",
    "~/.local/bin",
];

/// Running host version.
pub fn host_version() -> Version {
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 0, 0))
}

/// Gatekeeper run before every load. Performs no side effects.
#[derive(Debug, Clone)]
pub struct Validator {
    allow_unsigned: bool,
    trusted_paths: Vec<PathBuf>,
    extensions: Vec<String>,
    host_version: Version,
}

impl Validator {
    pub fn new(config: &GlobalConfig, extensions: &[&str]) -> Self {
        Self {
            allow_unsigned: config.security.allow_unsigned,
            trusted_paths: config.resolved_trusted_paths(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            host_version: host_version(),
        }
    }

    pub fn with_host_version(mut self, version: Version) -> Self {
        self.host_version = version;
        self
    }

    /// Run every check, stopping at the first failure.
    pub fn validate(
        &self,
        descriptor: &ModuleDescriptor,
        is_loaded: impl Fn(&str) -> bool,
    ) -> Result<(), ValidationError> {
        self.validate_info(&descriptor.info)?;
        self.validate_file(&descriptor.path)?;
        self.validate_dependencies(&descriptor.info.dependencies, is_loaded)?;
        self.validate_host_version(&descriptor.info)?;
        Ok(())
    }

    /// Structural checks on name, versions and required fields.
    pub fn validate_info(&self, info: &ModuleInfo) -> Result<(), ValidationError> {
        if info.name.is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if info.version.is_empty() {
            return Err(ValidationError::MissingField("version"));
        }
        if info.description.trim().is_empty() {
            return Err(ValidationError::MissingField("description"));
        }
        if !NAME_PATTERN.is_match(&info.name) {
            return Err(ValidationError::InvalidName(info.name.clone()));
        }
        check_version(&info.name, &info.version)?;
        for dep in &info.dependencies {
            check_version(&format!("dependency '{}'", dep.name), &dep.version)?;
        }
        if !info.min_host_version.is_empty() {
            check_version("min_host_version", &info.min_host_version)?;
        }
        Ok(())
    }

    /// Existence, executable bit, extension and trusted location.
    pub fn validate_file(&self, path: &Path) -> Result<(), ValidationError> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            _ => return Err(ValidationError::FileNotFound(path.to_path_buf())),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(ValidationError::NotExecutable(path.to_path_buf()));
            }
        }
        #[cfg(not(unix))]
        let _ = metadata;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !self.extensions.iter().any(|allowed| allowed == ext) {
            return Err(ValidationError::ExtensionNotAllowed(path.to_path_buf()));
        }

        if !self.allow_unsigned {
            let canonical = path
                .canonicalize()
                .map_err(|_| ValidationError::FileNotFound(path.to_path_buf()))?;
            let trusted = self.trusted_paths.iter().any(|prefix| {
                prefix
                    .canonicalize()
                    .map(|prefix| canonical.starts_with(prefix))
                    .unwrap_or(false)
            });
            if !trusted {
                return Err(ValidationError::Untrusted(path.to_path_buf()));
            }
        }

        Ok(())
    }

    /// Dependency checks by kind.
    ///
    /// Module dependencies are only reported; binaries must resolve;
    /// services are advisory.
    pub fn validate_dependencies(
        &self,
        dependencies: &[Dependency],
        is_loaded: impl Fn(&str) -> bool,
    ) -> Result<(), ValidationError> {
        for dep in dependencies {
            match dep.kind {
                DependencyKind::Module => {
                    tracing::debug!(
                        dependency = %dep.name,
                        loaded = is_loaded(&dep.name),
                        "Module dependency"
                    );
                }
                DependencyKind::Binary => {
                    if find_binary(&dep.name).is_none() {
                        return Err(ValidationError::MissingBinary(dep.name.clone()));
                    }
                }
                DependencyKind::Service => {
                    tracing::info!(dependency = %dep.name, version = %dep.version, "Service dependency is advisory");
                }
            }
        }
        Ok(())
    }

    pub fn validate_host_version(&self, info: &ModuleInfo) -> Result<(), ValidationError> {
        if info.min_host_version.is_empty() {
            return Ok(());
        }
        let required = parse_loose(&info.min_host_version).ok_or_else(|| {
            ValidationError::InvalidVersion {
                subject: "min_host_version".to_string(),
                version: info.min_host_version.clone(),
            }
        })?;
        if required > self.host_version {
            return Err(ValidationError::HostVersion {
                required: required.to_string(),
                current: self.host_version.to_string(),
            });
        }
        Ok(())
    }
}

fn check_version(subject: &str, version: &str) -> Result<(), ValidationError> {
    if VERSION_PATTERN.is_match(version) {
        Ok(())
    } else {
        Err(ValidationError::InvalidVersion {
            subject: subject.to_string(),
            version: version.to_string(),
        })
    }
}

/// Parse `MAJOR.MINOR[.PATCH]`, treating a missing patch as zero.
fn parse_loose(version: &str) -> Option<Version> {
    if version.matches('.').count() == 1 {
        Version::parse(&format!("{}.0", version)).ok()
    } else {
        Version::parse(version).ok()
    }
}

/// Locate an executable on `PATH` or a common install location.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    if let Ok(path) = which::which(name) {
        return Some(path);
    }
    FALLBACK_BIN_DIRS
        .iter()
        .map(|dir| expand_home(Path::new(dir)).join(name))
        .find(|candidate| candidate.is_file())
}
