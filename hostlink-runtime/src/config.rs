//! Bridge settings and configuration files.
//!
//! A configuration file is YAML with two optional sections:
//!
//! ```yaml
//! runtime:
//!   max_memory_pages: 512
//!   fuel_enabled: true
//! bridge:
//!   import_module: hostlink
//!   table_capacity: 4096
//!   finalizers: manual
//! ```
//!
//! Environment variables (`HOSTLINK_*`) override file values.

use crate::runtime::RuntimeConfig;
use hostlink_core::error::{HostlinkError, Result};
use hostlink_core::table::{DEFAULT_CAPACITY, MAX_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default import namespace.
pub const DEFAULT_IMPORT_MODULE: &str = "hostlink";

/// Default start export.
pub const DEFAULT_START_EXPORT: &str = "__hostlink_start";

/// When queued finalizers are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizerPolicy {
    /// After every top-level export call made through the bridge.
    #[default]
    AfterEachCall,
    /// Only when the embedder calls `Bridge::collect`.
    Manual,
}

/// Per-bridge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Module namespace of every import.
    pub import_module: String,
    /// Export called once after instantiation.
    pub start_export: String,
    /// Maximum number of live handles.
    pub table_capacity: u32,
    /// When finalizers run.
    pub finalizers: FinalizerPolicy,
    /// Timeout for fetching modules by URL, in milliseconds.
    pub fetch_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            import_module: DEFAULT_IMPORT_MODULE.to_string(),
            start_export: DEFAULT_START_EXPORT.to_string(),
            table_capacity: DEFAULT_CAPACITY,
            finalizers: FinalizerPolicy::default(),
            fetch_timeout_ms: 30_000,
        }
    }
}

impl BridgeConfig {
    /// Set the import namespace.
    pub fn with_import_module(mut self, module: impl Into<String>) -> Self {
        self.import_module = module.into();
        self
    }

    /// Set the start export.
    pub fn with_start_export(mut self, export: impl Into<String>) -> Self {
        self.start_export = export.into();
        self
    }

    /// Set the handle capacity.
    pub fn with_table_capacity(mut self, capacity: u32) -> Self {
        self.table_capacity = capacity;
        self
    }

    /// Set the finalizer policy.
    pub fn with_finalizers(mut self, policy: FinalizerPolicy) -> Self {
        self.finalizers = policy;
        self
    }

    /// Set the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Fetch timeout as a duration.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Reject values the bridge cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.import_module.is_empty() {
            return Err(HostlinkError::ConfigValue {
                field: "import_module".to_string(),
                cause: "must not be empty".to_string(),
            });
        }
        if self.start_export.is_empty() {
            return Err(HostlinkError::ConfigValue {
                field: "start_export".to_string(),
                cause: "must not be empty".to_string(),
            });
        }
        if self.table_capacity == 0 || self.table_capacity > MAX_CAPACITY {
            return Err(HostlinkError::ConfigValue {
                field: "table_capacity".to_string(),
                cause: format!("{} is outside 1..={MAX_CAPACITY}", self.table_capacity),
            });
        }
        Ok(())
    }
}

/// Complete configuration: engine plus bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostlinkConfig {
    /// Engine settings.
    pub runtime: RuntimeConfig,
    /// Bridge settings.
    pub bridge: BridgeConfig,
}

impl HostlinkConfig {
    /// Parse YAML text.
    pub fn from_yaml_str(yaml: &str, origin: &Path) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| HostlinkError::ConfigParse {
            path: origin.to_path_buf(),
            cause: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file and apply environment overrides.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| HostlinkError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        let mut config = Self::from_yaml_str(&yaml, path)?;
        config.apply_env_overrides()?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Apply `HOSTLINK_*` environment variables.
    ///
    /// - `HOSTLINK_MAX_MEMORY_PAGES`
    /// - `HOSTLINK_FUEL` (enables fuel with the given amount)
    /// - `HOSTLINK_CACHE_MODULES`
    /// - `HOSTLINK_IMPORT_MODULE`
    /// - `HOSTLINK_TABLE_CAPACITY`
    /// - `HOSTLINK_FETCH_TIMEOUT_MS`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(pages) = parse_var(&lookup, "HOSTLINK_MAX_MEMORY_PAGES")? {
            self.runtime.max_memory_pages = pages;
        }
        if let Some(fuel) = parse_var(&lookup, "HOSTLINK_FUEL")? {
            self.runtime.fuel_enabled = true;
            self.runtime.fuel_amount = fuel;
        }
        if let Some(cache) = parse_var(&lookup, "HOSTLINK_CACHE_MODULES")? {
            self.runtime.cache_modules = cache;
        }
        if let Some(module) = lookup("HOSTLINK_IMPORT_MODULE") {
            self.bridge.import_module = module;
        }
        if let Some(capacity) = parse_var(&lookup, "HOSTLINK_TABLE_CAPACITY")? {
            self.bridge.table_capacity = capacity;
        }
        if let Some(timeout) = parse_var(&lookup, "HOSTLINK_FETCH_TIMEOUT_MS")? {
            self.bridge.fetch_timeout_ms = timeout;
        }
        self.validate()
    }

    /// Validate both sections.
    pub fn validate(&self) -> Result<()> {
        self.runtime.validate()?;
        self.bridge.validate()
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| HostlinkError::ConfigValue {
                field: name.to_string(),
                cause: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = HostlinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bridge.import_module, "hostlink");
        assert_eq!(config.bridge.finalizers, FinalizerPolicy::AfterEachCall);
    }

    #[test]
    fn yaml_sections_are_optional() {
        let yaml = "bridge:\n  table_capacity: 16\n  finalizers: manual\n";
        let config = HostlinkConfig::from_yaml_str(yaml, Path::new("inline")).unwrap();
        assert_eq!(config.bridge.table_capacity, 16);
        assert_eq!(config.bridge.finalizers, FinalizerPolicy::Manual);
        assert_eq!(config.runtime, RuntimeConfig::default());
    }

    #[test]
    fn invalid_yaml_reports_path() {
        let err = HostlinkConfig::from_yaml_str("bridge: [", Path::new("bad.yaml")).unwrap_err();
        assert_eq!(err.code(), "E802");
        assert!(err.to_string().contains("bad.yaml"));

        let err =
            HostlinkConfig::from_yaml_str("bridge:\n  table_capacity: 0\n", Path::new("zero.yaml"))
                .unwrap_err();
        assert_eq!(err.code(), "E801");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "runtime:\n  max_memory_pages: 32\n  fuel_enabled: false").unwrap();
        let config = HostlinkConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.runtime.max_memory_pages, 32);

        let missing = HostlinkConfig::from_yaml_file(Path::new("/nonexistent/hostlink.yaml"));
        assert!(matches!(missing, Err(HostlinkError::Io { .. })));
    }

    #[test]
    fn overrides_apply_and_validate() {
        let vars: HashMap<&str, &str> = [
            ("HOSTLINK_FUEL", "5000"),
            ("HOSTLINK_IMPORT_MODULE", "env"),
            ("HOSTLINK_TABLE_CAPACITY", "64"),
        ]
        .into_iter()
        .collect();

        let mut config = HostlinkConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert!(config.runtime.fuel_enabled);
        assert_eq!(config.runtime.fuel_amount, 5000);
        assert_eq!(config.bridge.import_module, "env");
        assert_eq!(config.bridge.table_capacity, 64);

        let err = config
            .apply_overrides(|name| (name == "HOSTLINK_MAX_MEMORY_PAGES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, HostlinkError::ConfigValue { ref field, .. } if field == "HOSTLINK_MAX_MEMORY_PAGES"));
    }
}
