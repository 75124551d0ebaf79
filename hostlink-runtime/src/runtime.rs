//! Engine configuration, module compilation and caching.

use dashmap::DashMap;
use hostlink_core::error::{HostlinkError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use wasmtime::{Config, Engine, Module, StoreLimits, StoreLimitsBuilder};

/// Size of one wasm page.
pub const WASM_PAGE_SIZE: u64 = 64 * 1024;

/// Default maximum memory pages (64 KB per page).
const DEFAULT_MAX_MEMORY_PAGES: u32 = 1024; // 64 MB

/// Default fuel amount for execution limiting.
const DEFAULT_FUEL: u64 = 10_000_000;

/// Default epoch deadline, in ticks.
const DEFAULT_EPOCH_DEADLINE: u64 = 1;

/// Engine-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum linear memory per guest, in 64 KB pages.
    pub max_memory_pages: u32,
    /// Whether execution consumes fuel.
    pub fuel_enabled: bool,
    /// Fuel given to each new store.
    pub fuel_amount: u64,
    /// Whether guests can be interrupted by the engine epoch.
    pub epoch_interruption: bool,
    /// Epoch ticks a store may run before trapping.
    pub epoch_deadline: u64,
    /// Whether compiled modules are cached by content hash.
    pub cache_modules: bool,
    /// Whether to keep DWARF debug info.
    pub debug_info: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
            fuel_enabled: false,
            fuel_amount: DEFAULT_FUEL,
            epoch_interruption: false,
            epoch_deadline: DEFAULT_EPOCH_DEADLINE,
            cache_modules: true,
            debug_info: false,
        }
    }
}

impl RuntimeConfig {
    /// Settings for long-running hosts.
    pub fn production() -> Self {
        Self::default()
    }

    /// Tighter limits and no caching, for tests.
    pub fn testing() -> Self {
        Self {
            max_memory_pages: 256, // 16 MB
            fuel_enabled: true,
            fuel_amount: 1_000_000,
            epoch_interruption: false,
            epoch_deadline: DEFAULT_EPOCH_DEADLINE,
            cache_modules: false,
            debug_info: true,
        }
    }

    /// Set maximum memory pages.
    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages;
        self
    }

    /// Enable or disable fuel-based limiting.
    pub fn with_fuel(mut self, enabled: bool, amount: u64) -> Self {
        self.fuel_enabled = enabled;
        self.fuel_amount = amount;
        self
    }

    /// Enable epoch interruption with the given deadline in ticks.
    pub fn with_epoch_interruption(mut self, enabled: bool, deadline: u64) -> Self {
        self.epoch_interruption = enabled;
        self.epoch_deadline = deadline;
        self
    }

    /// Enable or disable module caching.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_modules = enabled;
        self
    }

    /// Reject values the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_pages == 0 || self.max_memory_pages > 65_536 {
            return Err(HostlinkError::ConfigValue {
                field: "max_memory_pages".to_string(),
                cause: format!("{} is outside 1..=65536", self.max_memory_pages),
            });
        }
        if self.fuel_enabled && self.fuel_amount == 0 {
            return Err(HostlinkError::ConfigValue {
                field: "fuel_amount".to_string(),
                cause: "fuel is enabled but the amount is zero".to_string(),
            });
        }
        Ok(())
    }

    fn to_wasmtime_config(&self) -> Config {
        let mut config = Config::new();
        config.epoch_interruption(self.epoch_interruption);
        config.consume_fuel(self.fuel_enabled);
        config.debug_info(self.debug_info);
        config.strategy(wasmtime::Strategy::Cranelift);
        config
    }
}

/// A compiled module ready for instantiation.
pub struct CompiledModule {
    name: String,
    module: Module,
    /// Hash of the original bytes, the cache key.
    hash: u64,
}

impl CompiledModule {
    /// Name given at compile time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wasmtime module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Content hash.
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("name", &self.name)
            .field("hash", &format_args!("{:016x}", self.hash))
            .finish()
    }
}

/// Shared engine plus module cache.
pub struct Runtime {
    engine: Engine,
    config: RuntimeConfig,
    module_cache: DashMap<u64, Arc<CompiledModule>>,
}

impl Runtime {
    /// Create a runtime.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let engine = Engine::new(&config.to_wasmtime_config()).map_err(|e| {
            HostlinkError::Compile {
                module: "engine".to_string(),
                cause: e.to_string(),
            }
        })?;

        Ok(Self {
            engine,
            config,
            module_cache: DashMap::new(),
        })
    }

    /// Create a runtime with default settings.
    pub fn with_defaults() -> Result<Self> {
        Self::new(RuntimeConfig::default())
    }

    /// The wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Runtime settings.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Compile module bytes, reusing a cached compilation when possible.
    pub fn compile(&self, name: &str, wasm_bytes: &[u8]) -> Result<Arc<CompiledModule>> {
        let hash = hash_bytes(wasm_bytes);

        if self.config.cache_modules {
            if let Some(cached) = self.module_cache.get(&hash) {
                tracing::debug!(module = name, hash, "Module cache hit");
                return Ok(Arc::clone(&cached));
            }
        }

        let module = Module::new(&self.engine, wasm_bytes).map_err(|e| HostlinkError::Compile {
            module: name.to_string(),
            cause: e.to_string(),
        })?;
        tracing::debug!(module = name, bytes = wasm_bytes.len(), "Module compiled");

        let compiled = Arc::new(CompiledModule {
            name: name.to_string(),
            module,
            hash,
        });

        if self.config.cache_modules {
            self.module_cache.insert(hash, Arc::clone(&compiled));
        }

        Ok(compiled)
    }

    /// Read and compile a module file.
    pub fn compile_file(&self, path: &Path) -> Result<Arc<CompiledModule>> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");

        let wasm_bytes = std::fs::read(path).map_err(|e| HostlinkError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;

        self.compile(name, &wasm_bytes)
    }

    /// Validate module bytes without compiling them.
    pub fn validate(&self, wasm_bytes: &[u8]) -> Result<()> {
        Module::validate(&self.engine, wasm_bytes).map_err(|e| HostlinkError::Compile {
            module: "validation".to_string(),
            cause: e.to_string(),
        })
    }

    /// Drop every cached module.
    pub fn clear_cache(&self) {
        self.module_cache.clear();
    }

    /// Number of cached modules.
    pub fn cache_size(&self) -> usize {
        self.module_cache.len()
    }

    /// Fuel for a new store, if fuel is enabled.
    pub fn initial_fuel(&self) -> Option<u64> {
        self.config.fuel_enabled.then_some(self.config.fuel_amount)
    }

    /// Resource limits for a new store.
    pub fn store_limits(&self) -> StoreLimits {
        StoreLimitsBuilder::new()
            .memory_size((self.config.max_memory_pages as u64 * WASM_PAGE_SIZE) as usize)
            .instances(1)
            .build()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("cached_modules", &self.module_cache.len())
            .finish()
    }
}

/// Cache key for module bytes.
fn hash_bytes(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
