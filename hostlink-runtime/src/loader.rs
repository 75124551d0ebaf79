//! Module loading and the bridge lifecycle.
//!
//! A [`Loader`] moves through `Uninitialized -> Instantiating -> Ready`.
//! Once ready, every further `init` returns the same bridge. A failed or
//! cancelled initialization returns the loader to `Uninitialized`.

use crate::bridge::Bridge;
use crate::config::{BridgeConfig, HostlinkConfig};
use crate::host::HostEnv;
use crate::runtime::{CompiledModule, Runtime};
use hostlink_core::error::{HostlinkError, Result};
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

/// MIME type required for streaming compilation.
pub const WASM_MIME: &str = "application/wasm";

/// `\0asm` followed by version 1.
const WASM_HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

/// A bridge shared between the loader and its users.
pub type SharedBridge = Arc<Mutex<Bridge>>;

/// Where module bytes come from.
pub enum ModuleSource {
    /// Raw module bytes.
    Bytes(Vec<u8>),
    /// An already compiled module.
    Compiled(Arc<CompiledModule>),
    /// A file on disk.
    File(PathBuf),
    /// A URL fetched with the loader's HTTP client.
    Url(String),
    /// A response the embedder already received.
    Response(reqwest::Response),
}

impl ModuleSource {
    fn describe(&self) -> String {
        match self {
            Self::Bytes(bytes) => format!("{} bytes", bytes.len()),
            Self::Compiled(module) => format!("compiled module '{}'", module.name()),
            Self::File(path) => path.display().to_string(),
            Self::Url(url) => url.clone(),
            Self::Response(response) => response.url().to_string(),
        }
    }
}

impl fmt::Debug for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleSource({})", self.describe())
    }
}

impl From<Vec<u8>> for ModuleSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Arc<CompiledModule>> for ModuleSource {
    fn from(module: Arc<CompiledModule>) -> Self {
        Self::Compiled(module)
    }
}

impl From<PathBuf> for ModuleSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<reqwest::Response> for ModuleSource {
    fn from(response: reqwest::Response) -> Self {
        Self::Response(response)
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderStatus {
    /// No module loaded.
    Uninitialized,
    /// A load is in flight.
    Instantiating,
    /// A bridge is available.
    Ready,
}

enum LoaderState {
    Uninitialized,
    Instantiating,
    Ready(SharedBridge),
}

/// Loads one guest module and keeps its bridge.
pub struct Loader {
    runtime: Arc<Runtime>,
    config: BridgeConfig,
    env: HostEnv,
    client: reqwest::Client,
    state: Mutex<LoaderState>,
}

impl Loader {
    /// Create a loader.
    pub fn new(runtime: Arc<Runtime>, config: BridgeConfig, env: HostEnv) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .build()
            .map_err(|e| HostlinkError::Fetch {
                url: String::new(),
                cause: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            runtime,
            config,
            env,
            client,
            state: Mutex::new(LoaderState::Uninitialized),
        })
    }

    /// Create a runtime and loader from a complete configuration.
    pub fn from_config(config: HostlinkConfig, env: HostEnv) -> Result<Self> {
        let runtime = Arc::new(Runtime::new(config.runtime)?);
        Self::new(runtime, config.bridge, env)
    }

    /// The shared runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Current lifecycle state.
    pub fn status(&self) -> LoaderStatus {
        match &*self.state.lock() {
            LoaderState::Uninitialized => LoaderStatus::Uninitialized,
            LoaderState::Instantiating => LoaderStatus::Instantiating,
            LoaderState::Ready(_) => LoaderStatus::Ready,
        }
    }

    /// The bridge, once ready.
    pub fn bridge(&self) -> Option<SharedBridge> {
        match &*self.state.lock() {
            LoaderState::Ready(bridge) => Some(Arc::clone(bridge)),
            _ => None,
        }
    }

    /// Load synchronously from bytes or a compiled module.
    ///
    /// Other sources need I/O and go through [`init`](Self::init).
    pub fn init_sync(&self, source: impl Into<ModuleSource>) -> Result<SharedBridge> {
        let source = source.into();
        let span = crate::instrument_load!(source.describe());
        let _enter = span.enter();

        let guard = match self.begin()? {
            Begin::Ready(bridge) => return Ok(bridge),
            Begin::Started(guard) => guard,
        };

        let module = match source {
            ModuleSource::Bytes(bytes) => self.runtime.compile("module", &bytes)?,
            ModuleSource::Compiled(module) => module,
            other => {
                return Err(HostlinkError::ConfigValue {
                    field: "source".to_string(),
                    cause: format!("{other:?} needs the async loader"),
                });
            }
        };

        let bridge = self.instantiate(&module)?;
        Ok(guard.finish(bridge))
    }

    /// Load from any source.
    ///
    /// Returns the existing bridge when already ready and
    /// [`HostlinkError::LoaderBusy`] while another load is in flight.
    pub async fn init(&self, source: impl Into<ModuleSource>) -> Result<SharedBridge> {
        let source = source.into();
        let span = crate::instrument_load!(source.describe());

        async move {
            let guard = match self.begin()? {
                Begin::Ready(bridge) => return Ok(bridge),
                Begin::Started(guard) => guard,
            };

            let module = self.compile_source(source).await?;
            let bridge = self.instantiate(&module)?;
            Ok(guard.finish(bridge))
        }
        .instrument(span)
        .await
    }

    fn begin(&self) -> Result<Begin<'_>> {
        let mut state = self.state.lock();
        if let LoaderState::Ready(bridge) = &*state {
            return Ok(Begin::Ready(Arc::clone(bridge)));
        }
        if matches!(*state, LoaderState::Instantiating) {
            return Err(HostlinkError::LoaderBusy);
        }
        *state = LoaderState::Instantiating;
        Ok(Begin::Started(InitGuard {
            loader: self,
            finished: false,
        }))
    }

    fn instantiate(&self, module: &CompiledModule) -> Result<Bridge> {
        Bridge::instantiate(&self.runtime, module, &self.config, self.env.clone())
    }

    async fn compile_source(&self, source: ModuleSource) -> Result<Arc<CompiledModule>> {
        match source {
            ModuleSource::Compiled(module) => Ok(module),
            ModuleSource::Bytes(bytes) => self.compile_bytes("module".to_string(), bytes).await,
            ModuleSource::File(path) => {
                let bytes = tokio::fs::read(&path).await.map_err(|e| HostlinkError::Io {
                    path: path.clone(),
                    cause: e.to_string(),
                })?;
                self.compile_bytes(module_name_from_path(&path), bytes).await
            }
            ModuleSource::Url(url) => {
                tracing::debug!(%url, "Fetching module");
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| HostlinkError::Fetch {
                        url: url.clone(),
                        cause: e.to_string(),
                    })?;
                self.compile_response(response).await
            }
            ModuleSource::Response(response) => self.compile_response(response).await,
        }
    }

    async fn compile_response(&self, response: reqwest::Response) -> Result<Arc<CompiledModule>> {
        let url = response.url().clone();
        let name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .unwrap_or("module")
            .to_string();
        let bytes = read_response(response).await?;
        self.compile_bytes(name, bytes).await
    }

    /// Compile off the async executor.
    async fn compile_bytes(&self, name: String, bytes: Vec<u8>) -> Result<Arc<CompiledModule>> {
        let runtime = Arc::clone(&self.runtime);
        let task_name = name.clone();
        tokio::task::spawn_blocking(move || runtime.compile(&task_name, &bytes))
            .await
            .map_err(|e| HostlinkError::Compile {
                module: name,
                cause: format!("compile task failed: {e}"),
            })?
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("status", &self.status())
            .field("config", &self.config)
            .finish()
    }
}

enum Begin<'a> {
    Ready(SharedBridge),
    Started(InitGuard<'a>),
}

/// Returns the loader to `Uninitialized` unless the load finished.
struct InitGuard<'a> {
    loader: &'a Loader,
    finished: bool,
}

impl InitGuard<'_> {
    fn finish(mut self, bridge: Bridge) -> SharedBridge {
        let shared = Arc::new(Mutex::new(bridge));
        *self.loader.state.lock() = LoaderState::Ready(Arc::clone(&shared));
        self.finished = true;
        shared
    }
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("Module load did not complete, loader reset");
            *self.loader.state.lock() = LoaderState::Uninitialized;
        }
    }
}

/// Read a module response, streaming when it is served as `application/wasm`.
async fn read_response(mut response: reqwest::Response) -> Result<Vec<u8>> {
    let url = response.url().to_string();
    let status = response.status();
    if !status.is_success() {
        return Err(HostlinkError::HttpStatus {
            url,
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !content_type.starts_with(WASM_MIME) {
        let err = HostlinkError::MimeType { content_type };
        tracing::warn!(%url, error = %err, "Falling back to buffered instantiation");
        let bytes = response.bytes().await.map_err(|e| HostlinkError::Fetch {
            url: url.clone(),
            cause: e.to_string(),
        })?;
        check_header(&bytes)?;
        return Ok(bytes.to_vec());
    }

    let mut bytes = Vec::new();
    let mut header_checked = false;
    while let Some(chunk) = response.chunk().await.map_err(|e| HostlinkError::Fetch {
        url: url.clone(),
        cause: e.to_string(),
    })? {
        bytes.extend_from_slice(&chunk);
        if !header_checked && bytes.len() >= WASM_HEADER.len() {
            check_header(&bytes)?;
            header_checked = true;
        }
    }
    if !header_checked {
        check_header(&bytes)?;
    }

    tracing::debug!(%url, bytes = bytes.len(), "Module streamed");
    Ok(bytes)
}

/// Check the magic number and version.
pub fn check_header(bytes: &[u8]) -> Result<()> {
    let Some(header) = bytes.get(..WASM_HEADER.len()) else {
        return Err(HostlinkError::BadMagic {
            cause: format!("only {} bytes received", bytes.len()),
        });
    };
    if header[..4] != WASM_HEADER[..4] {
        return Err(HostlinkError::BadMagic {
            cause: format!("magic number is {:02x?}", &header[..4]),
        });
    }
    if header[4..] != WASM_HEADER[4..] {
        return Err(HostlinkError::BadMagic {
            cause: format!("unsupported version {:02x?}", &header[4..]),
        });
    }
    Ok(())
}

fn module_name_from_path(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("module")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_check() {
        assert!(check_header(&WASM_HEADER).is_ok());
        assert!(check_header(b"\0asm\x01\0\0\0\x01\x02").is_ok());

        let err = check_header(b"<html>\n<body>").unwrap_err();
        assert_eq!(err.code(), "E508");
        assert!(err.to_string().contains("magic"));

        let err = check_header(b"\0asm\x02\0\0\0").unwrap_err();
        assert!(err.to_string().contains("version"));

        let err = check_header(b"\0as").unwrap_err();
        assert!(err.to_string().contains("only 3 bytes"));
    }

    #[test]
    fn sync_init_rejects_remote_sources() {
        let loader = Loader::new(
            Arc::new(Runtime::with_defaults().unwrap()),
            BridgeConfig::default(),
            HostEnv::default(),
        )
        .unwrap();

        let err = loader
            .init_sync(ModuleSource::Url("http://localhost/app.wasm".to_string()))
            .unwrap_err();
        assert_eq!(err.code(), "E801");
        assert_eq!(loader.status(), LoaderStatus::Uninitialized);
    }

    #[test]
    fn failed_init_resets_state() {
        let loader = Loader::new(
            Arc::new(Runtime::with_defaults().unwrap()),
            BridgeConfig::default(),
            HostEnv::default(),
        )
        .unwrap();

        let err = loader.init_sync(b"not wasm".to_vec()).unwrap_err();
        assert_eq!(err.code(), "E501");
        assert_eq!(loader.status(), LoaderStatus::Uninitialized);
        assert!(loader.bridge().is_none());
    }

    #[test]
    fn module_names() {
        assert_eq!(module_name_from_path(Path::new("/srv/app.wasm")), "app.wasm");
        assert_eq!(module_name_from_path(Path::new("/")), "module");
    }
}
