//! Error types for hostlink.
//!
//! Every variant carries a stable code (`E###`) and the identifiers needed to
//! find the failing handle, pointer or export. Host-side exceptions raised by
//! host functions are *not* errors of this type: they are [`HostValue`]s that
//! travel back to the guest through the exception protocol. This enum covers
//! failures of the marshaling layer itself.
//!
//! [`HostValue`]: crate::value::HostValue

use crate::types::Handle;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for hostlink operations.
#[derive(Error, Debug)]
pub enum HostlinkError {
    // =========================================================================
    // Codec Errors (E100-E199)
    // =========================================================================
    /// A byte range in guest memory was not valid UTF-8.
    #[error("E101: Invalid UTF-8 in guest string at {ptr:#x} (len {len}): {cause}")]
    InvalidUtf8 {
        /// Start of the range in linear memory.
        ptr: u32,
        /// Length of the range in bytes.
        len: u32,
        /// Decoder message.
        cause: String,
    },

    /// A string or array does not fit the 32-bit guest address space.
    #[error("E102: Value of {len} bytes does not fit in guest memory")]
    EncodeOverflow {
        /// Size that was requested.
        len: usize,
    },

    // =========================================================================
    // Reference Table Errors (E200-E299)
    // =========================================================================
    /// Handle was dropped, reused, or never allocated.
    #[error("E201: Stale or unknown handle {handle}")]
    StaleHandle {
        /// The offending handle.
        handle: Handle,
    },

    /// Reference table cannot grow any further.
    #[error("E202: Reference table is full ({capacity} slots)")]
    TableFull {
        /// Configured slot capacity.
        capacity: u32,
    },

    /// A value had the wrong kind for the requested operation.
    #[error("E203: Expected {expected}, found {found} for handle {handle}")]
    TypeMismatch {
        /// The handle that was inspected.
        handle: Handle,
        /// What the operation needed.
        expected: &'static str,
        /// What was stored.
        found: &'static str,
    },

    // =========================================================================
    // Memory Errors (E300-E399)
    // =========================================================================
    /// Access outside the current linear memory.
    #[error("E301: Guest memory access out of bounds: offset={offset}, len={len}, memory size={size}")]
    OutOfBounds {
        /// Start offset.
        offset: u64,
        /// Length of the access.
        len: u64,
        /// Current memory size in bytes.
        size: u64,
    },

    /// The guest allocator failed or returned a null pointer.
    #[error("E302: Guest allocation failed: requested {requested} bytes: {cause}")]
    GuestAlloc {
        /// Number of bytes requested.
        requested: u64,
        /// Reason for the failure.
        cause: String,
    },

    // =========================================================================
    // Closure Errors (E400-E499)
    // =========================================================================
    /// A closure was entered again while an outer call still holds its state.
    #[error("E401: Closure invoked recursively or after being dropped")]
    ClosureRecursive,

    /// A closure was called after the guest released it.
    #[error("E402: Closure was already dropped by the guest")]
    ClosureDropped,

    // =========================================================================
    // Load Errors (E500-E599)
    // =========================================================================
    /// Module bytes could not be compiled.
    #[error("E501: Failed to compile module '{module}': {cause}")]
    Compile {
        /// Module name or source.
        module: String,
        /// Compiler message.
        cause: String,
    },

    /// Response was not served as `application/wasm`.
    #[error("E502: Streaming instantiation requires 'application/wasm', got '{content_type}'")]
    MimeType {
        /// Content type that was served.
        content_type: String,
    },

    /// Fetching the module failed.
    #[error("E503: Failed to fetch module from {url}: {cause}")]
    Fetch {
        /// Requested URL.
        url: String,
        /// Transport message.
        cause: String,
    },

    /// Server answered with a non-success status.
    #[error("E504: Fetching {url} returned HTTP {status}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Linking or instantiation failed.
    #[error("E505: Failed to instantiate module '{module}': {cause}")]
    Instantiate {
        /// Module name.
        module: String,
        /// Linker message.
        cause: String,
    },

    /// A required export is missing or has the wrong type.
    #[error("E506: Module export '{name}' is missing or has the wrong signature: {cause}")]
    MissingExport {
        /// Export name.
        name: String,
        /// Details.
        cause: String,
    },

    /// `init` was called while another initialization was in flight.
    #[error("E507: Loader is already instantiating a module")]
    LoaderBusy,

    /// Bytes do not start with the wasm magic number and version.
    #[error("E508: Not a WebAssembly binary: {cause}")]
    BadMagic {
        /// Details about the header.
        cause: String,
    },

    // =========================================================================
    // Guest Execution Errors (E600-E699)
    // =========================================================================
    /// The guest trapped while running an export or a closure.
    #[error("E601: Guest trapped in '{function}': {cause}")]
    GuestTrap {
        /// Export or closure that trapped.
        function: String,
        /// Trap message.
        cause: String,
    },

    /// A host exception escaped to the embedder.
    #[error("E602: Uncaught host exception: {message}")]
    HostException {
        /// Debug rendering of the thrown value.
        message: String,
    },

    /// Registering a host function with the linker failed.
    #[error("E603: Host function '{function}' failed: {cause}")]
    HostFunction {
        /// Import name.
        function: String,
        /// Reason.
        cause: String,
    },

    // =========================================================================
    // Service Errors (E700-E799)
    // =========================================================================
    /// A collaborator service was not registered.
    #[error("E701: Host service '{service}' is not available")]
    ServiceUnavailable {
        /// Service name.
        service: &'static str,
    },

    /// An integer enum discriminant had no matching variant.
    #[error("E702: Invalid {kind} discriminant {value}")]
    InvalidDiscriminant {
        /// Enum name.
        kind: &'static str,
        /// Raw value.
        value: u32,
    },

    // =========================================================================
    // Configuration Errors (E800-E899)
    // =========================================================================
    /// Invalid configuration value.
    #[error("E801: Invalid configuration '{field}': {cause}")]
    ConfigValue {
        /// Field name.
        field: String,
        /// Why the value is invalid.
        cause: String,
    },

    /// Configuration file could not be parsed.
    #[error("E802: Failed to parse configuration at {path}: {cause}")]
    ConfigParse {
        /// File path.
        path: PathBuf,
        /// Parser message.
        cause: String,
    },

    // =========================================================================
    // I/O Errors (E900-E999)
    // =========================================================================
    /// File I/O error.
    #[error("E901: I/O error at {path}: {cause}")]
    Io {
        /// The path where the I/O error occurred.
        path: PathBuf,
        /// Description of the I/O error.
        cause: String,
    },
}

impl HostlinkError {
    /// Get the error code (e.g., "E101").
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUtf8 { .. } => "E101",
            Self::EncodeOverflow { .. } => "E102",
            Self::StaleHandle { .. } => "E201",
            Self::TableFull { .. } => "E202",
            Self::TypeMismatch { .. } => "E203",
            Self::OutOfBounds { .. } => "E301",
            Self::GuestAlloc { .. } => "E302",
            Self::ClosureRecursive => "E401",
            Self::ClosureDropped => "E402",
            Self::Compile { .. } => "E501",
            Self::MimeType { .. } => "E502",
            Self::Fetch { .. } => "E503",
            Self::HttpStatus { .. } => "E504",
            Self::Instantiate { .. } => "E505",
            Self::MissingExport { .. } => "E506",
            Self::LoaderBusy => "E507",
            Self::BadMagic { .. } => "E508",
            Self::GuestTrap { .. } => "E601",
            Self::HostException { .. } => "E602",
            Self::HostFunction { .. } => "E603",
            Self::ServiceUnavailable { .. } => "E701",
            Self::InvalidDiscriminant { .. } => "E702",
            Self::ConfigValue { .. } => "E801",
            Self::ConfigParse { .. } => "E802",
            Self::Io { .. } => "E901",
        }
    }

    /// Whether the caller can recover from this error without giving up.
    ///
    /// Only a MIME mismatch on the streaming path qualifies: the loader
    /// retries with buffered instantiation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MimeType { .. })
    }

    /// Whether this error leaves the module unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidUtf8 { .. }
                | Self::Compile { .. }
                | Self::Instantiate { .. }
                | Self::MissingExport { .. }
                | Self::BadMagic { .. }
                | Self::Fetch { .. }
                | Self::HttpStatus { .. }
        )
    }

    /// Whether this error came from loading a module.
    pub fn is_load_error(&self) -> bool {
        matches!(self.code().as_bytes(), [b'E', b'5', ..])
    }
}

/// Result type alias for hostlink operations.
pub type Result<T> = std::result::Result<T, HostlinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_correct() {
        let err = HostlinkError::InvalidUtf8 {
            ptr: 16,
            len: 2,
            cause: "invalid byte".to_string(),
        };
        assert_eq!(err.code(), "E101");

        let err = HostlinkError::StaleHandle {
            handle: Handle::from_raw(42),
        };
        assert_eq!(err.code(), "E201");
    }

    #[test]
    fn error_display() {
        let err = HostlinkError::OutOfBounds {
            offset: 65_530,
            len: 16,
            size: 65_536,
        };
        let msg = err.to_string();
        assert!(msg.contains("E301"));
        assert!(msg.contains("65530"));
    }

    #[test]
    fn only_mime_mismatch_is_recoverable() {
        assert!(
            HostlinkError::MimeType {
                content_type: "text/html".to_string()
            }
            .is_recoverable()
        );
        assert!(
            !HostlinkError::BadMagic {
                cause: "short".to_string()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn load_errors_are_classified() {
        assert!(HostlinkError::LoaderBusy.is_load_error());
        assert!(!HostlinkError::ClosureDropped.is_load_error());
        assert!(
            HostlinkError::Compile {
                module: "m".to_string(),
                cause: "bad".to_string()
            }
            .is_fatal()
        );
    }
}
