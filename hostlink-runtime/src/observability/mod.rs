//! Structured logging for hosts embedding a guest.
//!
//! Output format is chosen with `HOSTLINK_LOG_FORMAT`:
//! - `json` - one JSON object per event
//! - `pretty` - multi-line, default on a terminal
//! - `compact` - single line
//!
//! Every event emitted while a guest runs carries the `bridge_id` of its
//! bridge, so several guests can share one log stream.
//!
//! # Example
//!
//! ```ignore
//! use hostlink_runtime::observability::{TracingConfig, init_tracing};
//!
//! let _guard = init_tracing(TracingConfig::from_env())?;
//! ```

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig, TracingConfigBuilder};
pub use tracing_setup::{TracingGuard, init_tracing};

/// Span covering one top-level call into a guest export.
#[macro_export]
macro_rules! instrument_export {
    ($bridge_id:expr, $export:expr) => {
        tracing::debug_span!("guest_export", bridge_id = %$bridge_id, export = $export)
    };
}

/// Span covering one module load.
#[macro_export]
macro_rules! instrument_load {
    ($source:expr) => {
        tracing::info_span!("module_load", source = %$source)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.log_format(), LogFormat::Compact);
        assert_eq!(config.log_filter(), "info");
        assert!(!config.span_close_events());
    }

    #[test]
    fn config_builder() {
        let config = TracingConfig::builder()
            .log_format(LogFormat::Json)
            .log_filter("debug,wasmtime=warn")
            .include_location(true)
            .build();

        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.log_filter(), "debug,wasmtime=warn");
        assert!(config.include_location());
        assert!(config.include_target());
    }

    #[test]
    fn format_parsing_falls_back_to_compact() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("fancy".parse::<LogFormat>().unwrap(), LogFormat::Compact);
    }

    #[test]
    fn config_from_env_does_not_panic() {
        let config = TracingConfig::from_env();
        assert!(!config.log_filter().is_empty());
    }
}
