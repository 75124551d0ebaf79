//! hostlink CLI - load a guest module and call its exports.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hostlink_runtime::observability::{LogFormat, TracingConfig, TracingGuard, init_tracing};
use std::path::PathBuf;

/// hostlink - run WebAssembly guests against host values.
#[derive(Parser)]
#[command(name = "hostlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a module and call exports on it
    Run {
        /// Path or http(s) URL of the module
        module: String,

        /// Export to call after start, may be repeated
        #[arg(short, long = "call")]
        calls: Vec<String>,

        /// YAML configuration file
        #[arg(short = 'C', long)]
        config: Option<PathBuf>,

        /// JSON message queued on the channel before the calls, may be repeated
        #[arg(short, long = "message")]
        messages: Vec<String>,
    },

    /// List a module's imports and exports and check them against the host
    Inspect {
        /// Path to the module
        module: PathBuf,

        /// Import namespace to check against
        #[arg(long, default_value = "hostlink")]
        import_module: String,
    },

    /// Show version information
    Version,
}

fn setup_logging(verbosity: u8) -> Result<TracingGuard> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let log_format = std::env::var("HOSTLINK_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse::<LogFormat>().ok())
        .unwrap_or_else(|| {
            if std::io::IsTerminal::is_terminal(&std::io::stdout()) {
                LogFormat::Pretty
            } else {
                LogFormat::Compact
            }
        });

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| filter.to_string());

    let config = TracingConfig::builder()
        .log_format(log_format)
        .log_filter(log_filter)
        .build();

    Ok(init_tracing(config)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Run {
            module,
            calls,
            config,
            messages,
        } => commands::run::run(&module, &calls, config.as_deref(), &messages).await,
        Commands::Inspect {
            module,
            import_module,
        } => commands::inspect::run(&module, &import_module),
        Commands::Version => commands::version::run(),
    }
}
