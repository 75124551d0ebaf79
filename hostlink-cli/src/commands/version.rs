//! Version command - show version information.

use anyhow::Result;

/// Version information.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command.
pub fn run() -> Result<()> {
    println!("hostlink - host-side value marshaling for WebAssembly guests");
    println!();
    println!("Version:     {}", VERSION);
    println!(
        "Platform:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!();
    println!("Components:");
    println!("  hostlink-core     Reference table, string codec, closures, owned handles");
    println!("  hostlink-runtime  wasmtime imports, bridge and loader");
    println!("  hostlink-cli      Command-line interface");

    Ok(())
}
