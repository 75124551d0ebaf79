//! Run command - load a module and call its exports.

use anyhow::{Context, Result};
use hostlink_runtime::{
    FormSelection, HostEnv, HostServices, HostlinkConfig, InMemoryChannel, Loader, ModuleSource,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Run the run command.
pub async fn run(
    module: &str,
    calls: &[String],
    config: Option<&Path>,
    messages: &[String],
) -> Result<()> {
    let config = match config {
        Some(path) => HostlinkConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => {
            let mut config = HostlinkConfig::default();
            config.apply_env_overrides()?;
            config
        }
    };

    let channel = Arc::new(InMemoryChannel::new());
    for message in messages {
        let json: serde_json::Value = serde_json::from_str(message)
            .with_context(|| format!("Message is not valid JSON: {message}"))?;
        channel.push_json(&json);
    }
    let services = HostServices::new()
        .with_channel(channel.clone())
        .with_selection(Arc::new(FormSelection));

    let loader = Loader::from_config(config, HostEnv::with_services(services))?;
    let source = if module.starts_with("http://") || module.starts_with("https://") {
        ModuleSource::Url(module.to_string())
    } else {
        ModuleSource::File(PathBuf::from(module))
    };

    tracing::info!(module, "Loading module");
    let bridge = loader
        .init(source)
        .await
        .with_context(|| format!("Failed to load {module}"))?;
    {
        let bridge = bridge.lock();
        println!("Loaded {} ({})", bridge.module_name(), bridge.id());
    }

    // Guest code runs synchronously; keep it off the async workers.
    let calls = calls.to_vec();
    let outcome = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut bridge = bridge.lock();
        for export in &calls {
            let result = bridge
                .call_with_values(export, &[])
                .with_context(|| format!("Call to '{export}' failed"))?;
            match result {
                Some(value) => println!("{export} -> {}", value.debug_string()),
                None => println!("{export} -> (no value)"),
            }
            if let Some(exception) = bridge.take_exception() {
                println!("{export} left an uncaught exception: {}", exception.debug_string());
            }
        }
        let finalized = bridge.collect();
        tracing::debug!(finalized, "Final collection");
        if let Some(fuel) = bridge.fuel_remaining() {
            println!("Fuel remaining: {fuel}");
        }
        Ok(())
    })
    .await
    .context("Guest task panicked")?;
    outcome?;

    for message in channel.drain_sent_json() {
        println!("sent: {message}");
    }

    Ok(())
}
