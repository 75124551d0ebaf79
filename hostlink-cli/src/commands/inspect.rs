//! Inspect command - show what a module imports and exports.

use anyhow::{Context, Result};
use hostlink_runtime::Runtime;
use hostlink_runtime::exports::{FREE, FUNCTION_TABLE, MALLOC, MEMORY, REALLOC};
use hostlink_runtime::imports::build_linker;
use std::path::Path;
use wasmtime::ExternType;

/// Start export looked for when reporting.
const START: &str = "__hostlink_start";

/// Run the inspect command.
pub fn run(module: &Path, import_module: &str) -> Result<()> {
    tracing::info!(module = %module.display(), "Inspecting module");

    let runtime = Runtime::with_defaults()?;
    let compiled = runtime
        .compile_file(module)
        .with_context(|| format!("Failed to compile {}", module.display()))?;
    let wasm = compiled.module();

    println!("Module Information");
    println!("==================");
    println!("Name:  {}", compiled.name());
    println!("Hash:  {:016x}", compiled.hash());
    println!();

    let imports: Vec<_> = wasm.imports().collect();
    println!("Imports ({})", imports.len());
    for import in &imports {
        let marker = if import.module() == import_module { ' ' } else { '?' };
        println!(
            " {marker} {}::{}  {}",
            import.module(),
            import.name(),
            describe(&import.ty())
        );
    }
    println!();

    let exports: Vec<_> = wasm.exports().collect();
    println!("Exports ({})", exports.len());
    for export in &exports {
        println!("   {}  {}", export.name(), describe(&export.ty()));
    }
    println!();

    println!("Host Requirements");
    let exported = |name: &str| exports.iter().any(|export| export.name() == name);
    for name in [MEMORY, MALLOC, REALLOC, FREE, START] {
        let status = if exported(name) { "ok" } else { "MISSING" };
        println!("  {name:<28} {status}");
    }
    let table = if exported(FUNCTION_TABLE) {
        "ok"
    } else {
        "absent (closures unavailable)"
    };
    println!("  {FUNCTION_TABLE:<28} {table}");

    let linker = build_linker(runtime.engine(), import_module)?;
    match linker.instantiate_pre(wasm) {
        Ok(_) => println!("  {:<28} ok", "imports"),
        Err(e) => println!("  {:<28} {e:#}", "imports"),
    }

    Ok(())
}

fn describe(ty: &ExternType) -> String {
    match ty {
        ExternType::Func(func) => {
            let params: Vec<String> = func.params().map(|p| p.to_string()).collect();
            let results: Vec<String> = func.results().map(|r| r.to_string()).collect();
            format!("func({}) -> ({})", params.join(", "), results.join(", "))
        }
        ExternType::Memory(memory) => format!("memory(min {} pages)", memory.minimum()),
        ExternType::Table(table) => format!("table(min {})", table.minimum()),
        ExternType::Global(global) => format!("global({})", global.content()),
        #[allow(unreachable_patterns)]
        _ => "other".to_string(),
    }
}
