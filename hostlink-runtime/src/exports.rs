//! Guest exports the bridge depends on.

use crate::host::HostState;
use hostlink_core::error::{HostlinkError, Result};
use wasmtime::{AsContextMut, Instance, Memory, Table, TypedFunc};

/// Linear memory export.
pub const MEMORY: &str = "memory";
/// `malloc(size, align) -> ptr`.
pub const MALLOC: &str = "__hostlink_malloc";
/// `realloc(ptr, old_size, new_size, align) -> ptr`.
pub const REALLOC: &str = "__hostlink_realloc";
/// `free(ptr, size, align)`, optional.
pub const FREE: &str = "__hostlink_free";
/// `exn_store(handle)`, optional.
pub const EXN_STORE: &str = "__hostlink_exn_store";
/// Function table holding closure invokers and destructors.
pub const FUNCTION_TABLE: &str = "__indirect_function_table";

/// Name of the free export for objects of `class`.
pub fn class_free_export(class: &str) -> String {
    format!("__hostlink_{}_free", class.to_lowercase())
}

/// Resolved guest exports. Cheap to clone: every field is a store handle.
#[derive(Clone)]
pub struct GuestExports {
    /// Linear memory.
    pub memory: Memory,
    /// Allocator.
    pub malloc: TypedFunc<(u32, u32), u32>,
    /// Reallocator.
    pub realloc: TypedFunc<(u32, u32, u32, u32), u32>,
    /// Deallocator.
    pub free: Option<TypedFunc<(u32, u32, u32), ()>>,
    /// Exception slot setter.
    pub exn_store: Option<TypedFunc<u32, ()>>,
    /// Indirect function table.
    pub function_table: Option<Table>,
    /// Start function.
    pub start: TypedFunc<(), ()>,
    instance: Instance,
}

impl GuestExports {
    /// Look up and type-check every export.
    pub fn resolve(
        mut store: impl AsContextMut<Data = HostState>,
        instance: Instance,
        start_export: &str,
    ) -> Result<Self> {
        let memory = instance
            .get_memory(&mut store, MEMORY)
            .ok_or_else(|| HostlinkError::MissingExport {
                name: MEMORY.to_string(),
                cause: "module does not export a memory".to_string(),
            })?;

        let malloc = required(&mut store, &instance, MALLOC)?;
        let realloc = required(&mut store, &instance, REALLOC)?;
        let start = required(&mut store, &instance, start_export)?;
        let free = optional(&mut store, &instance, FREE)?;
        let exn_store = optional(&mut store, &instance, EXN_STORE)?;
        let function_table = instance.get_table(&mut store, FUNCTION_TABLE);

        Ok(Self {
            memory,
            malloc,
            realloc,
            free,
            exn_store,
            function_table,
            start,
            instance,
        })
    }

    /// The free export for objects of `class`, if the guest has one.
    pub fn class_free(
        &self,
        mut store: impl AsContextMut<Data = HostState>,
        class: &str,
    ) -> Result<Option<TypedFunc<(u32, u32), ()>>> {
        optional(&mut store, &self.instance, &class_free_export(class))
    }

    /// The function table, required once closures are in play.
    pub fn function_table(&self) -> Result<Table> {
        self.function_table.ok_or_else(|| HostlinkError::MissingExport {
            name: FUNCTION_TABLE.to_string(),
            cause: "closures need an exported function table".to_string(),
        })
    }

    /// The instance the exports belong to.
    pub fn instance(&self) -> Instance {
        self.instance
    }
}

/// Convert an error returned by a guest call.
///
/// A host import that failed with a [`HostlinkError`] surfaces as that error
/// again; any other trap becomes [`HostlinkError::GuestTrap`].
pub fn guest_error(function: &str, err: wasmtime::Error) -> HostlinkError {
    match err.downcast::<HostlinkError>() {
        Ok(inner) => inner,
        Err(err) => HostlinkError::GuestTrap {
            function: function.to_string(),
            cause: format!("{err:#}"),
        },
    }
}

fn required<P, R>(
    store: impl AsContextMut<Data = HostState>,
    instance: &Instance,
    name: &str,
) -> Result<TypedFunc<P, R>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    instance
        .get_typed_func::<P, R>(store, name)
        .map_err(|e| HostlinkError::MissingExport {
            name: name.to_string(),
            cause: e.to_string(),
        })
}

fn optional<P, R>(
    mut store: impl AsContextMut<Data = HostState>,
    instance: &Instance,
    name: &str,
) -> Result<Option<TypedFunc<P, R>>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    match instance.get_func(&mut store, name) {
        None => Ok(None),
        Some(func) => func
            .typed::<P, R>(&store)
            .map(Some)
            .map_err(|e| HostlinkError::MissingExport {
                name: name.to_string(),
                cause: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_free_export_name() {
        assert_eq!(class_free_export("JsOwner"), "__hostlink_jsowner_free");
    }

    #[test]
    fn guest_error_keeps_host_errors() {
        let err = wasmtime::Error::new(HostlinkError::ClosureDropped).context("in 'call1'");
        assert!(matches!(
            guest_error("run", err),
            HostlinkError::ClosureDropped
        ));

        let err = guest_error("run", wasmtime::Error::msg("unreachable"));
        assert_eq!(err.code(), "E601");
        assert!(err.to_string().contains("'run'"));
    }
}
