//! Native component loading
//!
//! Resolves the compiled component's exported entry points with
//! `libloading`, handling platform-specific library naming conventions
//! and search paths. A loaded [`NativeComponent`] keeps the library
//! mapped for as long as any entry-point pointer taken from it may be
//! called.

use libloading::{Library, Symbol};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::abi::{
    BufferAllocFn, BufferFreeFn, BufferReserveFn, CallbackRegisterFn, ObjectFreeFn,
};
use crate::buffer::BufferAllocator;

/// Component loading errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// Library file not found in any search path.
    #[error("native component not found: {0}")]
    NotFound(String),
    /// The dynamic loader rejected the library.
    #[error("failed to load native component: {0}")]
    LoadFailed(String),
    /// A required export is missing.
    #[error("symbol '{symbol}' not exported by component '{component}'")]
    SymbolMissing { component: String, symbol: String },
}

/// Locates and loads native components.
///
/// Resolution handles platform naming (`lib{name}.so`, `lib{name}.dylib`,
/// `{name}.dll`) across the configured search paths; an absolute path is
/// used as given.
pub struct ComponentLoader {
    search_paths: Vec<PathBuf>,
}

impl ComponentLoader {
    /// A loader searching the current working directory.
    pub fn new() -> Self {
        let mut search_paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            search_paths.push(cwd);
        }
        Self { search_paths }
    }

    /// Add a custom search path (prepended, highest priority).
    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.insert(0, path);
    }

    /// Platform-specific filename candidates for a component name.
    fn candidate_filenames(name: &str) -> Vec<String> {
        if cfg!(target_os = "windows") {
            vec![format!("{name}.dll"), format!("lib{name}.dll")]
        } else if cfg!(target_os = "macos") {
            vec![
                format!("lib{name}.dylib"),
                format!("lib{name}.so"),
                format!("{name}.dylib"),
            ]
        } else {
            vec![format!("lib{name}.so"), format!("{name}.so")]
        }
    }

    /// Resolve a component name or path to an existing file.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_absolute() && direct.exists() {
            return Some(direct.to_path_buf());
        }
        for search_path in &self.search_paths {
            for filename in Self::candidate_filenames(name) {
                let full = search_path.join(&filename);
                if full.exists() {
                    return Some(full);
                }
            }
        }
        None
    }

    /// Load a component and resolve its buffer entry points
    /// (`{prefix}_buffer_alloc` / `_free` / `_reserve`).
    ///
    /// # Safety
    ///
    /// Loading a dynamic library runs its initialization code in-process;
    /// the caller must trust the component. Uses of the resolved entry
    /// points additionally trust that the component implements the
    /// documented ABI contract.
    pub fn load(&self, name: &str, prefix: &str) -> Result<NativeComponent, ComponentError> {
        let path = self
            .resolve(name)
            .ok_or_else(|| ComponentError::NotFound(name.to_string()))?;
        let library = unsafe {
            Library::new(&path).map_err(|e| ComponentError::LoadFailed(e.to_string()))?
        };

        let allocator = unsafe {
            let alloc: BufferAllocFn =
                *lookup(&library, name, &format!("{prefix}_buffer_alloc"))?;
            let free: BufferFreeFn = *lookup(&library, name, &format!("{prefix}_buffer_free"))?;
            let reserve: BufferReserveFn =
                *lookup(&library, name, &format!("{prefix}_buffer_reserve"))?;
            BufferAllocator::from_entry_points(alloc, free, reserve)
        };

        Ok(NativeComponent {
            library,
            name: name.to_string(),
            prefix: prefix.to_string(),
            allocator,
        })
    }
}

impl Default for ComponentLoader {
    fn default() -> Self {
        Self::new()
    }
}

unsafe fn lookup<'lib, T>(
    library: &'lib Library,
    component: &str,
    symbol: &str,
) -> Result<Symbol<'lib, T>, ComponentError> {
    library
        .get(symbol.as_bytes())
        .map_err(|_| ComponentError::SymbolMissing {
            component: component.to_string(),
            symbol: symbol.to_string(),
        })
}

/// A loaded native component: the mapped library plus its resolved
/// buffer allocator.
///
/// Entry-point pointers taken from a component are valid for as long as
/// the component value lives; dropping it unmaps the library.
pub struct NativeComponent {
    library: Library,
    name: String,
    prefix: String,
    allocator: BufferAllocator,
}

impl NativeComponent {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The component's buffer allocator, shared by every call wrapper.
    pub fn allocator(&self) -> BufferAllocator {
        self.allocator
    }

    /// Resolve the free entry point for one exposed object type
    /// (`{prefix}_{object}_free`).
    pub fn object_free_fn(&self, object: &str) -> Result<ObjectFreeFn, ComponentError> {
        let symbol = format!("{}_{}_free", self.prefix, object);
        unsafe { lookup(&self.library, &self.name, &symbol).map(|s| *s) }
    }

    /// Resolve the registration entry point for one callback interface
    /// (`{prefix}_{interface}_init_callback`).
    pub fn callback_register_fn(
        &self,
        interface: &str,
    ) -> Result<CallbackRegisterFn, ComponentError> {
        let symbol = format!("{}_{}_init_callback", self.prefix, interface);
        unsafe { lookup(&self.library, &self.name, &symbol).map(|s| *s) }
    }

    /// Resolve an arbitrary interface-method entry point.
    ///
    /// # Safety
    ///
    /// The caller must ensure `T` is exactly the exported function's
    /// signature, argument order, widths, and trailing status parameter
    /// included.
    pub unsafe fn entry_point<T>(&self, name: &str) -> Result<Symbol<'_, T>, ComponentError> {
        let symbol = format!("{}_{}", self.prefix, name);
        lookup(&self.library, &self.name, &symbol)
    }
}

impl std::fmt::Debug for NativeComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeComponent")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
