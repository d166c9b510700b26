//! Dynamic Library Loader
//!
//! Safe wrapper around libloading for loading the native runtime, behind the
//! [`NativeModule`] and [`ModuleLoader`] traits so the registry can be driven
//! by other module sources.

use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use libloading::{Library, Symbol};
use parking_lot::Mutex;

use crate::error::{TclError, TclResult};

/// One OS-level loaded library.
pub trait NativeModule: Send + Sync {
    /// Path the module was loaded from
    fn path(&self) -> &Path;

    /// Opaque platform handle; zero once freed
    fn handle(&self) -> usize;

    /// Address of an exported symbol
    fn symbol(&self, name: &str) -> Option<usize>;

    /// Release the OS module. Returns whether this call freed it; later
    /// calls are no-ops.
    fn free(&self) -> bool;

    fn is_loaded(&self) -> bool {
        self.handle() != 0
    }
}

/// Source of [`NativeModule`]s.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> TclResult<Arc<dyn NativeModule>>;
}

/// A dynamically loaded library
pub struct DynamicLibrary {
    /// Path to the library
    path: PathBuf,
    /// The loaded library; `None` once freed
    library: Mutex<Option<Library>>,
    /// Raw OS handle value
    handle: AtomicUsize,
    /// Cached function symbols
    symbols: Mutex<HashMap<String, usize>>,
}

impl DynamicLibrary {
    /// Load a library from the given path
    pub fn load(path: impl AsRef<Path>) -> TclResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (library, handle) = open(&path)?;
        tracing::debug!(
            path = %path.display(),
            handle = format_args!("{:#x}", handle),
            "native module loaded"
        );
        Ok(Self {
            path,
            library: Mutex::new(Some(library)),
            handle: AtomicUsize::new(handle),
            symbols: Mutex::new(HashMap::new()),
        })
    }
}

#[cfg(unix)]
fn open(path: &Path) -> TclResult<(Library, usize)> {
    use libloading::os::unix;

    // Safety: loading runs the library's initializers. The path comes from
    // the locator and selector, which only accept recognized runtime builds.
    let library = unsafe { unix::Library::new(path) }.map_err(|e| load_failure(path, e))?;
    let raw = library.into_raw();
    // Safety: `raw` was produced by `into_raw` just above.
    let library = unsafe { unix::Library::from_raw(raw) };
    Ok((library.into(), raw as usize))
}

#[cfg(windows)]
fn open(path: &Path) -> TclResult<(Library, usize)> {
    use libloading::os::windows;

    // Safety: see the unix variant.
    let library = unsafe { windows::Library::new(path) }.map_err(|e| load_failure(path, e))?;
    let raw = library.into_raw();
    // Safety: `raw` was produced by `into_raw` just above.
    let library = unsafe { windows::Library::from_raw(raw) };
    Ok((library.into(), raw as usize))
}

fn load_failure(path: &Path, err: libloading::Error) -> TclError {
    #[cfg(windows)]
    let code = std::io::Error::last_os_error().raw_os_error();
    #[cfg(not(windows))]
    let code = None;

    TclError::NativeLoadFailure {
        path: path.to_path_buf(),
        code,
        message: err.to_string(),
    }
}

impl NativeModule for DynamicLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&self) -> usize {
        self.handle.load(Ordering::Acquire)
    }

    fn symbol(&self, name: &str) -> Option<usize> {
        // Check cache first
        if let Some(&addr) = self.symbols.lock().get(name) {
            return Some(addr);
        }

        let c_name = CString::new(name).ok()?;
        let guard = self.library.lock();
        let library = guard.as_ref()?;

        // Safety: the symbol is only read as an address here; callers give
        // it a type through the capability table.
        let symbol: Symbol<*const ()> = unsafe { library.get(c_name.as_bytes_with_nul()) }.ok()?;
        let addr = *symbol as usize;
        drop(guard);

        if addr == 0 {
            return None;
        }
        self.symbols.lock().insert(name.to_string(), addr);
        Some(addr)
    }

    fn free(&self) -> bool {
        let Some(library) = self.library.lock().take() else {
            return false;
        };
        self.handle.store(0, Ordering::Release);
        self.symbols.lock().clear();
        if let Err(err) = library.close() {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "failed to free native module"
            );
        } else {
            tracing::debug!(path = %self.path.display(), "native module freed");
        }
        true
    }
}

/// Loads modules with the operating system's dynamic loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLoader;

impl ModuleLoader for SystemLoader {
    fn load(&self, path: &Path) -> TclResult<Arc<dyn NativeModule>> {
        Ok(Arc::new(DynamicLibrary::load(path)?))
    }
}
