//! Load/unload lifecycle
//!
//! [`TclRuntime`] ties the pipeline together:
//!
//! ```text
//! find ──► select ──► registry.acquire ──► bootstrap ──► interpreter ──► TclSession
//! ```
//!
//! Anything that fails after the module was acquired is rolled back before
//! the error is returned: the partial interpreter is deleted, the reference
//! is released and, if that was the last interest, the module is freed.

pub mod events;
pub mod session;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use events::{PumpOptions, PumpStats};
pub use session::{CancelHandle, TclSession};

use crate::build::TclBuild;
use crate::error::{TclError, TclResult};
use crate::ffi::{ModuleRegistry, NativeModule, TclApi, TclInterp};
use crate::find::{self, FindOptions};
use crate::platform::{HostPlatform, PlatformFacts};
use crate::select::{self, SelectOptions};

bitflags::bitflags! {
    /// Steps performed while bringing up a session.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct LoadFlags: u32 {
        /// Tell the runtime where the host executable lives
        const FIND_EXECUTABLE = 1 << 0;
        /// Install the runtime's memory debugging commands
        const INIT_MEMORY = 1 << 1;
        /// Make the interpreter safe after initialization
        const SAFE = 1 << 2;
        /// Skip the standard initializer
        const NO_INITIALIZE = 1 << 3;
        /// Reject runtimes built without thread support
        const REQUIRE_THREADED = 1 << 4;
        /// Use the self-contained kit initializers
        const KIT_INITIALIZE = 1 << 5;

        const DEFAULT = Self::FIND_EXECUTABLE.bits();
    }
}

impl Default for LoadFlags {
    fn default() -> Self {
        LoadFlags::DEFAULT
    }
}

bitflags::bitflags! {
    /// Steps performed while tearing a session down.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct UnloadFlags: u32 {
        /// Unload even while the interpreter is evaluating
        const FORCE = 1 << 0;
        /// Called from the runtime's own exit path; never finalize
        const FROM_EXIT_HANDLER = 1 << 1;
        /// Finalize the runtime when the module goes away
        const FINALIZE = 1 << 2;
        /// Free the OS module when it goes away
        const FREE_LIBRARY = 1 << 3;

        const DEFAULT = Self::FINALIZE.bits() | Self::FREE_LIBRARY.bits();
    }
}

impl Default for UnloadFlags {
    fn default() -> Self {
        UnloadFlags::DEFAULT
    }
}

/// Inputs for a full load.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub find: FindOptions,
    pub flags: LoadFlags,
    /// Value passed to the runtime's executable lookup
    pub argv0: Option<String>,
}

impl LoadOptions {
    pub fn new(find: FindOptions) -> Self {
        Self {
            find,
            ..Self::default()
        }
    }

    pub fn with_flags(mut self, flags: LoadFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Result of a successful unload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnloadOutcome {
    /// The session was the last interest; the module left the registry
    Unloaded { finalized: bool, freed: bool },
    /// The session is gone but other sessions or pumps still hold the module
    Released { remaining: usize },
}

/// Pieces created so far by a load, for rollback.
struct Partial {
    api: Option<Arc<TclApi>>,
    interp: *mut TclInterp,
}

struct Initialized {
    api: Arc<TclApi>,
    patch_level: String,
    threaded: bool,
}

/// Entry point for loading and unloading native runtimes.
#[derive(Clone)]
pub struct TclRuntime {
    registry: Arc<ModuleRegistry>,
    platform: Arc<dyn PlatformFacts>,
}

impl std::fmt::Debug for TclRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TclRuntime")
            .field("modules", &self.registry.loaded_modules())
            .field("os_family", &self.platform.os_family())
            .finish()
    }
}

impl TclRuntime {
    pub fn new(registry: Arc<ModuleRegistry>, platform: Arc<dyn PlatformFacts>) -> Self {
        Self { registry, platform }
    }

    /// Runtime over the process-wide registry and the host platform
    pub fn system() -> Self {
        Self::new(ModuleRegistry::global(), Arc::new(HostPlatform))
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn platform(&self) -> &dyn PlatformFacts {
        self.platform.as_ref()
    }

    /// Find, select and load the best build.
    pub fn load(&self, options: &LoadOptions) -> TclResult<TclSession> {
        let outcome = find::find(&options.find, self.platform())?;
        let select_options = SelectOptions::new(options.find.flags, options.find.bounds.clone());
        let build = match select::select(&outcome.catalog, &select_options, self.platform()) {
            Ok(build) => build,
            Err(TclError::NoCandidates(rejected)) => {
                let mut diagnostics = outcome.diagnostics;
                diagnostics.extend(rejected);
                return Err(TclError::NoCandidates(diagnostics));
            }
            Err(err) => return Err(err),
        };
        self.load_build(build, options)
    }

    /// Load into an empty slot; an occupied slot is left alone.
    pub fn load_into(&self, slot: &mut Option<TclSession>, options: &LoadOptions) -> TclResult<()> {
        if let Some(session) = slot {
            return Err(TclError::AlreadyLoaded(format!(
                "a session for \"{}\" is still live",
                session.path().display()
            )));
        }
        *slot = Some(self.load(options)?);
        Ok(())
    }

    /// Load a specific, already selected build.
    pub fn load_build(&self, build: TclBuild, options: &LoadOptions) -> TclResult<TclSession> {
        let module = self.registry.acquire(&build.path, true)?;
        let mut partial = Partial {
            api: None,
            interp: std::ptr::null_mut(),
        };

        match self.initialize(&build, module.as_ref(), options, &mut partial) {
            Ok(initialized) => {
                tracing::info!(
                    path = %build.path.display(),
                    patch_level = %initialized.patch_level,
                    threaded = initialized.threaded,
                    "runtime loaded"
                );
                Ok(TclSession::new(
                    initialized.api,
                    module,
                    Arc::clone(&self.registry),
                    build,
                    partial.interp,
                    initialized.patch_level,
                    initialized.threaded,
                ))
            }
            Err(err) => {
                drop(module);
                self.rollback(&build.path, partial, &err);
                Err(err)
            }
        }
    }

    fn initialize(
        &self,
        build: &TclBuild,
        module: &dyn NativeModule,
        options: &LoadOptions,
        partial: &mut Partial,
    ) -> TclResult<Initialized> {
        let flags = options.flags;
        let api = Arc::new(TclApi::bootstrap(module)?);
        partial.api = Some(Arc::clone(&api));

        let (version, _) = api.get_version();
        if let Some(reason) = options.find.bounds.violation(&version) {
            return Err(TclError::UnsuitableVersion {
                path: build.path.clone(),
                version,
                reason,
            });
        }

        if flags.contains(LoadFlags::FIND_EXECUTABLE) {
            api.find_executable(options.argv0.as_deref())?;
        }
        if flags.contains(LoadFlags::KIT_INITIALIZE) {
            api.kit_set_path(&build.path)?;
        }

        let interp = api.create_interp();
        if interp.is_null() {
            return Err(TclError::AllocationFailure(format!(
                "could not create interpreter in \"{}\"",
                build.path.display()
            )));
        }
        partial.interp = interp;

        // Safety: the interpreter was just created on this thread and has
        // not been handed out yet.
        unsafe {
            if api.has_interp_active() {
                let level = api.interp_active(interp)?;
                if level != 0 {
                    return Err(TclError::StillActive(format!(
                        "new interpreter reports nesting level {}",
                        level
                    )));
                }
            }

            let threaded = api
                .get_var(interp, "tcl_platform", Some("threaded"))?
                .is_some_and(|v| v != "0");
            if flags.contains(LoadFlags::REQUIRE_THREADED) && !threaded {
                return Err(TclError::UnsuitableArchitecture(format!(
                    "\"{}\" was built without thread support",
                    build.path.display()
                )));
            }

            if flags.contains(LoadFlags::INIT_MEMORY) {
                api.init_memory(interp)?;
            }

            if !flags.contains(LoadFlags::NO_INITIALIZE) {
                let result = if flags.contains(LoadFlags::KIT_INITIALIZE) {
                    api.kit_app_init(interp)?
                } else {
                    api.init(interp)
                };
                result.map_err(|message| init_failure(build.path(), "initialization", message))?;
            }

            if flags.contains(LoadFlags::SAFE) {
                api.make_safe(interp)?
                    .map_err(|message| init_failure(build.path(), "safe initialization", message))?;
            }

            let patch_level = api
                .get_var(interp, "tcl_patchLevel", None)?
                .unwrap_or_else(|| version.to_string());
            Ok(Initialized {
                api: Arc::clone(&api),
                patch_level,
                threaded,
            })
        }
    }

    fn rollback(&self, path: &Path, partial: Partial, cause: &TclError) {
        tracing::warn!(path = %path.display(), error = %cause, "load failed, rolling back");
        if let Some(api) = &partial.api {
            if !partial.interp.is_null() {
                // Safety: the interpreter belongs to this thread and was
                // never shared.
                unsafe {
                    if !api.interp_deleted(partial.interp) {
                        api.delete_interp(partial.interp);
                    }
                }
            }
        }
        let outcome = self.registry.release(path, true, false);
        if let Some(module) = outcome.removed {
            if !module.free() {
                tracing::warn!(path = %path.display(), "module was already freed during rollback");
            }
        }
    }

    /// Tear down the session in `slot`.
    ///
    /// On success the slot is emptied. A session that is still evaluating
    /// is left untouched unless [`UnloadFlags::FORCE`] is given.
    pub fn unload(
        &self,
        slot: &mut Option<TclSession>,
        flags: UnloadFlags,
    ) -> TclResult<UnloadOutcome> {
        let Some(session) = slot.as_mut() else {
            return Err(TclError::AlreadyDeleted("no session to unload".to_string()));
        };
        let outcome = session.close(flags)?;
        *slot = None;
        Ok(outcome)
    }
}

fn init_failure(path: &Path, step: &str, message: String) -> TclError {
    TclError::NativeLoadFailure {
        path: path.to_path_buf(),
        code: None,
        message: format!("{} failed: {}", step, message),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::build::tests::sample;
    use crate::ffi::ModuleLoader;

    struct BareModule {
        path: PathBuf,
        handle: AtomicUsize,
    }

    impl NativeModule for BareModule {
        fn path(&self) -> &Path {
            &self.path
        }

        fn handle(&self) -> usize {
            self.handle.load(Ordering::SeqCst)
        }

        fn symbol(&self, _name: &str) -> Option<usize> {
            None
        }

        fn free(&self) -> bool {
            self.handle.swap(0, Ordering::SeqCst) != 0
        }
    }

    #[derive(Default)]
    struct BareLoader {
        loaded: parking_lot::Mutex<HashMap<PathBuf, Arc<BareModule>>>,
    }

    impl ModuleLoader for BareLoader {
        fn load(&self, path: &Path) -> TclResult<Arc<dyn NativeModule>> {
            let module = Arc::new(BareModule {
                path: path.to_path_buf(),
                handle: AtomicUsize::new(0x4000),
            });
            self.loaded.lock().insert(path.to_path_buf(), Arc::clone(&module));
            Ok(module)
        }
    }

    fn runtime() -> (Arc<BareLoader>, TclRuntime) {
        let loader = Arc::new(BareLoader::default());
        let registry = Arc::new(ModuleRegistry::new(loader.clone()));
        (loader, TclRuntime::new(registry, Arc::new(HostPlatform)))
    }

    #[test]
    fn test_default_flags() {
        assert_eq!(LoadFlags::default(), LoadFlags::FIND_EXECUTABLE);
        assert!(UnloadFlags::default().contains(UnloadFlags::FINALIZE | UnloadFlags::FREE_LIBRARY));
        assert!(!UnloadFlags::default().contains(UnloadFlags::FORCE));
    }

    #[test]
    fn test_bootstrap_failure_rolls_back() {
        let (loader, runtime) = runtime();
        let build = sample("/fake/libtcl8.6.so", "8.6.13");
        let err = runtime.load_build(build, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, TclError::AbiUnavailable(_)));

        let path = Path::new("/fake/libtcl8.6.so");
        assert!(!runtime.registry().contains(path));
        let module = loader.loaded.lock().get(path).cloned().unwrap();
        assert!(!module.is_loaded());
    }

    #[test]
    fn test_rollback_keeps_other_references() {
        let (loader, runtime) = runtime();
        let path = Path::new("/fake/libtcl8.6.so");
        runtime.registry().acquire(path, true).unwrap();

        let build = sample("/fake/libtcl8.6.so", "8.6.13");
        assert!(runtime.load_build(build, &LoadOptions::default()).is_err());
        assert_eq!(runtime.registry().reference_count(path), Some(1));
        assert!(loader.loaded.lock()[path].is_loaded());
    }

    #[test]
    fn test_unload_empty_slot() {
        let (_, runtime) = runtime();
        let mut slot = None;
        let err = runtime.unload(&mut slot, UnloadFlags::DEFAULT).unwrap_err();
        assert!(matches!(err, TclError::AlreadyDeleted(_)));
    }

    #[test]
    fn test_pump_requires_loaded_module() {
        let (_, runtime) = runtime();
        let err = runtime
            .pump_events(Path::new("/fake/libtcl8.6.so"), &PumpOptions::default())
            .unwrap_err();
        assert!(matches!(err, TclError::NotFound(_)));
    }

    #[test]
    fn test_pump_bootstrap_failure_releases_lock() {
        let (_, runtime) = runtime();
        let path = Path::new("/fake/libtcl8.6.so");
        runtime.registry().acquire(path, true).unwrap();
        assert!(runtime.pump_events(path, &PumpOptions::default()).is_err());
        assert_eq!(runtime.registry().reference_count(path), Some(1));
        assert_eq!(runtime.registry().lock_count(path), Some(0));
    }

    #[test]
    fn test_flags_text_form() {
        let flags: LoadFlags = bitflags::parser::from_str("SAFE | NO_INITIALIZE").unwrap();
        assert!(flags.contains(LoadFlags::SAFE));
        assert!(!flags.contains(LoadFlags::FIND_EXECUTABLE));
    }
}
