//! Runtime sessions and cancellation
//!
//! A [`TclSession`] owns one native interpreter created by the lifecycle. It
//! is bound to the thread that created it: every call that touches the
//! interpreter checks the caller's thread first. Cancellation is the one
//! exception and goes through a [`CancelHandle`], which any thread may use.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::{UnloadFlags, UnloadOutcome};
use crate::build::TclBuild;
use crate::error::{TclError, TclResult};
use crate::ffi::{ModuleRegistry, NativeModule, ReleaseOutcome, TclApi, TclInterp, TeardownPlan};

/// Shared between a session and its cancel handles.
#[derive(Debug, Default)]
pub(crate) struct CancelState {
    requested: AtomicBool,
    /// Cleared before the interpreter is deleted. Held across every
    /// cross-thread native call on the interpreter.
    live: Mutex<bool>,
}

impl CancelState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            requested: AtomicBool::new(false),
            live: Mutex::new(true),
        })
    }
}

/// One live interpreter on a loaded runtime module.
///
/// Sessions may be sent to other threads, but only the creating thread can
/// close one. A session dropped anywhere else leaks its interpreter and its
/// registry reference, so the module is never unloaded; the registry counts
/// these in [`ModuleRegistry::leaked_count`].
pub struct TclSession {
    api: Arc<TclApi>,
    module: Arc<dyn NativeModule>,
    registry: Arc<ModuleRegistry>,
    build: TclBuild,
    interp: *mut TclInterp,
    owner: ThreadId,
    cancel: Arc<CancelState>,
    patch_level: String,
    threaded: bool,
    closed: bool,
}

// Safety: the interpreter pointer is only dereferenced by native calls made
// after `check_thread` confirmed the caller is the creating thread.
unsafe impl Send for TclSession {}

impl fmt::Debug for TclSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TclSession")
            .field("path", &self.build.path)
            .field("interp", &self.interp)
            .field("patch_level", &self.patch_level)
            .field("threaded", &self.threaded)
            .field("closed", &self.closed)
            .finish()
    }
}

impl TclSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        api: Arc<TclApi>,
        module: Arc<dyn NativeModule>,
        registry: Arc<ModuleRegistry>,
        build: TclBuild,
        interp: *mut TclInterp,
        patch_level: String,
        threaded: bool,
    ) -> Self {
        Self {
            api,
            module,
            registry,
            build,
            interp,
            owner: thread::current().id(),
            cancel: CancelState::new(),
            patch_level,
            threaded,
            closed: false,
        }
    }

    /// The build this session was loaded from
    pub fn build(&self) -> &TclBuild {
        &self.build
    }

    pub fn path(&self) -> &Path {
        &self.build.path
    }

    /// Patch level reported by the loaded runtime
    pub fn patch_level(&self) -> &str {
        &self.patch_level
    }

    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    /// OS handle of the module backing this session
    pub fn module_handle(&self) -> usize {
        self.module.handle()
    }

    pub fn api(&self) -> &TclApi {
        &self.api
    }

    /// Raw interpreter pointer for embedding code that calls the runtime
    /// directly.
    pub fn interp(&self) -> *mut TclInterp {
        self.interp
    }

    fn check_thread(&self) -> TclResult<()> {
        if thread::current().id() != self.owner {
            return Err(TclError::WrongThread(format!(
                "session for \"{}\" belongs to {:?}",
                self.build.path.display(),
                self.owner
            )));
        }
        if self.closed {
            return Err(TclError::AlreadyDeleted(format!(
                "session for \"{}\"",
                self.build.path.display()
            )));
        }
        Ok(())
    }

    /// Whether the interpreter is in the middle of an evaluation.
    ///
    /// Runtimes without the nesting query always report idle.
    pub fn is_active(&self) -> TclResult<bool> {
        self.check_thread()?;
        if !self.api.has_interp_active() {
            return Ok(false);
        }
        // Safety: owner thread, interpreter not yet deleted.
        Ok(unsafe { self.api.interp_active(self.interp)? } > 0)
    }

    /// Read a global variable, or an element of a global array.
    pub fn get_var(&self, name: &str, element: Option<&str>) -> TclResult<Option<String>> {
        self.check_thread()?;
        // Safety: owner thread, interpreter not yet deleted.
        unsafe { self.api.get_var(self.interp, name, element) }
    }

    /// Handle that can request cancellation from any thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            api: Arc::clone(&self.api),
            interp: self.interp as usize,
            state: Arc::clone(&self.cancel),
            registry: Arc::clone(&self.registry),
            path: self.build.path.clone(),
            handle: self.module.handle(),
        }
    }

    /// Whether cancellation was requested, locally or inside the runtime.
    pub fn is_canceled(&self) -> TclResult<bool> {
        self.check_thread()?;
        if self.cancel.requested.load(Ordering::SeqCst) {
            return Ok(true);
        }
        // Safety: owner thread, interpreter not yet deleted.
        match unsafe { self.api.canceled(self.interp) } {
            Ok(canceled) => Ok(canceled),
            Err(TclError::AbiUnavailable(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Clear any pending cancellation. Calling it with nothing pending is a
    /// no-op.
    pub fn reset_cancellation(&self, force: bool) -> TclResult<()> {
        self.check_thread()?;
        self.cancel.requested.store(false, Ordering::SeqCst);
        // Safety: owner thread, interpreter not yet deleted.
        match unsafe { self.api.reset_cancellation(self.interp, force) } {
            Ok(()) | Err(TclError::AbiUnavailable(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Delete the interpreter and drop this session's module reference,
    /// tearing the module down when it was the last interest.
    pub(crate) fn close(&mut self, flags: UnloadFlags) -> TclResult<UnloadOutcome> {
        self.check_thread()?;
        if !flags.contains(UnloadFlags::FORCE) && self.is_active()? {
            return Err(TclError::StillActive(format!(
                "interpreter for \"{}\" is evaluating",
                self.build.path.display()
            )));
        }

        self.delete_interp();
        self.closed = true;

        let plan = TeardownPlan {
            finalize: flags.contains(UnloadFlags::FINALIZE)
                && !flags.contains(UnloadFlags::FROM_EXIT_HANDLER),
            free: flags.contains(UnloadFlags::FREE_LIBRARY),
        };
        let outcome = self.registry.release_for_unload(&self.build.path, plan);
        let Some(module) = outcome.removed else {
            tracing::info!(
                path = %self.build.path.display(),
                remaining = outcome.remaining,
                "session closed, module still referenced"
            );
            return Ok(UnloadOutcome::Released {
                remaining: outcome.remaining,
            });
        };
        Ok(teardown(Some(&self.api), module, plan))
    }

    fn delete_interp(&mut self) {
        if self.interp.is_null() {
            return;
        }
        // Waits out any cancel call still inside the runtime
        *self.cancel.live.lock() = false;
        // Safety: called on the owner thread with an interpreter created by
        // this module.
        unsafe {
            if !self.api.interp_deleted(self.interp) {
                self.api.delete_interp(self.interp);
            }
        }
        self.interp = std::ptr::null_mut();
    }
}

impl Drop for TclSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if thread::current().id() != self.owner {
            tracing::warn!(
                path = %self.build.path.display(),
                "session dropped on a foreign thread; interpreter leaked"
            );
            self.registry.mark_leaked(&self.build.path);
            return;
        }
        if let Err(err) = self.close(UnloadFlags::DEFAULT | UnloadFlags::FORCE) {
            tracing::warn!(
                path = %self.build.path.display(),
                error = %err,
                "implicit unload failed"
            );
        }
    }
}

/// Finalize and free a module that just left the registry.
///
/// Without an API table the finalizer cannot be reached and only the free
/// step of `plan` applies.
pub(crate) fn teardown(
    api: Option<&TclApi>,
    module: Arc<dyn NativeModule>,
    plan: TeardownPlan,
) -> UnloadOutcome {
    let finalized = match api {
        Some(api) if plan.finalize => {
            api.finalize();
            true
        }
        _ => false,
    };
    let freed = if plan.free {
        module.free()
    } else {
        // Keep the library mapped for the life of the process
        std::mem::forget(Arc::clone(&module));
        false
    };
    tracing::info!(path = %module.path().display(), finalized, freed, "module unloaded");
    UnloadOutcome::Unloaded { finalized, freed }
}

/// Run the teardown owed by a release that took the entry out of the
/// registry, using the plan the last unload recorded.
pub(crate) fn deferred_teardown(
    api: Option<&TclApi>,
    outcome: ReleaseOutcome,
) -> Option<UnloadOutcome> {
    let module = outcome.removed?;
    tracing::info!(path = %module.path().display(), "performing deferred unload");
    Some(teardown(api, module, outcome.plan))
}

/// Cross-thread cancellation for one interpreter.
#[derive(Clone)]
pub struct CancelHandle {
    api: Arc<TclApi>,
    interp: usize,
    state: Arc<CancelState>,
    registry: Arc<ModuleRegistry>,
    path: PathBuf,
    handle: usize,
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("path", &self.path)
            .field("interp", &format_args!("{:#x}", self.interp))
            .field("requested", &self.is_canceled())
            .finish()
    }
}

impl CancelHandle {
    /// Request cancellation. Returns whether the runtime itself accepted the
    /// request; the local flag is set either way.
    pub fn cancel(&self) -> TclResult<bool> {
        self.state.requested.store(true, Ordering::SeqCst);
        if !self.api.has_cancellation() {
            tracing::debug!(path = %self.path.display(), "cancellation recorded locally");
            return Ok(false);
        }

        // The owner cannot delete the interpreter, nor drop its reference,
        // while this guard is held.
        let live = self.state.live.lock();
        if !*live {
            tracing::debug!(path = %self.path.display(), "cancellation recorded locally");
            return Ok(false);
        }
        let Ok(module) = self.registry.acquire(&self.path, false) else {
            return Ok(false);
        };
        let result = if self.handle != 0 && module.handle() == self.handle {
            // Safety: the interpreter is live and the module is pinned by
            // the reference taken above; the runtime accepts cancellation
            // from any thread.
            unsafe { self.api.cancel_eval(self.interp as *mut TclInterp) }
        } else {
            Ok(false)
        };
        drop(module);
        let outcome = self.registry.release(&self.path, false, false);
        drop(live);

        deferred_teardown(Some(&self.api), outcome);
        result
    }

    /// Clear the local request flag.
    pub fn reset(&self) {
        self.state.requested.store(false, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }
}
