//! Module Registry
//!
//! Path-keyed table of loaded native modules. Each entry carries a reference
//! count (logical owners) and a lock count (in-progress operations such as an
//! event pump that must finish before the module can go away).
//!
//! All bookkeeping happens under one mutex, and the registry is the only
//! place an entry is ever inserted or removed, so the rule
//! `reference_count + lock_count == 0 => absent` holds at a single point.
//! The mutex is never held across a native call other than the OS load.
//!
//! Entries are keyed by absolute path, so `./libtcl8.6.so` and its absolute
//! spelling share one entry and one set of counts.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::loader::{ModuleLoader, NativeModule, SystemLoader};
use crate::error::{TclError, TclResult};

struct ModuleEntry {
    module: Arc<dyn NativeModule>,
    reference_count: usize,
    lock_count: usize,
    /// Chosen by the most recent unload that left the entry in place
    plan: TeardownPlan,
    /// References abandoned by sessions dropped off their owner thread
    leaked: usize,
}

impl ModuleEntry {
    fn total(&self) -> usize {
        self.reference_count + self.lock_count
    }
}

/// How a module is unwound once the last interest in it is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownPlan {
    /// Call the runtime's finalizer before freeing
    pub finalize: bool,
    /// Unmap the library; otherwise it stays mapped for the process
    pub free: bool,
}

impl Default for TeardownPlan {
    fn default() -> Self {
        Self {
            finalize: true,
            free: true,
        }
    }
}

/// Result of a release or unlock.
pub struct ReleaseOutcome {
    /// Raw reference count for plain releases; reference plus lock count for
    /// unload-intent releases and unlocks
    pub remaining: usize,
    /// Set when this call removed the entry; the caller now owns the
    /// teardown of the module
    pub removed: Option<Arc<dyn NativeModule>>,
    /// Teardown recorded for the entry; only meaningful with `removed`
    pub plan: TeardownPlan,
}

impl ReleaseOutcome {
    fn untouched() -> Self {
        Self {
            remaining: 0,
            removed: None,
            plan: TeardownPlan::default(),
        }
    }
}

/// Absolute form of `path`, used as the table key.
fn module_key(path: &Path) -> Cow<'_, Path> {
    if path.is_absolute() {
        return Cow::Borrowed(path);
    }
    match std::path::absolute(path) {
        Ok(absolute) => Cow::Owned(absolute),
        Err(_) => Cow::Borrowed(path),
    }
}

/// Reference-counted table of loaded native modules
pub struct ModuleRegistry {
    loader: Arc<dyn ModuleLoader>,
    modules: Mutex<HashMap<PathBuf, ModuleEntry>>,
}

static GLOBAL: Lazy<Arc<ModuleRegistry>> =
    Lazy::new(|| Arc::new(ModuleRegistry::new(Arc::new(SystemLoader))));

impl ModuleRegistry {
    /// Create a registry that loads through `loader`
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            modules: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide registry backed by the OS loader
    pub fn global() -> Arc<ModuleRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Take a reference to the module at `path`, loading it when absent and
    /// `should_load` is set.
    ///
    /// A failed load leaves the registry untouched.
    pub fn acquire(&self, path: &Path, should_load: bool) -> TclResult<Arc<dyn NativeModule>> {
        let path = module_key(path);
        let mut modules = self.modules.lock();
        if let Some(entry) = modules.get_mut(&*path) {
            entry.reference_count += 1;
            tracing::debug!(
                path = %path.display(),
                references = entry.reference_count,
                "module reference added"
            );
            return Ok(Arc::clone(&entry.module));
        }
        if !should_load {
            return Err(not_loaded(&path));
        }

        let module = self.loader.load(&path)?;
        modules.insert(
            path.to_path_buf(),
            ModuleEntry {
                module: Arc::clone(&module),
                reference_count: 1,
                lock_count: 0,
                plan: TeardownPlan::default(),
                leaked: 0,
            },
        );
        tracing::info!(path = %path.display(), "module registered");
        Ok(module)
    }

    /// Take a reference and a lock on an already registered module.
    pub fn acquire_locked(&self, path: &Path) -> TclResult<Arc<dyn NativeModule>> {
        let path = module_key(path);
        let mut modules = self.modules.lock();
        let entry = modules.get_mut(&*path).ok_or_else(|| not_loaded(&path))?;
        entry.reference_count += 1;
        entry.lock_count += 1;
        Ok(Arc::clone(&entry.module))
    }

    /// Drop one reference.
    ///
    /// Without `unload_intent` the raw reference count is returned. With it,
    /// `lock_release` also drops one lock and the combined count is
    /// returned. Both decrements happen under one acquisition of the table
    /// lock. Counts never go below zero. The entry is removed as soon as
    /// both counts are zero.
    pub fn release(&self, path: &Path, unload_intent: bool, lock_release: bool) -> ReleaseOutcome {
        self.release_entry(path, unload_intent, unload_intent && lock_release, None)
    }

    /// Drop one reference on behalf of an unload, recording how the module
    /// should be torn down if another holder ends up releasing it last.
    pub fn release_for_unload(&self, path: &Path, plan: TeardownPlan) -> ReleaseOutcome {
        self.release_entry(path, true, false, Some(plan))
    }

    fn release_entry(
        &self,
        path: &Path,
        unload_intent: bool,
        lock_release: bool,
        plan: Option<TeardownPlan>,
    ) -> ReleaseOutcome {
        let path = module_key(path);
        let mut modules = self.modules.lock();
        let Some(entry) = modules.get_mut(&*path) else {
            return ReleaseOutcome::untouched();
        };
        entry.reference_count = entry.reference_count.saturating_sub(1);
        if lock_release {
            entry.lock_count = entry.lock_count.saturating_sub(1);
        }
        if let Some(plan) = plan {
            entry.plan = plan;
        }
        let plan = entry.plan;
        let remaining = if unload_intent {
            entry.total()
        } else {
            entry.reference_count
        };
        let removed = if entry.total() == 0 {
            modules.remove(&*path).map(|e| e.module)
        } else {
            None
        };
        if removed.is_some() {
            tracing::info!(path = %path.display(), "module unregistered");
        }
        ReleaseOutcome {
            remaining,
            removed,
            plan,
        }
    }

    /// Drop one lock, returning the combined count.
    pub fn unlock(&self, path: &Path) -> ReleaseOutcome {
        let path = module_key(path);
        let mut modules = self.modules.lock();
        let Some(entry) = modules.get_mut(&*path) else {
            return ReleaseOutcome::untouched();
        };
        entry.lock_count = entry.lock_count.saturating_sub(1);
        let remaining = entry.total();
        let plan = entry.plan;
        let removed = if remaining == 0 {
            modules.remove(&*path).map(|e| e.module)
        } else {
            None
        };
        ReleaseOutcome {
            remaining,
            removed,
            plan,
        }
    }

    /// Record that one reference to `path` will never be released.
    pub(crate) fn mark_leaked(&self, path: &Path) {
        let path = module_key(path);
        if let Some(entry) = self.modules.lock().get_mut(&*path) {
            entry.leaked += 1;
        }
    }

    /// References to `path` held by sessions that were dropped on a thread
    /// other than their owner. Such an entry can never leave the table.
    pub fn leaked_count(&self, path: &Path) -> Option<usize> {
        self.modules.lock().get(&*module_key(path)).map(|e| e.leaked)
    }

    /// Whether `handle` is still the live handle registered for `path`.
    pub fn verify(&self, path: &Path, handle: usize) -> bool {
        handle != 0
            && self
                .modules
                .lock()
                .get(&*module_key(path))
                .map(|e| e.module.handle() == handle)
                .unwrap_or(false)
    }

    pub fn reference_count(&self, path: &Path) -> Option<usize> {
        self.modules.lock().get(&*module_key(path)).map(|e| e.reference_count)
    }

    pub fn lock_count(&self, path: &Path) -> Option<usize> {
        self.modules.lock().get(&*module_key(path)).map(|e| e.lock_count)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.modules.lock().contains_key(&*module_key(path))
    }

    /// Paths of every registered module
    pub fn loaded_modules(&self) -> Vec<PathBuf> {
        self.modules.lock().keys().cloned().collect()
    }
}

fn not_loaded(path: &Path) -> TclError {
    TclError::NotFound(format!("module \"{}\" is not loaded", path.display()))
}
