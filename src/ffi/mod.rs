//! FFI Module for tclhost
//!
//! Loads the native runtime and tracks who is using it.
//!
//! # Architecture
//!
//! ```text
//! TclRuntime::load
//!       │
//!       ▼
//! ModuleRegistry (path -> module, reference count, lock count)
//!       │
//!       ▼
//! ModuleLoader / DynamicLibrary (libloading)
//!       │
//!       ▼
//! TclApi (entry points resolved once)
//! ```

mod api;
mod loader;
mod registry;

pub use api::{
    TclApi, TclInterp, TCL_ALL_EVENTS, TCL_CANCEL_UNWIND, TCL_DONT_WAIT, TCL_ERROR,
    TCL_GLOBAL_ONLY, TCL_OK,
};
pub use loader::{DynamicLibrary, ModuleLoader, NativeModule, SystemLoader};
pub use registry::{ModuleRegistry, ReleaseOutcome, TeardownPlan};
