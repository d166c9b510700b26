//! tclhost - locate, select and host native Tcl runtimes
//!
//! Finds candidate Tcl shared libraries on the machine, ranks them, loads
//! the best one into the process and manages its lifetime.
//!
//! # Features
//!
//! - **Locator**: a fixed, flag-gated sequence of search strategies (explicit
//!   paths, environment, package paths, system directories, the Windows
//!   registry, `PATH`, script evaluation) feeding one ordered catalog
//! - **Name patterns**: per-OS regular expressions that recognize library
//!   files and extract their version, threading and debug markers
//! - **Selector**: a strict linear scan with a fixed comparison chain
//! - **Module registry**: reference and lock counted, so concurrent sessions
//!   and event pumps share one loaded module safely
//! - **Lifecycle**: load with full rollback, unload with deferred teardown,
//!   cross-thread cancellation
//!
//! # Example
//!
//! ```no_run
//! use tclhost::{FindFlags, FindOptions, LoadOptions, TclRuntime, UnloadFlags};
//!
//! let runtime = TclRuntime::system();
//! let options = LoadOptions::new(FindOptions::new(FindFlags::DEFAULT));
//! let mut session = Some(runtime.load(&options).unwrap());
//! println!("loaded {}", session.as_ref().unwrap().patch_level());
//! runtime.unload(&mut session, UnloadFlags::DEFAULT).unwrap();
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Locator    │ ──► │   Catalog    │ ──► │   Selector   │
//! │   (find)     │     │   (build)    │     │   (select)   │
//! └──────────────┘     └──────────────┘     └──────┬───────┘
//!                                                  │
//!                                                  ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Event pump   │ ◄── │   Session    │ ◄── │   Registry   │
//! │ (runtime)    │     │  (runtime)   │     │    (ffi)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod build;
pub mod config;
pub mod error;
pub mod ffi;
pub mod find;
pub mod platform;
pub mod runtime;
pub mod select;
pub mod version;

// Re-export commonly used types
pub use build::{BuildCatalog, FindFlags, PatternCatalog, Priority, Sequence, TclBuild};
pub use config::{ConfigError, HostConfig};
pub use error::{Diagnostics, TclError, TclResult};
pub use ffi::{
    DynamicLibrary, ModuleLoader, ModuleRegistry, NativeModule, SystemLoader, TclApi, TeardownPlan,
};
pub use find::{available, find, FindAction, FindOptions, FindOutcome, FindPhase, SearchContext};
pub use platform::{AbiWidth, HostPlatform, OsFamily, PlatformFacts};
pub use runtime::{
    CancelHandle, LoadFlags, LoadOptions, PumpOptions, PumpStats, TclRuntime, TclSession,
    UnloadFlags, UnloadOutcome,
};
pub use select::{select, SelectOptions};
pub use version::{PatchLevel, ReleaseLevel, VersionBounds, VersionRange};
