//! Locator
//!
//! Enumerates candidate library files from many independent sources and
//! collects them into a [`BuildCatalog`]. Strategies run in a fixed order;
//! that order is part of the contract because the selector breaks full ties
//! by discovery sequence.
//!
//! ```text
//! pre-callback
//!   SPECIFIC_PATH ─► SCRIPT_PATH ─► ENVIRONMENT ─► AUTO_PATH
//!   ─► PACKAGE_* (4 variants) ─► ENTRY/EXECUTING_LOCATION ─► BINARY_PATH
//!   ─► EXTERNALS_PATH ─► PEER_PATH ─► LOCAL/SYSTEM_LIBRARY_PATH (POSIX)
//!   ─► CURRENT_USER/LOCAL_MACHINE (windowing) ─► SEARCH_PATH
//!   ─► EVALUATE_SCRIPT
//! post-callback
//! bounds purge
//! ```
//!
//! A strategy that yields a file extracts it at [`Priority::HIGHEST`]; one
//! that yields a directory enumerates it and keeps only recognized names.
//! Strategy failures become diagnostics; the pass only fails when nothing
//! at all was found.

pub mod registry;
pub mod script;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::build::{
    extract_build, BuildCatalog, ExtractRequest, FindFlags, PatternCatalog, Priority, Sequence,
};
use crate::error::{Diagnostics, TclError, TclResult};
use crate::platform::{OsFamily, PlatformFacts, RegistryHive, SearchEnvironment, SystemEnvironment};
use crate::version::{PatchLevel, VersionBounds};

/// Environment variables naming a library file or directory directly.
pub const OVERRIDE_VARIABLES: &[&str] = &["TCL_LIBRARY_FILE", "TCLHOST_LIBRARY"];

/// POSIX directories for locally built software.
pub const LOCAL_LIBRARY_DIRS: &[&str] = &["/usr/local/lib", "/opt/local/lib", "/opt/homebrew/lib"];

/// POSIX directories for system packages; a multiarch directory is added
/// at search time.
pub const SYSTEM_LIBRARY_DIRS: &[&str] = &["/usr/lib", "/usr/lib64", "/lib", "/lib64"];

/// Upper bound on callback-requested restarts of one pass.
pub const MAX_RETRIES: usize = 8;

/// Where a callback is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindPhase {
    Pre,
    Post,
}

/// What a callback asks the locator to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindAction {
    /// Proceed normally
    Continue,
    /// Skip the remaining strategies and go straight to filtering
    Skip,
    /// Clear everything and restart the pass from the top
    Retry,
}

/// Hook invoked before and after the strategies run.
pub type FindCallback =
    Arc<dyn Fn(FindPhase, &BuildCatalog) -> Result<FindAction, String> + Send + Sync>;

/// Caller-supplied inputs consumed by individual strategies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchContext {
    /// Hosting script file or its directory
    pub script_path: Option<PathBuf>,
    pub auto_path: Vec<PathBuf>,
    pub package_root: Option<PathBuf>,
    pub package_name: Option<String>,
    /// Path of the module hosting this crate
    pub host_module_path: Option<PathBuf>,
    /// Application binary directory; defaults to the executable's
    pub binary_path: Option<PathBuf>,
    /// Base for the externals and peer strategies
    pub base_path: Option<PathBuf>,
    /// Registry key searched besides the vendor key
    pub registry_key: Option<String>,
    /// Extra override variable names
    pub environment: Vec<String>,
    /// Shell used by the script-evaluation fallback
    pub shell: Option<String>,
}

/// Everything one search pass needs.
#[derive(Clone, Default)]
pub struct FindOptions {
    pub flags: FindFlags,
    /// Explicit files or directories
    pub paths: Vec<PathBuf>,
    /// Script for the evaluation fallback
    pub script: Option<String>,
    pub bounds: VersionBounds,
    /// Version assumed for recognized files whose version cannot be read
    pub unknown_version: Option<PatchLevel>,
    pub context: SearchContext,
    pub callback: Option<FindCallback>,
    /// Pattern snapshot; the process-wide one when unset
    pub patterns: Option<Arc<PatternCatalog>>,
}

impl fmt::Debug for FindOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindOptions")
            .field("flags", &self.flags)
            .field("paths", &self.paths)
            .field("script", &self.script)
            .field("bounds", &self.bounds)
            .field("unknown_version", &self.unknown_version)
            .field("context", &self.context)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl FindOptions {
    pub fn new(flags: FindFlags) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }

    pub fn with_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_bounds(mut self, bounds: VersionBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_callback(mut self, callback: FindCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// Result of a successful pass.
#[derive(Debug, Clone)]
pub struct FindOutcome {
    pub catalog: BuildCatalog,
    /// Strategy failures, plus informational notes under `VERBOSE`
    pub diagnostics: Diagnostics,
}

/// Run a search pass against the real process environment.
pub fn find(options: &FindOptions, platform: &dyn PlatformFacts) -> TclResult<FindOutcome> {
    find_with(options, platform, &SystemEnvironment)
}

/// Run a search pass against the given environment.
pub fn find_with(
    options: &FindOptions,
    platform: &dyn PlatformFacts,
    env: &dyn SearchEnvironment,
) -> TclResult<FindOutcome> {
    let patterns = options.patterns.clone().unwrap_or_else(PatternCatalog::current);
    let mut search = Search {
        options,
        platform,
        env,
        patterns,
        catalog: BuildCatalog::new(),
        diagnostics: Diagnostics::new(),
        sequence: Sequence::default(),
    };

    let mut retries = 0;
    loop {
        match search.run_pass() {
            Pass::Done => break,
            Pass::Retry if retries < MAX_RETRIES => {
                retries += 1;
                tracing::debug!(retries, "locator pass restarted by callback");
                search.catalog.clear();
                search.sequence = Sequence::default();
                script::clear_memo();
            }
            Pass::Retry => {
                search.error(format!("callback requested more than {} restarts", MAX_RETRIES));
                break;
            }
        }
    }

    let purged = search.catalog.retain_versions(&options.bounds);
    for build in purged {
        let reason = options
            .bounds
            .violation(&build.patch_level)
            .unwrap_or_else(|| "outside version bounds".to_string());
        search.note(format!("{}: {}", build.path.display(), reason));
    }

    let Search {
        catalog, diagnostics, ..
    } = search;
    if catalog.is_empty() {
        let mut diagnostics = diagnostics;
        diagnostics.push("no candidate builds were found");
        return Err(TclError::NoCandidates(diagnostics));
    }
    tracing::debug!(candidates = catalog.len(), "locator pass complete");
    Ok(FindOutcome {
        catalog,
        diagnostics,
    })
}

enum Pass {
    Done,
    Retry,
}

struct Search<'a> {
    options: &'a FindOptions,
    platform: &'a dyn PlatformFacts,
    env: &'a dyn SearchEnvironment,
    patterns: Arc<PatternCatalog>,
    catalog: BuildCatalog,
    diagnostics: Diagnostics,
    sequence: Sequence,
}

impl<'a> Search<'a> {
    fn flags(&self) -> FindFlags {
        self.options.flags
    }

    fn enabled(&self, flag: FindFlags) -> bool {
        self.options.flags.contains(flag)
    }

    /// Always recorded.
    fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%message, "locator error");
        self.diagnostics.push(message);
    }

    /// Recorded only under `VERBOSE`.
    fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::trace!(%message, "locator note");
        if self.enabled(FindFlags::VERBOSE) {
            self.diagnostics.push(message);
        }
    }

    fn callback(&mut self, phase: FindPhase) -> FindAction {
        let Some(callback) = self.options.callback.clone() else {
            return FindAction::Continue;
        };
        match callback(phase, &self.catalog) {
            Ok(action) => action,
            Err(message) => {
                self.error(format!("{:?} callback failed: {}", phase, message));
                FindAction::Continue
            }
        }
    }

    fn run_pass(&mut self) -> Pass {
        match self.callback(FindPhase::Pre) {
            FindAction::Retry => return Pass::Retry,
            FindAction::Skip => return Pass::Done,
            FindAction::Continue => {}
        }

        self.specific_paths();
        self.script_path();
        self.environment();
        self.auto_path();
        self.package_paths();
        self.host_locations();
        self.binary_path();
        self.externals_path();
        self.peer_path();
        self.library_paths();
        self.registry();
        self.search_path();
        self.evaluate_script();

        match self.callback(FindPhase::Post) {
            FindAction::Retry => Pass::Retry,
            FindAction::Skip | FindAction::Continue => Pass::Done,
        }
    }

    // ========================================================================
    // Candidate intake
    // ========================================================================

    /// Add a file or directory. Explicit paths report absence as an error,
    /// speculative ones only as a note. Relative paths are made absolute
    /// first, so every catalog key is absolute.
    fn add_path(&mut self, path: &Path, found_by: FindFlags, data: Option<String>, explicit: bool) {
        if path.as_os_str().is_empty() {
            self.error(
                TclError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "empty path".to_string(),
                }
                .to_string(),
            );
            return;
        }
        let path = match std::path::absolute(path) {
            Ok(path) => path,
            Err(err) => {
                let reason = err.to_string();
                self.error(TclError::InvalidPath { path: path.to_path_buf(), reason }.to_string());
                return;
            }
        };
        if path.is_file() {
            self.add_file(&path, found_by, data, Priority::HIGHEST);
        } else if path.is_dir() {
            self.add_directory(&path, found_by, data);
        } else {
            let message = TclError::NotFound(path.display().to_string()).to_string();
            if explicit {
                self.error(message);
            } else {
                self.note(message);
            }
        }
    }

    fn add_file(
        &mut self,
        path: &Path,
        found_by: FindFlags,
        data: Option<String>,
        priority: Priority,
    ) {
        let request = ExtractRequest {
            path,
            found_by,
            find_data: data,
            flags: self.flags(),
            priority,
            sequence: self.sequence.next(),
            unknown_version: self.options.unknown_version.as_ref(),
        };
        match extract_build(&self.patterns, request, self.platform) {
            Ok(build) => {
                tracing::debug!(
                    path = %build.path.display(),
                    version = %build.patch_level,
                    "candidate found"
                );
                let flags = self.flags();
                self.catalog.add_or_replace(build, flags);
            }
            Err(err) => self.error(err.to_string()),
        }
    }

    fn add_directory(&mut self, dir: &Path, found_by: FindFlags, data: Option<String>) {
        let before = self.catalog.len();
        self.scan_directory(dir, found_by, &data);
        if self.catalog.len() == before {
            self.note(format!("no candidates under \"{}\"", dir.display()));
        }
    }

    fn scan_directory(&mut self, dir: &Path, found_by: FindFlags, data: &Option<String>) {
        let max_depth = if self.enabled(FindFlags::RECURSIVE) { usize::MAX } else { 1 };
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let at = err.path().unwrap_or(dir).display().to_string();
                    let cause = err
                        .io_error()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| err.to_string());
                    self.error(format!("cannot read \"{}\": {}", at, cause));
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            let path = entry.path();
            let flags = self.flags();
            let recognized = crate::build::looks_like_tcl_library(&self.patterns, path, flags);
            if let Some((_, priority)) = recognized {
                self.add_file(path, found_by, data.clone(), priority);
            }
        }
    }

    /// Add `dir` and, when present, its `bin` and `lib` children.
    fn add_directory_tree(&mut self, dir: &Path, found_by: FindFlags, data: Option<String>) {
        self.add_path(dir, found_by, data.clone(), false);
        for child in ["bin", "lib"] {
            let path = dir.join(child);
            if path.is_dir() {
                self.add_directory(&path, found_by | FindFlags::CHILD_DIRECTORY, data.clone());
            }
        }
    }

    fn skipped(&mut self, name: &str) {
        self.note(format!("{} strategy skipped", name));
    }

    // ========================================================================
    // Strategies
    // ========================================================================

    fn specific_paths(&mut self) {
        if !self.enabled(FindFlags::SPECIFIC_PATH) {
            return;
        }
        for path in &self.options.paths {
            self.add_path(path, FindFlags::SPECIFIC_PATH, None, true);
        }
    }

    fn script_path(&mut self) {
        if !self.enabled(FindFlags::SCRIPT_PATH) {
            return;
        }
        let Some(path) = self.options.context.script_path.as_deref() else {
            return self.skipped("script path");
        };
        let dir = if path.is_file() { path.parent().unwrap_or(path) } else { path };
        self.add_path(dir, FindFlags::SCRIPT_PATH, None, false);
    }

    fn environment(&mut self) {
        if !self.enabled(FindFlags::ENVIRONMENT) {
            return;
        }
        let names = OVERRIDE_VARIABLES
            .iter()
            .map(|s| s.to_string())
            .chain(self.options.context.environment.iter().cloned());
        for name in names {
            if let Some(value) = self.env.var(&name) {
                self.add_path(Path::new(&value), FindFlags::ENVIRONMENT, Some(name), true);
            }
        }

        let library_var = match self.platform.os_family() {
            OsFamily::Windows => return,
            OsFamily::Unix => "LD_LIBRARY_PATH",
            OsFamily::Darwin => "DYLD_LIBRARY_PATH",
        };
        if let Some(value) = self.env.var(library_var) {
            for dir in std::env::split_paths(&value) {
                self.add_path(&dir, FindFlags::ENVIRONMENT, Some(library_var.to_string()), false);
            }
        }
    }

    fn auto_path(&mut self) {
        if !self.enabled(FindFlags::AUTO_PATH) {
            return;
        }
        for dir in &self.options.context.auto_path {
            self.add_path(dir, FindFlags::AUTO_PATH, None, false);
        }
    }

    fn package_paths(&mut self) {
        if !self.flags().intersects(FindFlags::PACKAGE_PATH_MASK) {
            return;
        }
        let Some(root) = self.options.context.package_root.clone() else {
            return self.skipped("package path");
        };
        let processor = self.platform.processor_name().to_string();
        let named = self.options.context.package_name.as_ref().map(|name| root.join(name));

        let mut variants = Vec::new();
        if let Some(named) = &named {
            variants.push((FindFlags::PACKAGE_NAME_PATH, named.clone()));
            variants.push((FindFlags::PACKAGE_NAME_ARCH_PATH, named.join(&processor)));
        }
        variants.push((FindFlags::PACKAGE_ROOT_PATH, root.clone()));
        variants.push((FindFlags::PACKAGE_ROOT_ARCH_PATH, root.join(&processor)));

        for (flag, dir) in variants {
            if self.enabled(flag) {
                self.add_directory_tree(&dir, flag, None);
            }
        }
    }

    fn host_locations(&mut self) {
        if self.enabled(FindFlags::ENTRY_LOCATION) {
            match self.env.executable_dir() {
                Some(dir) => self.add_path(&dir, FindFlags::ENTRY_LOCATION, None, false),
                None => self.skipped("entry location"),
            }
        }
        if self.enabled(FindFlags::EXECUTING_LOCATION) {
            match self.options.context.host_module_path.clone() {
                Some(path) => {
                    let dir = if path.is_file() {
                        path.parent().map(Path::to_path_buf).unwrap_or(path)
                    } else {
                        path
                    };
                    self.add_path(&dir, FindFlags::EXECUTING_LOCATION, None, false);
                }
                None => self.skipped("executing location"),
            }
        }
    }

    fn binary_path(&mut self) {
        if !self.enabled(FindFlags::BINARY_PATH) {
            return;
        }
        let dir = self.options.context.binary_path.clone().or_else(|| self.env.executable_dir());
        match dir {
            Some(dir) => self.add_path(&dir, FindFlags::BINARY_PATH, None, false),
            None => self.skipped("binary path"),
        }
    }

    fn base_path(&self) -> Option<PathBuf> {
        self.options.context.base_path.clone().or_else(|| self.env.executable_dir())
    }

    fn externals_path(&mut self) {
        if !self.enabled(FindFlags::EXTERNALS_PATH) {
            return;
        }
        let Some(base) = self.base_path() else {
            return self.skipped("externals path");
        };
        let dir = base.join("externals").join("tcl");
        let arch = dir.join(self.platform.processor_name());
        self.add_path(&dir, FindFlags::EXTERNALS_PATH, None, false);
        self.add_path(&arch, FindFlags::EXTERNALS_PATH, None, false);
    }

    fn peer_path(&mut self) {
        if !self.enabled(FindFlags::PEER_PATH) {
            return;
        }
        let Some(base) = self.base_path() else {
            return self.skipped("peer path");
        };
        let peer = base.join("..").join("tcl");
        for child in ["bin", "lib"] {
            self.add_path(&peer.join(child), FindFlags::PEER_PATH, None, false);
        }
    }

    fn library_paths(&mut self) {
        if !self.flags().intersects(FindFlags::LIBRARY_PATH_MASK) {
            return;
        }
        if self.platform.is_os_family(OsFamily::Windows) {
            return self.skipped("library path");
        }
        if self.enabled(FindFlags::LOCAL_LIBRARY_PATH) {
            for dir in LOCAL_LIBRARY_DIRS {
                self.add_path(Path::new(dir), FindFlags::LOCAL_LIBRARY_PATH, None, false);
            }
        }
        if self.enabled(FindFlags::SYSTEM_LIBRARY_PATH) {
            let multiarch = format!("/usr/lib/{}-linux-gnu", self.platform.processor_name());
            let dirs = SYSTEM_LIBRARY_DIRS.iter().map(|s| s.to_string()).chain(Some(multiarch));
            for dir in dirs {
                self.add_path(Path::new(&dir), FindFlags::SYSTEM_LIBRARY_PATH, None, false);
            }
        }
    }

    fn registry(&mut self) {
        if !self.flags().intersects(FindFlags::REGISTRY_MASK) {
            return;
        }
        if !self.platform.is_os_family(OsFamily::Windows) {
            return self.skipped("registry");
        }
        let hives = [
            (FindFlags::CURRENT_USER, RegistryHive::CurrentUser),
            (FindFlags::LOCAL_MACHINE, RegistryHive::LocalMachine),
        ];
        let mut keys = Vec::new();
        if let Some(key) = self.options.context.registry_key.clone() {
            keys.push((FindFlags::empty(), key));
        }
        keys.push((FindFlags::VENDOR_KEY, registry::VENDOR_KEY.to_string()));

        for (hive_flag, hive) in hives {
            if !self.enabled(hive_flag) {
                continue;
            }
            for (key_flag, key) in &keys {
                let dirs = match self.env.registry_subkey_dirs(hive, key) {
                    Ok(dirs) => dirs,
                    Err(err) => {
                        self.error(format!("cannot enumerate {}\\{}: {}", hive, key, err));
                        continue;
                    }
                };
                let data = Some(format!("{}\\{}", hive, key));
                for dir in dirs {
                    self.add_directory_tree(&dir, hive_flag | *key_flag, data.clone());
                }
            }
        }
    }

    fn search_path(&mut self) {
        if !self.enabled(FindFlags::SEARCH_PATH) {
            return;
        }
        let Some(value) = self.env.var("PATH") else {
            return self.skipped("search path");
        };
        for dir in std::env::split_paths(&value) {
            self.add_path(&dir, FindFlags::SEARCH_PATH, Some("PATH".to_string()), false);
        }
    }

    fn evaluate_script(&mut self) {
        if !self.enabled(FindFlags::EVALUATE_SCRIPT) {
            return;
        }
        let shell = self
            .options
            .context
            .shell
            .clone()
            .unwrap_or_else(|| script::DEFAULT_SHELL.to_string());
        let text = self
            .options
            .script
            .clone()
            .unwrap_or_else(|| script::DEFAULT_SCRIPT.to_string());
        match script::evaluate(&shell, &text) {
            Ok(paths) => {
                for path in paths {
                    self.add_path(&path, FindFlags::EVALUATE_SCRIPT, Some(shell.clone()), false);
                }
            }
            Err(message) => self.error(message),
        }
    }
}

/// Whether any candidate can be found, optionally only those whose path
/// matches the glob `pattern`.
pub fn available(
    options: &FindOptions,
    platform: &dyn PlatformFacts,
    pattern: Option<&str>,
) -> TclResult<bool> {
    let matcher = pattern.map(glob_matcher).transpose()?;
    let outcome = match find(options, platform) {
        Ok(outcome) => outcome,
        Err(TclError::NoCandidates(_)) => return Ok(false),
        Err(err) => return Err(err),
    };
    Ok(match matcher {
        Some(matcher) => outcome.catalog.iter().any(|b| matcher.is_match(&b.path)),
        None => true,
    })
}

/// Compile a path glob. Case-insensitive on Windows.
pub fn glob_matcher(pattern: &str) -> TclResult<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .case_insensitive(cfg!(windows))
        .build()
        .map_err(|e| TclError::InvalidPath {
            path: PathBuf::from(pattern),
            reason: e.to_string(),
        })?;
    Ok(glob.compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{AbiWidth, HostPlatform};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeEnvironment {
        vars: HashMap<String, String>,
        exe_dir: Option<PathBuf>,
    }

    impl SearchEnvironment for FakeEnvironment {
        fn var(&self, name: &str) -> Option<String> {
            self.vars.get(name).cloned()
        }

        fn executable_dir(&self) -> Option<PathBuf> {
            self.exe_dir.clone()
        }

        fn registry_subkey_dirs(
            &self,
            _hive: RegistryHive,
            _key: &str,
        ) -> std::io::Result<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"\x7fELF\x02").unwrap();
        path
    }

    fn only(flags: FindFlags) -> FindFlags {
        flags | FindFlags::NAME_PATTERN_MASK | FindFlags::VERBOSE
    }

    #[test]
    fn test_explicit_file_gets_highest_priority() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(dir.path(), "libtcl8.6.so");
        let options = FindOptions::new(only(FindFlags::SPECIFIC_PATH)).with_paths([&file]);
        let outcome = find_with(&options, &HostPlatform, &FakeEnvironment::default()).unwrap();
        let build = outcome.catalog.get(&file).unwrap();
        assert_eq!(build.priority, Priority::HIGHEST);
        assert_eq!(build.find_flags, FindFlags::SPECIFIC_PATH);
    }

    #[test]
    fn test_directory_scan_filters_names() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libtcl8.6.so");
        touch(dir.path(), "libtk8.6.so");
        touch(dir.path(), "README");
        let options = FindOptions::new(only(FindFlags::SPECIFIC_PATH)).with_paths([dir.path()]);
        let outcome = find_with(&options, &HostPlatform, &FakeEnvironment::default()).unwrap();
        assert_eq!(outcome.catalog.len(), 1);
        let build = outcome.catalog.iter().next().unwrap();
        assert_eq!(build.priority, Priority::from_index(0));
    }

    #[test]
    fn test_recursive_scan() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        touch(&nested, "libtcl8.6.so");

        let options = FindOptions::new(only(FindFlags::SPECIFIC_PATH)).with_paths([dir.path()]);
        assert!(find_with(&options, &HostPlatform, &FakeEnvironment::default()).is_err());

        let options = FindOptions::new(only(FindFlags::SPECIFIC_PATH | FindFlags::RECURSIVE))
            .with_paths([dir.path()]);
        let outcome = find_with(&options, &HostPlatform, &FakeEnvironment::default()).unwrap();
        assert_eq!(outcome.catalog.len(), 1);
    }

    #[test]
    fn test_missing_explicit_path_is_diagnosed() {
        let options =
            FindOptions::new(only(FindFlags::SPECIFIC_PATH)).with_paths(["/nonexistent/tclhost"]);
        match find_with(&options, &HostPlatform, &FakeEnvironment::default()).unwrap_err() {
            TclError::NoCandidates(diags) => {
                assert!(diags.contains("not found: /nonexistent/tclhost"));
                assert!(diags.contains("no candidate builds were found"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_environment_override_records_variable() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(dir.path(), "libtcl9.0.so");
        let mut env = FakeEnvironment::default();
        env.vars
            .insert("TCL_LIBRARY_FILE".to_string(), file.to_string_lossy().into_owned());
        let options = FindOptions::new(only(FindFlags::ENVIRONMENT));
        let outcome = find_with(&options, &HostPlatform, &env).unwrap();
        let build = outcome.catalog.get(&file).unwrap();
        assert_eq!(build.find_data.as_deref(), Some("TCL_LIBRARY_FILE"));
    }

    #[test]
    fn test_package_paths_and_children() {
        let root = tempfile::tempdir().unwrap();
        let named_bin = root.path().join("Tcl").join("bin");
        std::fs::create_dir_all(&named_bin).unwrap();
        let file = touch(&named_bin, "libtcl8.6.so");

        let mut options = FindOptions::new(only(FindFlags::PACKAGE_NAME_PATH));
        options.context.package_root = Some(root.path().to_path_buf());
        options.context.package_name = Some("Tcl".to_string());
        let outcome = find_with(&options, &HostPlatform, &FakeEnvironment::default()).unwrap();
        let build = outcome.catalog.get(&file).unwrap();
        assert_eq!(build.find_flags, FindFlags::PACKAGE_NAME_PATH | FindFlags::CHILD_DIRECTORY);
    }

    #[test]
    fn test_externals_path_uses_base() {
        let base = tempfile::tempdir().unwrap();
        let externals = base.path().join("externals").join("tcl");
        std::fs::create_dir_all(&externals).unwrap();
        let file = touch(&externals, "libtcl8.6.so");

        let mut options = FindOptions::new(only(FindFlags::EXTERNALS_PATH));
        options.context.base_path = Some(base.path().to_path_buf());
        let outcome = find_with(&options, &HostPlatform, &FakeEnvironment::default()).unwrap();
        assert!(outcome.catalog.get(&file).unwrap().is_via_externals());
    }

    #[test]
    fn test_bounds_purge_after_search() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libtcl8.4.so");
        let keep = touch(dir.path(), "libtcl8.6.so");
        let bounds = VersionBounds::new(Some("8.5".parse().unwrap()), None);
        let options = FindOptions::new(only(FindFlags::SPECIFIC_PATH))
            .with_paths([dir.path()])
            .with_bounds(bounds);
        let outcome = find_with(&options, &HostPlatform, &FakeEnvironment::default()).unwrap();
        assert_eq!(outcome.catalog.len(), 1);
        assert!(outcome.catalog.contains(&keep));
        assert!(outcome.diagnostics.contains("below minimum"));
    }

    #[test]
    fn test_skip_callback_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libtcl8.6.so");
        let callback: FindCallback = Arc::new(|phase, _| match phase {
            FindPhase::Pre => Ok(FindAction::Skip),
            FindPhase::Post => Ok(FindAction::Continue),
        });
        let options = FindOptions::new(only(FindFlags::SPECIFIC_PATH))
            .with_paths([dir.path()])
            .with_callback(callback);
        assert!(find_with(&options, &HostPlatform, &FakeEnvironment::default()).is_err());
    }

    #[test]
    fn test_retry_callback_restarts_once() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libtcl8.6.so");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let callback: FindCallback = Arc::new(move |phase, catalog| {
            if phase == FindPhase::Post && seen.fetch_add(1, Ordering::SeqCst) == 0 {
                assert_eq!(catalog.len(), 1);
                return Ok(FindAction::Retry);
            }
            Err("ignored".to_string())
        });
        let options = FindOptions::new(only(FindFlags::SPECIFIC_PATH))
            .with_paths([dir.path()])
            .with_callback(callback);
        let outcome = find_with(&options, &HostPlatform, &FakeEnvironment::default()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.catalog.len(), 1);
        assert_eq!(outcome.catalog.iter().next().unwrap().sequence, Sequence(0));
        assert!(outcome.diagnostics.contains("callback failed: ignored"));
    }

    #[test]
    fn test_glob_matcher() {
        let matcher = glob_matcher("*/lib/libtcl8.?.so").unwrap();
        assert!(matcher.is_match("/usr/lib/libtcl8.6.so"));
        assert!(!matcher.is_match("/usr/lib/libtcl8.6.so.0"));

        let matcher = glob_matcher("**/libtcl{8.6,9.0}.so").unwrap();
        assert!(matcher.is_match("/opt/tcl/lib/libtcl9.0.so"));
        assert!(!matcher.is_match("/opt/tcl/lib/libtcl8.5.so"));

        let matcher = glob_matcher("*/libtcl8.[56].so").unwrap();
        assert!(matcher.is_match("/usr/lib/libtcl8.5.so"));
        assert!(!matcher.is_match("/usr/lib/libtcl8.4.so"));

        assert!(matches!(glob_matcher("["), Err(TclError::InvalidPath { .. })));
    }

    #[test]
    fn test_dotted_path_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(dir.path(), "libtcl8.6.so");
        let options = FindOptions::new(only(FindFlags::SPECIFIC_PATH))
            .with_paths([dir.path().to_path_buf(), dir.path().join(".")]);
        let outcome = find_with(&options, &HostPlatform, &FakeEnvironment::default()).unwrap();
        let paths: Vec<&Path> = outcome.catalog.iter().map(|b| b.path.as_path()).collect();
        assert_eq!(paths, [file.as_path()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libtcl8.6.so");
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::read_dir(&locked).is_ok() {
            // Running with privileges that ignore permission bits
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let options = FindOptions::new(only(FindFlags::SPECIFIC_PATH | FindFlags::RECURSIVE))
            .with_paths([dir.path()]);
        let outcome = find_with(&options, &HostPlatform, &FakeEnvironment::default()).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(outcome.catalog.len(), 1);
        assert!(outcome.diagnostics.contains("cannot read"));
        assert!(outcome.diagnostics.contains("locked"));
    }

    #[test]
    fn test_posix_directories_skipped_on_windows() {
        struct Windows;
        impl PlatformFacts for Windows {
            fn os_family(&self) -> OsFamily {
                OsFamily::Windows
            }
            fn abi_width(&self) -> AbiWidth {
                AbiWidth::Bits64
            }
            fn processor_name(&self) -> &str {
                "x86_64"
            }
        }
        let options = FindOptions::new(only(FindFlags::LIBRARY_PATH_MASK));
        match find_with(&options, &Windows, &FakeEnvironment::default()).unwrap_err() {
            TclError::NoCandidates(diags) => {
                assert!(diags.contains("library path strategy skipped"))
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
