//! Locate and Select Integration Tests
//!
//! Builds real directory trees with tempfile and runs the locator and
//! selector over them end to end.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tclhost::{
    available, find, select, AbiWidth, BuildCatalog, FindAction, FindFlags, FindOptions,
    FindPhase, OsFamily, PatchLevel, PlatformFacts, Priority, SelectOptions, TclError,
    VersionBounds,
};

/// Platform with fixed answers so results do not depend on the host.
struct FixedPlatform(OsFamily);

impl PlatformFacts for FixedPlatform {
    fn os_family(&self) -> OsFamily {
        self.0
    }

    fn abi_width(&self) -> AbiWidth {
        AbiWidth::Bits64
    }

    fn processor_name(&self) -> &str {
        "x86_64"
    }
}

/// Create `names` as small non-empty files in a fresh directory.
fn library_dir(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        fs::write(dir.path().join(name), b"not really a library").unwrap();
    }
    dir
}

/// Only the explicit-path strategy, so nothing on the host leaks in.
fn explicit(dir: &Path, extra: FindFlags) -> FindOptions {
    FindOptions::new(FindFlags::SPECIFIC_PATH | FindFlags::NAME_PATTERN_MASK | extra)
        .with_paths([dir])
}

fn version(text: &str) -> PatchLevel {
    text.parse().unwrap()
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap()
}

#[test]
fn test_highest_patch_level_wins() {
    let dir = library_dir(&["libtcl8.4.so", "libtcl8.6.so"]);
    let platform = FixedPlatform(OsFamily::Unix);
    let options = explicit(dir.path(), FindFlags::MATCH_OPERATING_SYSTEM);

    let outcome = find(&options, &platform).unwrap();
    assert_eq!(outcome.catalog.len(), 2);

    let select_options = SelectOptions::new(options.flags, options.bounds.clone());
    let chosen = select(&outcome.catalog, &select_options, &platform).unwrap();
    assert_eq!(file_name(&chosen.path), "libtcl8.6.so");
    assert_eq!(chosen.patch_level, version("8.6"));
}

#[test]
fn test_threaded_debug_build_preferred() {
    let dir = library_dir(&["tcl86.dll", "tcl86tg.dll"]);
    let platform = FixedPlatform(OsFamily::Windows);
    let options = explicit(dir.path(), FindFlags::MATCH_OPERATING_SYSTEM | FindFlags::PREFER_DEBUG);

    let outcome = find(&options, &platform).unwrap();
    let select_options = SelectOptions::new(options.flags, VersionBounds::default());
    let chosen = select(&outcome.catalog, &select_options, &platform).unwrap();
    assert_eq!(file_name(&chosen.path), "tcl86tg.dll");
    assert!(chosen.threaded);
    assert!(chosen.debug);
}

#[test]
fn test_selection_is_deterministic() {
    let dir = library_dir(&["libtcl8.6.so", "libtcl8.6t.so", "libtcl86.so", "libtcl8.5.so"]);
    let platform = FixedPlatform(OsFamily::Unix);
    let options = explicit(dir.path(), FindFlags::empty());
    let select_options = SelectOptions::new(options.flags, VersionBounds::default());

    let first = find(&options, &platform).unwrap();
    let second = find(&options, &platform).unwrap();
    let a = select(&first.catalog, &select_options, &platform).unwrap();
    let b = select(&second.catalog, &select_options, &platform).unwrap();
    assert_eq!(a.path, b.path);
}

#[test]
fn test_bounds_are_inclusive() {
    let dir = library_dir(&["libtcl8.4.so", "libtcl8.5.so", "libtcl8.6.so", "libtcl9.0.so"]);
    let platform = FixedPlatform(OsFamily::Unix);
    let options = explicit(dir.path(), FindFlags::VERBOSE)
        .with_bounds(VersionBounds::new(Some(version("8.5")), Some(version("8.6"))));

    let outcome = find(&options, &platform).unwrap();
    let mut names: Vec<&str> = outcome.catalog.iter().map(|b| file_name(&b.path)).collect();
    names.sort();
    assert_eq!(names, ["libtcl8.5.so", "libtcl8.6.so"]);
    assert!(outcome.diagnostics.contains("below minimum"));
    assert!(outcome.diagnostics.contains("above maximum"));
}

#[test]
fn test_explicit_file_outranks_patterns() {
    let dir = library_dir(&["libtcl8.6.so", "custom-runtime.so"]);
    let platform = FixedPlatform(OsFamily::Unix);
    let mut options = explicit(dir.path(), FindFlags::empty());
    options.paths.push(dir.path().join("custom-runtime.so"));
    options.unknown_version = Some(version("8.6"));

    let outcome = find(&options, &platform).unwrap();
    let custom = outcome
        .catalog
        .iter()
        .find(|b| file_name(&b.path) == "custom-runtime.so")
        .unwrap();
    assert_eq!(custom.priority, Priority::HIGHEST);
}

#[test]
fn test_empty_directory_reports_diagnostics() {
    let dir = library_dir(&["readme.txt"]);
    let platform = FixedPlatform(OsFamily::Unix);
    let mut options = explicit(dir.path(), FindFlags::VERBOSE);
    options.paths.push(PathBuf::from("/nonexistent/tclhost/dir"));

    match find(&options, &platform) {
        Err(TclError::NoCandidates(diagnostics)) => {
            assert!(diagnostics.contains("no candidate builds were found"));
            assert!(diagnostics.contains("/nonexistent/tclhost/dir"));
            let text = TclError::NoCandidates(diagnostics.clone()).to_string();
            assert_eq!(text.lines().count(), diagnostics.len());
        }
        other => panic!("unexpected result: {:?}", other.map(|o| o.catalog.len())),
    }
}

#[test]
fn test_relative_paths_are_made_absolute() {
    let dir = tempfile::Builder::new()
        .prefix("tclhost-relative")
        .tempdir_in(".")
        .unwrap();
    fs::write(dir.path().join("libtcl8.6.so"), b"x").unwrap();
    let relative = dir.path().to_path_buf();
    assert!(relative.is_relative());
    let absolute = std::path::absolute(&relative).unwrap();

    let platform = FixedPlatform(OsFamily::Unix);
    let options = FindOptions::new(FindFlags::SPECIFIC_PATH | FindFlags::NAME_PATTERN_MASK)
        .with_paths([absolute.clone(), relative.clone(), relative.join("libtcl8.6.so")]);
    let outcome = find(&options, &platform).unwrap();

    let paths: Vec<&Path> = outcome.catalog.iter().map(|b| b.path.as_path()).collect();
    let expected = absolute.join("libtcl8.6.so");
    assert_eq!(paths, [expected.as_path()]);
}

#[test]
fn test_recursive_scan() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("tcl").join("lib");
    fs::create_dir_all(&nested).unwrap();
    fs::write(nested.join("libtcl8.6.so"), b"x").unwrap();
    let platform = FixedPlatform(OsFamily::Unix);

    assert!(find(&explicit(dir.path(), FindFlags::empty()), &platform).is_err());
    let outcome = find(&explicit(dir.path(), FindFlags::RECURSIVE), &platform).unwrap();
    assert_eq!(outcome.catalog.len(), 1);
}

#[test]
fn test_available_with_glob() {
    let dir = library_dir(&["libtcl8.6.so"]);
    let platform = FixedPlatform(OsFamily::Unix);
    let options = explicit(dir.path(), FindFlags::empty());

    assert!(available(&options, &platform, None).unwrap());
    assert!(available(&options, &platform, Some("*8.6*")).unwrap());
    assert!(!available(&options, &platform, Some("*9.0*")).unwrap());

    let empty = library_dir(&[]);
    assert!(!available(&explicit(empty.path(), FindFlags::empty()), &platform, None).unwrap());
}

#[test]
fn test_callback_skip_and_retry() {
    let dir = library_dir(&["libtcl8.6.so"]);
    let platform = FixedPlatform(OsFamily::Unix);

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let callback = Arc::new(
        move |phase: FindPhase, _: &BuildCatalog| -> Result<FindAction, String> {
            if phase == FindPhase::Pre && seen.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(FindAction::Retry);
            }
            Ok(FindAction::Continue)
        },
    );
    let options = explicit(dir.path(), FindFlags::empty()).with_callback(callback);
    let outcome = find(&options, &platform).unwrap();
    assert_eq!(outcome.catalog.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let options = explicit(dir.path(), FindFlags::empty())
        .with_callback(Arc::new(|phase: FindPhase, _: &BuildCatalog| -> Result<FindAction, String> {
            match phase {
                FindPhase::Pre => Ok(FindAction::Skip),
                FindPhase::Post => Ok(FindAction::Continue),
            }
        }));
    assert!(matches!(find(&options, &platform), Err(TclError::NoCandidates(_))));
}
