//! Build selection
//!
//! Reduces a [`BuildCatalog`] to the single best [`TclBuild`].
//!
//! Candidates are visited in catalog order against one running best. Each
//! criterion either strictly favors one side, which decides the comparison,
//! or ties and falls through to the next:
//!
//! ```text
//! 1. patch level          higher wins
//! 2. release level        final > beta > alpha > unknown
//! 3. trusted              true wins
//! 4. priority             lower pattern index wins
//! 5. threaded             threaded is never abandoned for non-threaded
//! 6. debug affinity       matching PREFER_DEBUG wins
//! 7. sequence             earlier discovery wins
//! ```
//!
//! Guards 5 and 6 make the relation non-transitive across mixed inputs, so
//! the chain is only ever applied as a linear scan and never handed to a
//! sort.

use std::cmp::Ordering;

use crate::build::{BuildCatalog, FindFlags, TclBuild};
use crate::error::{Diagnostics, TclError, TclResult};
use crate::platform::{AbiWidth, PlatformFacts};
use crate::version::VersionBounds;

/// Inputs to [`select`].
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub flags: FindFlags,
    pub bounds: VersionBounds,
}

impl SelectOptions {
    pub fn new(flags: FindFlags, bounds: VersionBounds) -> Self {
        Self { flags, bounds }
    }
}

/// Compare `candidate` against the running `best`.
///
/// `Greater` means the candidate should replace the best.
pub fn compare(candidate: &TclBuild, best: &TclBuild, flags: FindFlags) -> Ordering {
    let affinity = flags.contains(FindFlags::PREFER_DEBUG);
    candidate
        .patch_level
        .cmp(&best.patch_level)
        .then_with(|| candidate.release_level.cmp(&best.release_level))
        .then_with(|| candidate.trusted.cmp(&best.trusted))
        .then_with(|| best.priority.cmp(&candidate.priority))
        .then_with(|| candidate.threaded.cmp(&best.threaded))
        .then_with(|| (candidate.debug == affinity).cmp(&(best.debug == affinity)))
        .then_with(|| best.sequence.cmp(&candidate.sequence))
}

/// Whether `candidate` strictly improves on `best`.
pub fn is_better(candidate: &TclBuild, best: &TclBuild, flags: FindFlags) -> bool {
    compare(candidate, best, flags) == Ordering::Greater
}

/// Why `build` cannot be used on this host, if it cannot.
pub fn rejection(
    build: &TclBuild,
    options: &SelectOptions,
    platform: &dyn PlatformFacts,
) -> Option<String> {
    let path = build.path.display();
    match std::fs::metadata(&build.path) {
        Err(err) => return Some(format!("{}: {}", path, err)),
        Ok(meta) if !meta.is_file() => return Some(format!("{}: not a regular file", path)),
        Ok(meta) if meta.len() == 0 => return Some(format!("{}: empty file", path)),
        Ok(_) => {}
    }

    let flags = options.flags;
    if flags.contains(FindFlags::MATCH_OPERATING_SYSTEM)
        && !platform.is_os_family(build.os_family)
    {
        return Some(format!(
            "{}: built for {}, host is {}",
            path,
            build.os_family,
            platform.os_family()
        ));
    }
    if flags.contains(FindFlags::MATCH_ARCHITECTURE)
        && build.abi_width != AbiWidth::Unknown
        && build.abi_width != platform.abi_width()
    {
        return Some(format!(
            "{}: {} image, host is {}",
            path,
            build.abi_width,
            platform.abi_width()
        ));
    }
    if flags.contains(FindFlags::TRUSTED_ONLY) && !build.trusted {
        return Some(format!("{}: not trusted", path));
    }
    options
        .bounds
        .violation(&build.patch_level)
        .map(|reason| format!("{}: {}", path, reason))
}

/// Pick the best usable build in `catalog`.
pub fn select(
    catalog: &BuildCatalog,
    options: &SelectOptions,
    platform: &dyn PlatformFacts,
) -> TclResult<TclBuild> {
    let mut diagnostics = Diagnostics::new();
    let mut best: Option<&TclBuild> = None;

    for build in catalog.iter() {
        if let Some(reason) = rejection(build, options, platform) {
            tracing::debug!(%reason, "candidate rejected");
            diagnostics.push(reason);
            continue;
        }
        match best {
            Some(current) if !is_better(build, current, options.flags) => {}
            _ => best = Some(build),
        }
    }

    match best {
        Some(build) => {
            tracing::info!(
                path = %build.path.display(),
                version = %build.patch_level,
                "selected build"
            );
            Ok(build.clone())
        }
        None => {
            if catalog.is_empty() {
                diagnostics.push("no candidate builds were found");
            } else {
                diagnostics.push("no suitable candidate build");
            }
            Err(TclError::NoCandidates(diagnostics))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::tests::sample;
    use crate::build::{Priority, Sequence};
    use crate::platform::HostPlatform;
    use crate::version::ReleaseLevel;

    fn flags() -> FindFlags {
        FindFlags::DEFAULT
    }

    #[test]
    fn test_version_dominates() {
        let old = sample("/a", "8.5.19");
        let new = sample("/b", "8.6.0");
        assert!(is_better(&new, &old, flags()));
        assert!(!is_better(&old, &new, flags()));
    }

    #[test]
    fn test_release_level_then_trust_then_priority() {
        let mut best = sample("/a", "8.6");
        let mut candidate = sample("/b", "8.6");
        best.release_level = ReleaseLevel::Beta;
        assert!(is_better(&candidate, &best, flags()));

        best.release_level = ReleaseLevel::Final;
        best.trusted = true;
        candidate.priority = Priority::HIGHEST;
        assert!(!is_better(&candidate, &best, flags()));

        best.trusted = false;
        assert!(is_better(&candidate, &best, flags()));
    }

    #[test]
    fn test_threaded_is_not_abandoned() {
        let mut threaded = sample("/a", "8.6");
        threaded.threaded = true;
        threaded.sequence = Sequence(9);
        let plain = sample("/b", "8.6");
        assert!(!is_better(&plain, &threaded, flags()));
        assert!(is_better(&threaded, &plain, flags()));

        // Strictly newer still wins through criterion 1
        let newer = sample("/c", "8.6.1");
        assert!(is_better(&newer, &threaded, flags()));
    }

    #[test]
    fn test_debug_affinity() {
        let mut debug = sample("/a", "8.6");
        debug.debug = true;
        debug.sequence = Sequence(3);
        let release = sample("/b", "8.6");
        assert!(is_better(&debug, &release, flags() | FindFlags::PREFER_DEBUG));
        assert!(!is_better(&release, &debug, flags() | FindFlags::PREFER_DEBUG));
        assert!(is_better(&release, &debug, flags()));
    }

    #[test]
    fn test_sequence_breaks_full_ties() {
        let mut early = sample("/a", "8.6");
        early.sequence = Sequence(1);
        let mut late = sample("/b", "8.6");
        late.sequence = Sequence(2);
        assert!(is_better(&early, &late, flags()));
        assert!(!is_better(&late, &early, flags()));
        assert_eq!(compare(&early, &early, flags()), Ordering::Equal);
    }

    #[test]
    fn test_empty_catalog_fails() {
        let empty = BuildCatalog::new();
        let err = select(&empty, &SelectOptions::default(), &HostPlatform).unwrap_err();
        match err {
            TclError::NoCandidates(diags) => assert!(diags.contains("no candidate")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_files_are_rejected() {
        let catalog: BuildCatalog =
            [sample("/nonexistent/libtcl8.6.so", "8.6")].into_iter().collect();
        let err = select(&catalog, &SelectOptions::default(), &HostPlatform).unwrap_err();
        match err {
            TclError::NoCandidates(diags) => {
                assert!(diags.contains("/nonexistent/libtcl8.6.so"));
                assert!(diags.contains("no suitable candidate"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
