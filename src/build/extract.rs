//! Build metadata extraction
//!
//! Turns a candidate path into a [`TclBuild`] by combining the version
//! captured from its file name with the embedded file-version record and,
//! when asked, the ABI width sniffed from its header.

use std::path::Path;

use super::header;
use super::patterns::PatternCatalog;
use super::{FindFlags, Priority, Sequence, TclBuild};
use crate::error::{TclError, TclResult};
use crate::platform::{AbiWidth, OsFamily, PlatformFacts};
use crate::version::{PatchLevel, ReleaseLevel};

/// Recognize `path` as a candidate library name.
///
/// Returns the family whose pattern matched and the index of the first
/// matching pattern among the lists enabled by `flags`.
pub fn looks_like_tcl_library(
    catalog: &PatternCatalog,
    path: &Path,
    flags: FindFlags,
) -> Option<(OsFamily, Priority)> {
    let name = path.file_name()?.to_str()?;
    catalog
        .recognize(name, flags, OsFamily::current())
        .map(|m| (m.family, m.priority))
}

/// Everything the extractor needs to know about one candidate.
#[derive(Debug, Clone)]
pub struct ExtractRequest<'a> {
    pub path: &'a Path,
    /// Strategy and sub-step bits recorded on the build
    pub found_by: FindFlags,
    pub find_data: Option<String>,
    /// Behavior flags of the current pass
    pub flags: FindFlags,
    pub priority: Priority,
    pub sequence: Sequence,
    /// Version assumed when neither the name nor the file yields one
    pub unknown_version: Option<&'a PatchLevel>,
}

/// Build a descriptor for the candidate described by `request`.
pub fn extract_build(
    catalog: &PatternCatalog,
    request: ExtractRequest<'_>,
    platform: &dyn PlatformFacts,
) -> TclResult<TclBuild> {
    let path = request.path;
    let flags = request.flags;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| TclError::InvalidPath {
            path: path.to_path_buf(),
            reason: "no usable file name".to_string(),
        })?;

    let from_name = catalog.capture(file_name, flags, platform.os_family());
    let from_file = if flags.contains(FindFlags::FILE_VERSION) {
        header::read_file_version(path)
    } else {
        None
    };

    let (mut patch_level, release_level) = match (&from_name, from_file) {
        (Some(name), Some(file)) => {
            // Ties go to the file record; renamed files cannot change it.
            if file.patch_level.specificity() >= name.patch_level.specificity() {
                (file.patch_level, file.release_level)
            } else {
                (name.patch_level.clone(), name.release_level)
            }
        }
        (Some(name), None) => (name.patch_level.clone(), name.release_level),
        (None, Some(file)) => (file.patch_level, file.release_level),
        (None, None) => match request.unknown_version {
            Some(fallback) => (fallback.clone(), ReleaseLevel::Unknown),
            None => {
                return Err(TclError::UnsuitableVersion {
                    path: path.to_path_buf(),
                    version: PatchLevel::new(&[]),
                    reason: "cannot extract version".to_string(),
                })
            }
        },
    };
    if flags.contains(FindFlags::ZERO_COMPONENTS) {
        patch_level = patch_level.zero_filled(4);
    }

    let os_family = from_name
        .as_ref()
        .map(|n| n.family)
        .or_else(|| platform.guess_os_family(path))
        .unwrap_or_else(|| platform.os_family());

    let abi_width = if flags.contains(FindFlags::FIND_ARCHITECTURE) {
        header::read_abi_width(path)
    } else {
        AbiWidth::Unknown
    };

    let build = TclBuild {
        path: path.to_path_buf(),
        find_flags: request.found_by,
        find_data: request.find_data,
        priority: request.priority,
        sequence: request.sequence,
        os_family,
        patch_level,
        release_level,
        abi_width,
        threaded: from_name.as_ref().map(|n| n.threaded).unwrap_or(false),
        debug: from_name.as_ref().map(|n| n.debug).unwrap_or(false),
        trusted: platform.is_trusted(path),
    };
    tracing::trace!(path = %build.path.display(), version = %build.patch_level, "extracted build");
    Ok(build)
}
