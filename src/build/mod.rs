//! Build descriptors
//!
//! A [`TclBuild`] describes one candidate native Tcl library file found on
//! disk: where it was found, which search strategy found it, and the
//! version/feature fingerprint extracted from its name and headers.
//!
//! # Pipeline
//!
//! ```text
//! path ──► patterns (recognize) ──► extract (version, flags, header) ──► catalog
//! ```

pub mod catalog;
pub mod extract;
pub mod header;
pub mod patterns;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::platform::{AbiWidth, OsFamily};
use crate::version::{PatchLevel, ReleaseLevel};

pub use catalog::BuildCatalog;
pub use extract::{extract_build, looks_like_tcl_library, ExtractRequest};
pub use patterns::{reload_patterns, PatternCatalog, PatternList};

bitflags::bitflags! {
    /// Which strategies run, which name lists apply, and how candidates are
    /// judged. A build records the strategy and sub-step bits that found it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FindFlags: u64 {
        /// Explicit caller-supplied files or directories
        const SPECIFIC_PATH = 1 << 0;
        /// Directory of the hosting script
        const SCRIPT_PATH = 1 << 1;
        /// Override and shared-library path variables
        const ENVIRONMENT = 1 << 2;
        /// Caller-supplied auto-path list
        const AUTO_PATH = 1 << 3;
        /// `<root>/<name>`
        const PACKAGE_NAME_PATH = 1 << 4;
        /// `<root>/<name>/<processor>`
        const PACKAGE_NAME_ARCH_PATH = 1 << 5;
        /// `<root>`
        const PACKAGE_ROOT_PATH = 1 << 6;
        /// `<root>/<processor>`
        const PACKAGE_ROOT_ARCH_PATH = 1 << 7;
        /// Directory of the current executable
        const ENTRY_LOCATION = 1 << 8;
        /// Directory of the hosting module
        const EXECUTING_LOCATION = 1 << 9;
        /// Application binary directory
        const BINARY_PATH = 1 << 10;
        /// `<base>/externals/tcl`
        const EXTERNALS_PATH = 1 << 11;
        /// `<base>/../tcl`
        const PEER_PATH = 1 << 12;
        /// POSIX local library directories
        const LOCAL_LIBRARY_PATH = 1 << 13;
        /// POSIX system library directories
        const SYSTEM_LIBRARY_PATH = 1 << 14;
        /// Per-user registry hive
        const CURRENT_USER = 1 << 15;
        /// Per-machine registry hive
        const LOCAL_MACHINE = 1 << 16;
        /// Directories on `PATH`
        const SEARCH_PATH = 1 << 17;
        /// Ask an external shell where its library lives
        const EVALUATE_SCRIPT = 1 << 18;
        /// Sub-step: found under the well-known vendor registry key
        const VENDOR_KEY = 1 << 19;
        /// Sub-step: found in a `bin`/`lib` child of a searched directory
        const CHILD_DIRECTORY = 1 << 20;

        /// Canonical shared library names
        const PRIMARY_NAME_PATTERN_LIST = 1 << 24;
        /// Portable all-in-one bundle names
        const SECONDARY_NAME_PATTERN_LIST = 1 << 25;
        /// Threaded base kits and self-contained kits
        const OTHER_NAME_PATTERN_LIST = 1 << 26;
        /// Caller-supplied patterns, tried first
        const EXTRA_NAME_PATTERN_LIST = 1 << 27;

        /// Descend into subdirectories while enumerating
        const RECURSIVE = 1 << 32;
        /// Zero-fill extracted versions to four components
        const ZERO_COMPONENTS = 1 << 33;
        /// Sniff binary headers for the ABI width
        const FIND_ARCHITECTURE = 1 << 34;
        /// Reject candidates whose ABI width differs from the process
        const MATCH_ARCHITECTURE = 1 << 35;
        /// Reject candidates built for another OS family
        const MATCH_OPERATING_SYSTEM = 1 << 36;
        /// Reject candidates without the trust flag
        const TRUSTED_ONLY = 1 << 37;
        /// Read embedded file-version resources
        const FILE_VERSION = 1 << 38;
        /// Prefer debug builds when otherwise tied
        const PREFER_DEBUG = 1 << 39;
        /// Record informational diagnostics, not only failures
        const VERBOSE = 1 << 40;

        const PACKAGE_PATH_MASK = Self::PACKAGE_NAME_PATH.bits()
            | Self::PACKAGE_NAME_ARCH_PATH.bits()
            | Self::PACKAGE_ROOT_PATH.bits()
            | Self::PACKAGE_ROOT_ARCH_PATH.bits();
        const HOST_LOCATION_MASK = Self::ENTRY_LOCATION.bits() | Self::EXECUTING_LOCATION.bits();
        const LIBRARY_PATH_MASK =
            Self::LOCAL_LIBRARY_PATH.bits() | Self::SYSTEM_LIBRARY_PATH.bits();
        const REGISTRY_MASK = Self::CURRENT_USER.bits() | Self::LOCAL_MACHINE.bits();
        const LOCATION_MASK = Self::SPECIFIC_PATH.bits()
            | Self::SCRIPT_PATH.bits()
            | Self::ENVIRONMENT.bits()
            | Self::AUTO_PATH.bits()
            | Self::PACKAGE_PATH_MASK.bits()
            | Self::HOST_LOCATION_MASK.bits()
            | Self::BINARY_PATH.bits()
            | Self::EXTERNALS_PATH.bits()
            | Self::PEER_PATH.bits()
            | Self::LIBRARY_PATH_MASK.bits()
            | Self::REGISTRY_MASK.bits()
            | Self::SEARCH_PATH.bits()
            | Self::EVALUATE_SCRIPT.bits();
        const NAME_PATTERN_MASK = Self::PRIMARY_NAME_PATTERN_LIST.bits()
            | Self::SECONDARY_NAME_PATTERN_LIST.bits()
            | Self::OTHER_NAME_PATTERN_LIST.bits()
            | Self::EXTRA_NAME_PATTERN_LIST.bits();
        const ARCHITECTURE_MASK = Self::FIND_ARCHITECTURE.bits() | Self::MATCH_ARCHITECTURE.bits();

        const DEFAULT = (Self::LOCATION_MASK.bits() & !Self::EVALUATE_SCRIPT.bits())
            | Self::NAME_PATTERN_MASK.bits()
            | Self::MATCH_OPERATING_SYSTEM.bits()
            | Self::FILE_VERSION.bits();
    }
}

impl Default for FindFlags {
    fn default() -> Self {
        FindFlags::DEFAULT
    }
}

/// Rank of the name pattern that matched; lower is more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub i32);

impl Priority {
    /// Explicitly named files outrank every pattern match.
    pub const HIGHEST: Priority = Priority(-1);
    pub const LOWEST: Priority = Priority(i32::MAX);

    pub fn from_index(index: usize) -> Self {
        Priority(i32::try_from(index).unwrap_or(i32::MAX))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Priority::HIGHEST => write!(f, "highest"),
            Priority::LOWEST => write!(f, "lowest"),
            Priority(n) => write!(f, "{}", n),
        }
    }
}

/// Monotonic discovery order within one search pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Sequence(pub u64);

impl Sequence {
    /// Return the current value and advance.
    pub fn next(&mut self) -> Sequence {
        let current = *self;
        self.0 += 1;
        current
    }
}

/// Vendor name fragments that mark a packaged third-party distribution.
const VENDOR_FRAGMENTS: &[&str] = &["activestate", "activetcl", "magicsplat", "irontcl", "bawt"];

/// Metadata for one candidate library file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TclBuild {
    /// Absolute file path; the catalog key
    pub path: PathBuf,
    /// Strategy and sub-step that found the file
    pub find_flags: FindFlags,
    /// Free-form origin detail (variable name, registry key, ...)
    pub find_data: Option<String>,
    pub priority: Priority,
    pub sequence: Sequence,
    pub os_family: OsFamily,
    pub patch_level: PatchLevel,
    pub release_level: ReleaseLevel,
    pub abi_width: AbiWidth,
    pub threaded: bool,
    pub debug: bool,
    pub trusted: bool,
}

impl TclBuild {
    /// The `major.minor` version.
    pub fn version(&self) -> PatchLevel {
        self.patch_level.two_part()
    }

    /// Discovered through the registry.
    pub fn is_installed(&self) -> bool {
        self.find_flags.intersects(FindFlags::REGISTRY_MASK)
    }

    /// Discovered through the externals path.
    pub fn is_via_externals(&self) -> bool {
        self.find_flags.contains(FindFlags::EXTERNALS_PATH)
    }

    /// Path contains a known vendor name fragment.
    pub fn is_vendor_distribution(&self) -> bool {
        let text = self.path.to_string_lossy().to_ascii_lowercase();
        VENDOR_FRAGMENTS.iter().any(|v| text.contains(v))
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ordered key/value listing used by diagnostics and the CLI.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("findFlags", format!("{:?}", self.find_flags)),
            ("findData", self.find_data.clone().unwrap_or_default()),
            ("fileName", self.path.display().to_string()),
            ("priority", self.priority.to_string()),
            ("sequence", self.sequence.0.to_string()),
            ("operatingSystem", self.os_family.to_string()),
            ("version", self.version().to_string()),
            ("patchLevel", self.patch_level.to_string()),
            ("releaseLevel", self.release_level.to_string()),
            ("abiWidth", self.abi_width.to_string()),
            ("threaded", self.threaded.to_string()),
            ("debug", self.debug.to_string()),
            ("trusted", self.trusted.to_string()),
            ("installed", self.is_installed().to_string()),
            ("externals", self.is_via_externals().to_string()),
            ("vendor", self.is_vendor_distribution().to_string()),
        ]
    }
}

impl fmt::Display for TclBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .to_pairs()
            .into_iter()
            .map(|(k, v)| {
                if v.is_empty() || v.contains(char::is_whitespace) {
                    format!("{} {{{}}}", k, v)
                } else {
                    format!("{} {}", k, v)
                }
            })
            .collect();
        write!(f, "{}", pairs.join(" "))
    }
}
