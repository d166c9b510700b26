//! Host platform facts and environment lookups
//!
//! Read-only query surfaces consumed by the locator and selector. Both are
//! traits so hosts (and tests) can substitute their own view of the world.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Coarse operating system classification used by the name pattern catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsFamily {
    /// The windowing OS: `tcl86t.dll`
    Windows,
    /// POSIX-like systems: `libtcl8.6.so[.0.0]`
    Unix,
    /// The Unix variant with its own suffix: `libtcl8.6.dylib`
    Darwin,
}

impl OsFamily {
    pub const ALL: [OsFamily; 3] = [OsFamily::Windows, OsFamily::Unix, OsFamily::Darwin];

    /// Shared library extension, including the dot.
    pub fn library_extension(self) -> &'static str {
        match self {
            OsFamily::Windows => ".dll",
            OsFamily::Unix => ".so",
            OsFamily::Darwin => ".dylib",
        }
    }

    /// Name fragment used by portable-bundle file names.
    pub fn bundle_name(self) -> &'static str {
        match self {
            OsFamily::Windows => "win32",
            OsFamily::Unix => "linux",
            OsFamily::Darwin => "macosx",
        }
    }

    /// The family this crate was compiled for.
    pub fn current() -> Self {
        if cfg!(windows) {
            OsFamily::Windows
        } else if cfg!(target_vendor = "apple") {
            OsFamily::Darwin
        } else {
            OsFamily::Unix
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OsFamily::Windows => "windows",
            OsFamily::Unix => "unix",
            OsFamily::Darwin => "darwin",
        };
        write!(f, "{}", name)
    }
}

/// Binary-header derived ABI width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbiWidth {
    Unknown,
    Bits32,
    Bits64,
}

impl AbiWidth {
    /// Width of the running process.
    pub fn current() -> Self {
        if cfg!(target_pointer_width = "64") {
            AbiWidth::Bits64
        } else if cfg!(target_pointer_width = "32") {
            AbiWidth::Bits32
        } else {
            AbiWidth::Unknown
        }
    }
}

impl fmt::Display for AbiWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiWidth::Unknown => write!(f, "unknown"),
            AbiWidth::Bits32 => write!(f, "32-bit"),
            AbiWidth::Bits64 => write!(f, "64-bit"),
        }
    }
}

/// Platform facts provider: pure queries, no side effects.
pub trait PlatformFacts: Send + Sync {
    /// Family of the host operating system
    fn os_family(&self) -> OsFamily;

    /// ABI width of the host process
    fn abi_width(&self) -> AbiWidth;

    /// Processor name used for architecture-specific subfolders
    fn processor_name(&self) -> &str;

    /// Guess the family a library file was built for from its name
    fn guess_os_family(&self, path: &Path) -> Option<OsFamily> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".dll") {
            Some(OsFamily::Windows)
        } else if name.ends_with(".dylib") {
            Some(OsFamily::Darwin)
        } else if name.ends_with(".so") || name.contains(".so.") {
            Some(OsFamily::Unix)
        } else {
            None
        }
    }

    /// Whether the host belongs to the given family
    fn is_os_family(&self, family: OsFamily) -> bool {
        self.os_family() == family
    }

    /// Whether a library file comes from a trusted installation
    fn is_trusted(&self, path: &Path) -> bool {
        file_is_trusted(path)
    }
}

/// The facts of the running process.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPlatform;

impl PlatformFacts for HostPlatform {
    fn os_family(&self) -> OsFamily {
        OsFamily::current()
    }

    fn abi_width(&self) -> AbiWidth {
        AbiWidth::current()
    }

    fn processor_name(&self) -> &str {
        std::env::consts::ARCH
    }
}

#[cfg(unix)]
fn file_is_trusted(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match std::fs::metadata(path) {
        // Owned by root and not writable by group or others.
        Ok(meta) => meta.uid() == 0 && meta.mode() & 0o022 == 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn file_is_trusted(_path: &Path) -> bool {
    false
}

/// Registry hive searched on the windowing family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryHive {
    CurrentUser,
    LocalMachine,
}

impl fmt::Display for RegistryHive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryHive::CurrentUser => write!(f, "HKEY_CURRENT_USER"),
            RegistryHive::LocalMachine => write!(f, "HKEY_LOCAL_MACHINE"),
        }
    }
}

/// Environment, registry and executable-location lookups.
pub trait SearchEnvironment: Send + Sync {
    /// Value of an environment variable
    fn var(&self, name: &str) -> Option<String>;

    /// Directory holding the current executable
    fn executable_dir(&self) -> Option<PathBuf>;

    /// Default values of the immediate subkeys of `key`, read as directories
    fn registry_subkey_dirs(&self, hive: RegistryHive, key: &str) -> std::io::Result<Vec<PathBuf>>;
}

/// Lookups against the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnvironment;

impl SearchEnvironment for SystemEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    fn executable_dir(&self) -> Option<PathBuf> {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
    }

    fn registry_subkey_dirs(&self, hive: RegistryHive, key: &str) -> std::io::Result<Vec<PathBuf>> {
        crate::find::registry::subkey_default_values(hive, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_os_family() {
        let host = HostPlatform;
        let guess = |p: &str| host.guess_os_family(Path::new(p));
        assert_eq!(guess("C:/Tcl/bin/tcl86t.dll"), Some(OsFamily::Windows));
        assert_eq!(host.guess_os_family(Path::new("/usr/lib/libtcl8.6.so")), Some(OsFamily::Unix));
        assert_eq!(guess("/usr/lib/libtcl8.6.so.0.0"), Some(OsFamily::Unix));
        assert_eq!(guess("/opt/lib/libtcl8.6.dylib"), Some(OsFamily::Darwin));
        assert_eq!(host.guess_os_family(Path::new("/opt/lib/tclConfig.sh")), None);
    }

    #[test]
    fn test_host_matches_itself() {
        let host = HostPlatform;
        assert!(host.is_os_family(OsFamily::current()));
        assert_eq!(host.abi_width(), AbiWidth::current());
    }
}
