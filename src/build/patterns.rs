//! Name pattern catalog
//!
//! Per OS family, three prioritized regular expression lists recognize
//! candidate library file names: primary (canonical shared library names),
//! secondary (portable all-in-one bundles) and other (threaded base kits and
//! self-contained kits). A caller-supplied extra list is tried before all
//! of them.
//!
//! Each pattern comes as a pair: a recognizer and a parallel capturing form
//! with the named groups `version`, `threaded` and `debug`. The optional
//! `rel`/`serial` groups carry an alpha/beta suffix. Extra patterns may use
//! plain positional groups instead: 1 is the version, 2 threaded, 3 debug.
//!
//! The catalog is an immutable snapshot. [`reload_patterns`] builds a new one
//! and swaps it in; readers holding the old snapshot keep a consistent view.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};

use super::{FindFlags, Priority};
use crate::platform::OsFamily;
use crate::version::{PatchLevel, ReleaseLevel};

/// Which list a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternList {
    Extra,
    Primary,
    Secondary,
    Other,
}

impl PatternList {
    /// Lists in the order they are consulted.
    pub const ORDER: [PatternList; 4] = [
        PatternList::Extra,
        PatternList::Primary,
        PatternList::Secondary,
        PatternList::Other,
    ];

    /// The flag that enables this list.
    pub fn flag(self) -> FindFlags {
        match self {
            PatternList::Extra => FindFlags::EXTRA_NAME_PATTERN_LIST,
            PatternList::Primary => FindFlags::PRIMARY_NAME_PATTERN_LIST,
            PatternList::Secondary => FindFlags::SECONDARY_NAME_PATTERN_LIST,
            PatternList::Other => FindFlags::OTHER_NAME_PATTERN_LIST,
        }
    }
}

/// One recognizer/capture pair.
#[derive(Debug, Clone)]
pub struct NamePattern {
    pub list: PatternList,
    recognize: Regex,
    capture: Regex,
    /// Every build matching this pattern is threaded
    implies_threaded: bool,
    /// Uses named groups rather than positional ones
    named: bool,
}

impl NamePattern {
    fn new(
        list: PatternList,
        recognize: &str,
        capture: &str,
        implies_threaded: bool,
        nocase: bool,
    ) -> Result<Self, regex::Error> {
        let capture = RegexBuilder::new(capture).case_insensitive(nocase).build()?;
        let named = capture.capture_names().any(|n| n == Some("version"));
        Ok(Self {
            list,
            recognize: RegexBuilder::new(recognize).case_insensitive(nocase).build()?,
            capture,
            implies_threaded,
            named,
        })
    }

    fn group<'h>(
        &self,
        caps: &regex::Captures<'h>,
        name: &str,
        index: usize,
    ) -> Option<regex::Match<'h>> {
        if self.named {
            caps.name(name)
        } else {
            caps.get(index)
        }
    }

    pub fn as_str(&self) -> &str {
        self.recognize.as_str()
    }

    pub fn is_match(&self, file_name: &str) -> bool {
        self.recognize.is_match(file_name)
    }
}

/// Result of recognizing a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternMatch {
    pub family: OsFamily,
    pub list: PatternList,
    pub priority: Priority,
}

/// Fingerprint extracted from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameInfo {
    pub family: OsFamily,
    pub list: PatternList,
    pub priority: Priority,
    pub patch_level: PatchLevel,
    pub release_level: ReleaseLevel,
    pub threaded: bool,
    pub debug: bool,
}

#[derive(Debug, Clone, Default)]
struct FamilyPatterns {
    primary: Vec<NamePattern>,
    secondary: Vec<NamePattern>,
    other: Vec<NamePattern>,
}

impl FamilyPatterns {
    fn list(&self, list: PatternList) -> &[NamePattern] {
        match list {
            PatternList::Primary => &self.primary,
            PatternList::Secondary => &self.secondary,
            PatternList::Other => &self.other,
            PatternList::Extra => &[],
        }
    }
}

/// Immutable snapshot of every name pattern.
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    extra: Vec<NamePattern>,
    families: HashMap<OsFamily, FamilyPatterns>,
}

static CATALOG: Lazy<RwLock<Arc<PatternCatalog>>> =
    Lazy::new(|| RwLock::new(Arc::new(PatternCatalog::builtin())));

/// Build a catalog with the given extra patterns and swap it in.
pub fn reload_patterns(extra: &[String]) -> Result<Arc<PatternCatalog>, regex::Error> {
    let catalog = Arc::new(PatternCatalog::new(extra)?);
    *CATALOG.write() = Arc::clone(&catalog);
    tracing::debug!(extra = extra.len(), "name pattern catalog reloaded");
    Ok(catalog)
}

impl PatternCatalog {
    /// The snapshot currently in effect.
    pub fn current() -> Arc<PatternCatalog> {
        Arc::clone(&CATALOG.read())
    }

    /// Built-in patterns plus caller-supplied extras.
    ///
    /// Extra patterns use one expression for both recognizing and capturing,
    /// so they should follow the group convention.
    pub fn new(extra: &[String]) -> Result<Self, regex::Error> {
        let mut catalog = Self::builtin();
        for pattern in extra {
            let nocase = cfg!(windows);
            catalog
                .extra
                .push(NamePattern::new(PatternList::Extra, pattern, pattern, false, nocase)?);
        }
        Ok(catalog)
    }

    fn builtin() -> Self {
        let mut families = HashMap::new();
        for family in OsFamily::ALL {
            families.insert(family, builtin_family(family));
        }
        Self {
            extra: Vec::new(),
            families,
        }
    }

    /// Patterns enabled by `flags` for one family, in priority order.
    pub fn enabled(&self, family: OsFamily, flags: FindFlags) -> Vec<&NamePattern> {
        let mut out = Vec::new();
        let Some(lists) = self.families.get(&family) else {
            return out;
        };
        for list in PatternList::ORDER {
            if !flags.contains(list.flag()) {
                continue;
            }
            match list {
                PatternList::Extra => out.extend(self.extra.iter()),
                other => out.extend(lists.list(other).iter()),
            }
        }
        out
    }

    /// Recognize `file_name`, trying `preferred` first and then the other
    /// families. The priority is the index of the first matching pattern.
    pub fn recognize(
        &self,
        file_name: &str,
        flags: FindFlags,
        preferred: OsFamily,
    ) -> Option<PatternMatch> {
        for family in family_order(preferred) {
            for (index, pattern) in self.enabled(family, flags).into_iter().enumerate() {
                if pattern.is_match(file_name) {
                    return Some(PatternMatch {
                        family,
                        list: pattern.list,
                        priority: Priority::from_index(index),
                    });
                }
            }
        }
        None
    }

    /// Extract the version fingerprint encoded in `file_name`.
    ///
    /// Every list is consulted here regardless of `flags`; the flags only
    /// decide whether to zero-fill the version.
    pub fn capture(
        &self,
        file_name: &str,
        flags: FindFlags,
        preferred: OsFamily,
    ) -> Option<NameInfo> {
        let all = flags | FindFlags::NAME_PATTERN_MASK;
        for family in family_order(preferred) {
            for (index, pattern) in self.enabled(family, all).into_iter().enumerate() {
                let Some(caps) = pattern.capture.captures(file_name) else {
                    continue;
                };
                let Some(token) = pattern.group(&caps, "version", 1) else {
                    continue;
                };
                let Some(mut patch_level) = PatchLevel::from_token(token.as_str()) else {
                    continue;
                };
                let release_level = match caps.name("rel") {
                    Some(rel) => {
                        let serial = caps
                            .name("serial")
                            .and_then(|s| s.as_str().parse::<u32>().ok())
                            .unwrap_or(0);
                        let mut parts = patch_level.components()[..2].to_vec();
                        parts.push(serial);
                        patch_level = PatchLevel::new(&parts);
                        ReleaseLevel::from_suffix(rel.as_str())
                    }
                    None => ReleaseLevel::Final,
                };
                if flags.contains(FindFlags::ZERO_COMPONENTS) {
                    patch_level = patch_level.zero_filled(4);
                }
                return Some(NameInfo {
                    family,
                    list: pattern.list,
                    priority: Priority::from_index(index),
                    patch_level,
                    release_level,
                    threaded: pattern.implies_threaded
                        || pattern.group(&caps, "threaded", 2).is_some(),
                    debug: pattern.group(&caps, "debug", 3).is_some(),
                });
            }
        }
        None
    }
}

fn family_order(preferred: OsFamily) -> impl Iterator<Item = OsFamily> {
    std::iter::once(preferred).chain(OsFamily::ALL.into_iter().filter(move |f| *f != preferred))
}

/// Processor names seen in portable bundle file names.
const BUNDLE_ARCH: &str = r"(?:ix86|x86|x86_64|amd64|arm64|aarch64|universal)";

fn builtin_family(family: OsFamily) -> FamilyPatterns {
    let nocase = family == OsFamily::Windows;
    let ext = regex::escape(family.library_extension());
    let os = family.bundle_name();
    let build = |list, recognize: String, capture: String, threaded| {
        NamePattern::new(list, &recognize, &capture, threaded, nocase)
            .expect("built-in name pattern")
    };

    let primary = match family {
        OsFamily::Windows => build(
            PatternList::Primary,
            format!(r"^tcl\d+t?s?g?x?{ext}$"),
            format!(r"^tcl(?P<version>\d+)(?P<threaded>t)?s?(?P<debug>g)?x?{ext}$"),
            false,
        ),
        OsFamily::Unix => build(
            PatternList::Primary,
            format!(r"^libtcl\d+(?:\.\d+)?t?g?{ext}(?:\.\d+){{0,2}}$"),
            format!(r"^libtcl(?P<version>\d+(?:\.\d+)?)(?P<threaded>t)?(?P<debug>g)?{ext}(?:\.\d+){{0,2}}$"),
            false,
        ),
        OsFamily::Darwin => build(
            PatternList::Primary,
            format!(r"^libtcl\d+(?:\.\d+)?t?g?{ext}$"),
            format!(r"^libtcl(?P<version>\d+(?:\.\d+)?)(?P<threaded>t)?(?P<debug>g)?{ext}$"),
            false,
        ),
    };

    let secondary = build(
        PatternList::Secondary,
        format!(r"^base-tcl\d+\.\d+-{os}-{BUNDLE_ARCH}{ext}$"),
        format!(r"^base-tcl(?P<version>\d+\.\d+)-{os}-{BUNDLE_ARCH}{ext}$"),
        false,
    );

    let threaded_kit = build(
        PatternList::Other,
        format!(r"^base-tcl\d+\.\d+-thread-{os}-{BUNDLE_ARCH}{ext}$"),
        format!(r"^base-tcl(?P<version>\d+\.\d+)(?P<threaded>-thread)-{os}-{BUNDLE_ARCH}{ext}$"),
        true,
    );
    let self_contained_kit = build(
        PatternList::Other,
        format!(r"^lib(?:tcl)?kit\d+\.?\d*(?:\.\d+)?(?:[ab]\d*)?{ext}$"),
        format!(r"^lib(?:tcl)?kit(?P<version>\d+\.?\d*(?:\.\d+)?)(?:(?P<rel>[ab])(?P<serial>\d+)?)?{ext}$"),
        true,
    );

    FamilyPatterns {
        primary: vec![primary],
        secondary: vec![secondary],
        other: vec![threaded_kit, self_contained_kit],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PatternCatalog {
        PatternCatalog::new(&[]).unwrap()
    }

    #[test]
    fn test_primary_names_get_first_priority() {
        let catalog = catalog();
        let flags = FindFlags::DEFAULT;
        for (name, family) in [
            ("tcl86t.dll", OsFamily::Windows),
            ("TCL86TG.DLL", OsFamily::Windows),
            ("libtcl8.6.so", OsFamily::Unix),
            ("libtcl8.6.so.0.0", OsFamily::Unix),
            ("libtcl8.6.dylib", OsFamily::Darwin),
        ] {
            let m = catalog.recognize(name, flags, family).unwrap();
            assert_eq!(m.family, family, "{}", name);
            assert_eq!(m.list, PatternList::Primary);
            assert_eq!(m.priority, Priority::from_index(0));
        }
    }

    #[test]
    fn test_disabled_lists_are_skipped() {
        let catalog = catalog();
        let name = "base-tcl8.6-thread-win32-x86_64.dll";
        let primary_only = FindFlags::PRIMARY_NAME_PATTERN_LIST;
        assert!(catalog.recognize(name, primary_only, OsFamily::Windows).is_none());
        let m = catalog.recognize(name, FindFlags::DEFAULT, OsFamily::Windows).unwrap();
        assert_eq!(m.list, PatternList::Other);
        assert_eq!(m.priority, Priority::from_index(2));
    }

    #[test]
    fn test_rejects_unrelated_names() {
        let catalog = catalog();
        for name in ["tclsh86.exe", "libtk8.6.so", "tcl.dll", "libtcl.so", "tclConfig.sh"] {
            assert!(
                catalog.recognize(name, FindFlags::DEFAULT, OsFamily::Unix).is_none(),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_capture_windows_markers() {
        let catalog = catalog();
        let info = catalog.capture("tcl86tg.dll", FindFlags::DEFAULT, OsFamily::Windows).unwrap();
        assert_eq!(info.patch_level.to_string(), "8.6");
        assert!(info.threaded);
        assert!(info.debug);

        let info = catalog.capture("tcl86.dll", FindFlags::DEFAULT, OsFamily::Windows).unwrap();
        assert!(!info.threaded);
        assert!(!info.debug);
    }

    #[test]
    fn test_capture_exact_dotted_version() {
        let catalog = catalog();
        let info = catalog.capture("libtcl8.5.so", FindFlags::DEFAULT, OsFamily::Unix).unwrap();
        assert_eq!(info.patch_level.components(), &[8, 5]);
        let info = catalog
            .capture("libtcl9.0.dylib", FindFlags::DEFAULT, OsFamily::Darwin)
            .unwrap();
        assert_eq!(info.patch_level.components(), &[9, 0]);
        let zero = FindFlags::DEFAULT | FindFlags::ZERO_COMPONENTS;
        let info = catalog.capture("libtcl8.6.so", zero, OsFamily::Unix).unwrap();
        assert_eq!(info.patch_level.components(), &[8, 6, 0, 0]);
    }

    #[test]
    fn test_capture_kit_release_suffix() {
        let catalog = catalog();
        let info = catalog
            .capture("libtclkit8.6b2.so", FindFlags::DEFAULT, OsFamily::Unix)
            .unwrap();
        assert_eq!(info.release_level, ReleaseLevel::Beta);
        assert_eq!(info.patch_level.components(), &[8, 6, 2]);
        assert!(info.threaded);

        let info = catalog.capture("libkit8.6.so", FindFlags::DEFAULT, OsFamily::Unix).unwrap();
        assert_eq!(info.release_level, ReleaseLevel::Final);
        assert_eq!(info.list, PatternList::Other);
    }

    #[test]
    fn test_extra_patterns_come_first() {
        let catalog = PatternCatalog::new(&[r"^mytcl(\d+)(t)?\.so$".to_string()]).unwrap();
        let flags = FindFlags::DEFAULT | FindFlags::EXTRA_NAME_PATTERN_LIST;
        let m = catalog.recognize("mytcl86t.so", flags, OsFamily::Unix).unwrap();
        assert_eq!(m.list, PatternList::Extra);
        assert_eq!(m.priority, Priority::from_index(0));
        let m = catalog.recognize("libtcl8.6.so", flags, OsFamily::Unix).unwrap();
        assert_eq!(m.priority, Priority::from_index(1));
    }

    #[test]
    fn test_bad_extra_pattern_is_an_error() {
        assert!(PatternCatalog::new(&["(".to_string()]).is_err());
    }
}
