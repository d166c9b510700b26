//! Build catalog
//!
//! Path-keyed, insertion-ordered collection of [`TclBuild`]s accumulated
//! over one search pass. Iteration order is discovery order, which the
//! selector's final tie-break depends on.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeSeq, Serializer};

use super::{FindFlags, TclBuild};
use crate::select::is_better;
use crate::version::VersionBounds;

/// At most one build per path.
#[derive(Debug, Clone, Default)]
pub struct BuildCatalog {
    builds: IndexMap<PathBuf, TclBuild>,
}

impl BuildCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `build`, or replace the entry already held for its path when
    /// `build` is judged better under `flags`.
    ///
    /// Returns whether the catalog changed. A replacement keeps the
    /// original position.
    pub fn add_or_replace(&mut self, build: TclBuild, flags: FindFlags) -> bool {
        match self.builds.get_mut(&build.path) {
            None => {
                self.builds.insert(build.path.clone(), build);
                true
            }
            Some(existing) => {
                if is_better(&build, existing, flags) {
                    *existing = build;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Drop every build outside `bounds`, returning the purged entries.
    pub fn retain_versions(&mut self, bounds: &VersionBounds) -> Vec<TclBuild> {
        if bounds.is_unbounded() {
            return Vec::new();
        }
        let mut purged = Vec::new();
        let builds = std::mem::take(&mut self.builds);
        for (path, build) in builds {
            if bounds.contains(&build.patch_level) {
                self.builds.insert(path, build);
            } else {
                purged.push(build);
            }
        }
        purged
    }

    pub fn get(&self, path: &Path) -> Option<&TclBuild> {
        self.builds.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.builds.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TclBuild> {
        self.builds.values()
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    pub fn clear(&mut self) {
        self.builds.clear();
    }
}

impl IntoIterator for BuildCatalog {
    type Item = TclBuild;
    type IntoIter = indexmap::map::IntoValues<PathBuf, TclBuild>;

    fn into_iter(self) -> Self::IntoIter {
        self.builds.into_values()
    }
}

impl FromIterator<TclBuild> for BuildCatalog {
    fn from_iter<I: IntoIterator<Item = TclBuild>>(iter: I) -> Self {
        let mut catalog = BuildCatalog::new();
        for build in iter {
            catalog.add_or_replace(build, FindFlags::DEFAULT);
        }
        catalog
    }
}

impl Serialize for BuildCatalog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.builds.len()))?;
        for build in self.builds.values() {
            seq.serialize_element(build)?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::tests::sample;
    use crate::build::{Priority, Sequence};

    #[test]
    fn test_insertion_order_is_kept() {
        let catalog: BuildCatalog = ["/b/libtcl8.6.so", "/a/libtcl8.5.so", "/c/libtcl9.0.so"]
            .iter()
            .map(|p| sample(p, "8.6"))
            .collect();
        let paths: Vec<_> = catalog.iter().map(|b| b.path.to_string_lossy().into_owned()).collect();
        assert_eq!(paths, ["/b/libtcl8.6.so", "/a/libtcl8.5.so", "/c/libtcl9.0.so"]);
    }

    #[test]
    fn test_weaker_duplicate_does_not_replace() {
        let mut catalog = BuildCatalog::new();
        let mut strong = sample("/usr/lib/libtcl8.6.so", "8.6.13");
        strong.priority = Priority::HIGHEST;
        assert!(catalog.add_or_replace(strong, FindFlags::DEFAULT));

        let mut weak = sample("/usr/lib/libtcl8.6.so", "8.6.13");
        weak.sequence = Sequence(5);
        assert!(!catalog.add_or_replace(weak, FindFlags::DEFAULT));
        assert_eq!(catalog.len(), 1);
        let kept = catalog.get(Path::new("/usr/lib/libtcl8.6.so")).unwrap();
        assert_eq!(kept.priority, Priority::HIGHEST);
    }

    #[test]
    fn test_better_metadata_replaces_in_place() {
        let mut catalog = BuildCatalog::new();
        catalog.add_or_replace(sample("/x/libtcl8.6.so", "8.6"), FindFlags::DEFAULT);
        catalog.add_or_replace(sample("/y/libtcl8.5.so", "8.5"), FindFlags::DEFAULT);
        assert!(catalog.add_or_replace(sample("/x/libtcl8.6.so", "8.6.13"), FindFlags::DEFAULT));
        let first = catalog.iter().next().unwrap();
        assert_eq!(first.patch_level.to_string(), "8.6.13");
    }

    #[test]
    fn test_retain_versions_is_inclusive() {
        let mut catalog: BuildCatalog =
            [("/a", "8.4"), ("/b", "8.5"), ("/c", "8.6"), ("/d", "8.6.1")]
                .iter()
                .map(|(p, v)| sample(p, v))
                .collect();
        let bounds = VersionBounds::new(Some("8.5".parse().unwrap()), Some("8.6".parse().unwrap()));
        let purged = catalog.retain_versions(&bounds);
        assert_eq!(purged.len(), 2);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains(Path::new("/b")));
        assert!(catalog.contains(Path::new("/c")));
    }
}
