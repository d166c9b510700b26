//! Patch levels, release levels and version bounds

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Smallest number of components a patch level carries.
pub const MIN_COMPONENTS: usize = 2;

/// Largest number of components a patch level carries.
pub const MAX_COMPONENTS: usize = 4;

/// A dotted version with two to four numeric components.
///
/// Missing trailing components compare as zero, so `8.6` and `8.6.0` are
/// equal; [`PatchLevel::specificity`] still tells them apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatchLevel {
    parts: Vec<u32>,
}

impl PatchLevel {
    /// Build a patch level from raw components, padding to two and
    /// truncating past four.
    pub fn new(parts: &[u32]) -> Self {
        let mut parts: Vec<u32> = parts.iter().copied().take(MAX_COMPONENTS).collect();
        while parts.len() < MIN_COMPONENTS {
            parts.push(0);
        }
        Self { parts }
    }

    pub fn major(&self) -> u32 {
        self.parts[0]
    }

    pub fn minor(&self) -> u32 {
        self.parts[1]
    }

    pub fn components(&self) -> &[u32] {
        &self.parts
    }

    /// Number of explicitly known components.
    pub fn specificity(&self) -> usize {
        self.parts.len()
    }

    /// Copy padded with zeros up to `count` components.
    pub fn zero_filled(&self, count: usize) -> Self {
        let mut parts = self.parts.clone();
        while parts.len() < count.min(MAX_COMPONENTS) {
            parts.push(0);
        }
        Self { parts }
    }

    /// The `major.minor` prefix.
    pub fn two_part(&self) -> Self {
        Self::new(&self.parts[..MIN_COMPONENTS])
    }

    /// Normalize a version token captured from a file name.
    ///
    /// Dotted tokens split on the separator. Undotted tokens read as
    /// `major`, `minor` and the remaining digits, so `86` is `8.6` and
    /// `8613` is `8.6.13`.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        if token.contains('.') {
            return token.parse().ok();
        }
        if !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let digits: Vec<u32> = token.bytes().map(|b| u32::from(b - b'0')).collect();
        let mut parts = vec![digits[0]];
        if digits.len() > 1 {
            parts.push(digits[1]);
        }
        if digits.len() > 2 {
            parts.push(token[2..].parse().ok()?);
        }
        Some(Self::new(&parts))
    }
}

impl PartialEq for PatchLevel {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PatchLevel {}

impl Hash for PatchLevel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut parts = self.parts.clone();
        while parts.last() == Some(&0) {
            parts.pop();
        }
        parts.hash(state);
    }
}

impl PartialOrd for PatchLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PatchLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in 0..MAX_COMPONENTS {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for PatchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: Vec<String> = self.parts.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", text.join("."))
    }
}

/// Error returned when a version string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bad version \"{0}\": expected 1 to 4 dot-separated numbers")]
pub struct VersionParseError(pub String);

impl FromStr for PatchLevel {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pieces: Vec<&str> = s.trim().split('.').collect();
        if pieces.is_empty() || pieces.len() > MAX_COMPONENTS {
            return Err(VersionParseError(s.to_string()));
        }
        let mut parts = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let value = piece
                .parse::<u32>()
                .map_err(|_| VersionParseError(s.to_string()))?;
            parts.push(value);
        }
        Ok(Self::new(&parts))
    }
}

impl TryFrom<String> for PatchLevel {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PatchLevel> for String {
    fn from(value: PatchLevel) -> Self {
        value.to_string()
    }
}

/// Maturity tag, ordered independently of the numeric version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReleaseLevel {
    Unknown,
    Alpha,
    Beta,
    Final,
}

impl ReleaseLevel {
    /// Map the native `TCL_*_RELEASE` constant (0 alpha, 1 beta, 2 final).
    pub fn from_native(value: i32) -> Self {
        match value {
            0 => ReleaseLevel::Alpha,
            1 => ReleaseLevel::Beta,
            2 => ReleaseLevel::Final,
            _ => ReleaseLevel::Unknown,
        }
    }

    /// Map a name suffix letter (`a` or `b`).
    pub fn from_suffix(suffix: &str) -> Self {
        match suffix {
            "a" | "A" => ReleaseLevel::Alpha,
            "b" | "B" => ReleaseLevel::Beta,
            _ => ReleaseLevel::Final,
        }
    }
}

impl fmt::Display for ReleaseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReleaseLevel::Unknown => "unknown",
            ReleaseLevel::Alpha => "alpha",
            ReleaseLevel::Beta => "beta",
            ReleaseLevel::Final => "final",
        };
        write!(f, "{}", name)
    }
}

/// Inclusive minimum/maximum version bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBounds {
    pub minimum: Option<PatchLevel>,
    pub maximum: Option<PatchLevel>,
}

impl VersionBounds {
    pub fn new(minimum: Option<PatchLevel>, maximum: Option<PatchLevel>) -> Self {
        Self { minimum, maximum }
    }

    pub fn is_unbounded(&self) -> bool {
        self.minimum.is_none() && self.maximum.is_none()
    }

    /// Whether `version` lies within both bounds, inclusive.
    pub fn contains(&self, version: &PatchLevel) -> bool {
        self.violation(version).is_none()
    }

    /// Describe which bound `version` violates, if any.
    pub fn violation(&self, version: &PatchLevel) -> Option<String> {
        if let Some(minimum) = &self.minimum {
            if version < minimum {
                return Some(format!("version {} is below minimum {}", version, minimum));
            }
        }
        if let Some(maximum) = &self.maximum {
            if version > maximum {
                return Some(format!("version {} is above maximum {}", version, maximum));
            }
        }
        None
    }
}

impl fmt::Display for VersionBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<PatchLevel>| {
            v.as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "*".to_string())
        };
        write!(f, "{}-{}", show(&self.minimum), show(&self.maximum))
    }
}

/// Enumeration of candidate `major.minor` versions between two bounds.
///
/// Within the first and last major version the bounds' own minor numbers
/// apply; every major in between runs from `intermediate_minimum` to
/// `intermediate_maximum`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionRange {
    pub minimum: PatchLevel,
    pub maximum: PatchLevel,
    pub major_increment: u32,
    pub minor_increment: u32,
    pub intermediate_minimum: u32,
    pub intermediate_maximum: u32,
}

impl Default for VersionRange {
    fn default() -> Self {
        Self {
            minimum: PatchLevel::new(&[8, 4]),
            maximum: PatchLevel::new(&[9, 1]),
            major_increment: 1,
            minor_increment: 1,
            intermediate_minimum: 0,
            intermediate_maximum: 9,
        }
    }
}

impl VersionRange {
    /// Every version in the range, ascending.
    pub fn versions(&self) -> Vec<PatchLevel> {
        let mut out = Vec::new();
        if self.minimum > self.maximum {
            return out;
        }
        let major_step = self.major_increment.max(1);
        let minor_step = self.minor_increment.max(1);
        let (first, last) = (self.minimum.major(), self.maximum.major());

        let mut major = first;
        while major <= last {
            let low = if major == first { self.minimum.minor() } else { self.intermediate_minimum };
            let high = if major == last { self.maximum.minor() } else { self.intermediate_maximum };
            let mut minor = low;
            while minor <= high {
                out.push(PatchLevel::new(&[major, minor]));
                minor = match minor.checked_add(minor_step) {
                    Some(next) => next,
                    None => break,
                };
            }
            major = match major.checked_add(major_step) {
                Some(next) => next,
                None => break,
            };
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PatchLevel {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_pads_to_two_components() {
        assert_eq!(v("9").components(), &[9, 0]);
        assert_eq!(v("8.6.13").components(), &[8, 6, 13]);
        assert!("8.6.1.2.3".parse::<PatchLevel>().is_err());
        assert!("8.x".parse::<PatchLevel>().is_err());
    }

    #[test]
    fn test_missing_components_compare_as_zero() {
        assert_eq!(v("8.6"), v("8.6.0"));
        assert_ne!(v("8.6").specificity(), v("8.6.0").specificity());
        assert!(v("8.6.1") > v("8.6"));
        assert!(v("8.10") > v("8.9.99"));
    }

    #[test]
    fn test_undotted_token() {
        assert_eq!(PatchLevel::from_token("86").unwrap().components(), &[8, 6]);
        assert_eq!(PatchLevel::from_token("8613").unwrap().components(), &[8, 6, 13]);
        assert_eq!(PatchLevel::from_token("9").unwrap().components(), &[9, 0]);
        assert_eq!(PatchLevel::from_token("8.5.19").unwrap().components(), &[8, 5, 19]);
        assert!(PatchLevel::from_token("").is_none());
        assert!(PatchLevel::from_token("8b").is_none());
    }

    #[test]
    fn test_zero_fill() {
        assert_eq!(v("8.6").zero_filled(4).components(), &[8, 6, 0, 0]);
        assert_eq!(v("8.6.1.2").zero_filled(4).components(), &[8, 6, 1, 2]);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let bounds = VersionBounds::new(Some(v("8.5")), Some(v("8.6.13")));
        assert!(bounds.contains(&v("8.5")));
        assert!(bounds.contains(&v("8.6.13")));
        assert!(!bounds.contains(&v("8.4.99")));
        assert!(!bounds.contains(&v("8.6.14")));
        assert!(VersionBounds::default().contains(&v("1.0")));
    }

    #[test]
    fn test_version_range() {
        let range = VersionRange {
            minimum: v("8.4"),
            maximum: v("9.1"),
            intermediate_maximum: 6,
            ..VersionRange::default()
        };
        let text: Vec<String> = range.versions().iter().map(|v| v.to_string()).collect();
        assert_eq!(text, ["8.4", "8.5", "8.6", "9.0", "9.1"]);

        let range = VersionRange {
            minimum: v("8.0"),
            maximum: v("8.6"),
            minor_increment: 2,
            ..VersionRange::default()
        };
        assert_eq!(range.versions().len(), 4);

        let inverted = VersionRange {
            minimum: v("9.0"),
            maximum: v("8.6"),
            ..VersionRange::default()
        };
        assert!(inverted.versions().is_empty());
    }

    #[test]
    fn test_release_level_order() {
        assert!(ReleaseLevel::Final > ReleaseLevel::Beta);
        assert!(ReleaseLevel::Beta > ReleaseLevel::Alpha);
        assert!(ReleaseLevel::Alpha > ReleaseLevel::Unknown);
        assert_eq!(ReleaseLevel::from_native(2), ReleaseLevel::Final);
        assert_eq!(ReleaseLevel::from_suffix("b"), ReleaseLevel::Beta);
    }
}
