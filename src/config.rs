//! tclhost Configuration
//!
//! Handles parsing of tclhost.toml files and turns them into search, load and
//! unload options.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::build::{FindFlags, PatternCatalog};
use crate::find::{FindOptions, SearchContext};
use crate::runtime::{LoadFlags, LoadOptions, UnloadFlags};
use crate::version::{PatchLevel, VersionBounds};

/// File name searched for by [`HostConfig::find_and_load`].
pub const CONFIG_FILE: &str = "tclhost.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid flags \"{text}\": {reason}")]
    Flags { text: String, reason: String },

    #[error("Invalid version \"{0}\"")]
    Version(String),

    #[error("Invalid name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching tclhost.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    /// Search settings
    #[serde(default)]
    pub find: FindConfig,

    /// Session bring-up
    #[serde(default)]
    pub load: LoadConfig,

    /// Session teardown
    #[serde(default)]
    pub unload: UnloadConfig,
}

impl HostConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: HostConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                tracing::debug!(path = %config_path.display(), "using configuration");
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Search options described by the `[find]` table.
    pub fn find_options(&self) -> ConfigResult<FindOptions> {
        let find = &self.find;
        let flags = match &find.flags {
            Some(text) => parse_flags::<FindFlags>(text)?,
            None => FindFlags::DEFAULT,
        };
        let patterns = if find.extra_patterns.is_empty() {
            None
        } else {
            Some(Arc::new(PatternCatalog::new(&find.extra_patterns)?))
        };

        Ok(FindOptions {
            flags,
            paths: find.paths.clone(),
            script: find.script.clone(),
            bounds: VersionBounds::new(
                parse_version(find.minimum_version.as_deref())?,
                parse_version(find.maximum_version.as_deref())?,
            ),
            unknown_version: parse_version(find.unknown_version.as_deref())?,
            context: SearchContext {
                script_path: find.script_path.clone(),
                auto_path: find.auto_path.clone(),
                package_root: find.package_root.clone(),
                package_name: find.package_name.clone(),
                host_module_path: None,
                binary_path: find.binary_path.clone(),
                base_path: find.base_path.clone(),
                registry_key: find.registry_key.clone(),
                environment: find.environment.clone(),
                shell: find.shell.clone(),
            },
            callback: None,
            patterns,
        })
    }

    /// Load options: the `[find]` table plus the `[load]` table.
    pub fn load_options(&self) -> ConfigResult<LoadOptions> {
        let flags = match &self.load.flags {
            Some(text) => parse_flags::<LoadFlags>(text)?,
            None => LoadFlags::DEFAULT,
        };
        Ok(LoadOptions {
            find: self.find_options()?,
            flags,
            argv0: self.load.argv0.clone(),
        })
    }

    pub fn unload_flags(&self) -> ConfigResult<UnloadFlags> {
        match &self.unload.flags {
            Some(text) => parse_flags::<UnloadFlags>(text),
            None => Ok(UnloadFlags::DEFAULT),
        }
    }
}

/// The `[find]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FindConfig {
    /// Flag names joined with `|`
    #[serde(default)]
    pub flags: Option<String>,

    /// Explicit files or directories
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    #[serde(default)]
    pub auto_path: Vec<PathBuf>,

    #[serde(default)]
    pub script_path: Option<PathBuf>,

    #[serde(default)]
    pub package_root: Option<PathBuf>,

    #[serde(default)]
    pub package_name: Option<String>,

    #[serde(default)]
    pub binary_path: Option<PathBuf>,

    /// Base directory for the externals and peer strategies
    #[serde(default)]
    pub base_path: Option<PathBuf>,

    #[serde(default)]
    pub registry_key: Option<String>,

    /// Extra override variable names
    #[serde(default)]
    pub environment: Vec<String>,

    #[serde(default)]
    pub minimum_version: Option<String>,

    #[serde(default)]
    pub maximum_version: Option<String>,

    /// Version assumed when a recognized file has none
    #[serde(default)]
    pub unknown_version: Option<String>,

    /// Regular expressions tried before the built-in name patterns
    #[serde(default)]
    pub extra_patterns: Vec<String>,

    /// Script for the evaluation fallback
    #[serde(default)]
    pub script: Option<String>,

    #[serde(default)]
    pub shell: Option<String>,
}

/// The `[load]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoadConfig {
    #[serde(default)]
    pub flags: Option<String>,

    #[serde(default)]
    pub argv0: Option<String>,
}

/// The `[unload]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UnloadConfig {
    #[serde(default)]
    pub flags: Option<String>,
}

/// Parse the `A | B` text form of a flags type.
pub fn parse_flags<F>(text: &str) -> ConfigResult<F>
where
    F: bitflags::Flags,
    F::Bits: bitflags::parser::ParseHex,
{
    bitflags::parser::from_str::<F>(text).map_err(|e| ConfigError::Flags {
        text: text.to_string(),
        reason: e.to_string(),
    })
}

fn parse_version(text: Option<&str>) -> ConfigResult<Option<PatchLevel>> {
    text.map(|t| t.parse::<PatchLevel>().map_err(|_| ConfigError::Version(t.to_string())))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        let options = config.find_options().unwrap();
        assert_eq!(options.flags, FindFlags::DEFAULT);
        assert!(options.bounds.is_unbounded());
        assert!(options.patterns.is_none());
        assert_eq!(config.unload_flags().unwrap(), UnloadFlags::DEFAULT);
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[find]
flags = "SPECIFIC_PATH | PRIMARY_NAME_PATTERN_LIST"
paths = ["/opt/tcl/lib"]
package_name = "Tcl"
minimum_version = "8.4"
maximum_version = "9.0"
extra_patterns = ['^mytcl(\d+)\.so$']

[load]
flags = "FIND_EXECUTABLE | REQUIRE_THREADED"

[unload]
flags = "FORCE | FREE_LIBRARY"
"#;
        let config: HostConfig = toml::from_str(toml_str).unwrap();
        let options = config.load_options().unwrap();
        assert_eq!(
            options.find.flags,
            FindFlags::SPECIFIC_PATH | FindFlags::PRIMARY_NAME_PATTERN_LIST
        );
        assert_eq!(options.find.paths, vec![PathBuf::from("/opt/tcl/lib")]);
        assert_eq!(options.find.context.package_name.as_deref(), Some("Tcl"));
        assert_eq!(options.find.bounds.minimum, Some("8.4".parse().unwrap()));
        assert!(options.find.patterns.is_some());
        assert!(options.flags.contains(LoadFlags::REQUIRE_THREADED));
        assert_eq!(
            config.unload_flags().unwrap(),
            UnloadFlags::FORCE | UnloadFlags::FREE_LIBRARY
        );
    }

    #[test]
    fn test_invalid_values() {
        let mut config = HostConfig::default();
        config.find.flags = Some("NOT_A_FLAG".to_string());
        assert!(matches!(config.find_options(), Err(ConfigError::Flags { .. })));

        let mut config = HostConfig::default();
        config.find.minimum_version = Some("eight".to_string());
        assert!(matches!(config.find_options(), Err(ConfigError::Version(_))));

        let mut config = HostConfig::default();
        config.find.extra_patterns = vec!["(".to_string()];
        assert!(matches!(config.find_options(), Err(ConfigError::Pattern(_))));
    }

    #[test]
    fn test_find_upward() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join(CONFIG_FILE), "[find]\npackage_name = \"Tcl\"\n").unwrap();

        let config = HostConfig::find_and_load(&nested).unwrap();
        assert_eq!(config.find.package_name.as_deref(), Some("Tcl"));

        let missing = HostConfig::load(&root.path().join("other.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::NotFound(_)));
    }
}
