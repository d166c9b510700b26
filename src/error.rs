//! Error taxonomy and diagnostics
//!
//! Every fallible operation in the crate reports through [`TclError`].
//! Search strategies never fail a whole pass; they append to a
//! [`Diagnostics`] list instead, and only an empty result is surfaced as
//! [`TclError::NoCandidates`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::version::PatchLevel;

/// Error type for discovery, selection, loading and teardown.
#[derive(Debug, Error)]
pub enum TclError {
    /// Empty, malformed, or otherwise unusable path
    #[error("invalid path \"{}\": {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Well-formed path that does not exist, or a directory without candidates
    #[error("not found: {0}")]
    NotFound(String),

    /// Version outside the requested bounds
    #[error("unsuitable version {version} for \"{}\": {reason}", path.display())]
    UnsuitableVersion {
        path: PathBuf,
        version: PatchLevel,
        reason: String,
    },

    /// ABI width or operating system family mismatch
    #[error("unsuitable architecture: {0}")]
    UnsuitableArchitecture(String),

    /// Attempt to overwrite a live handle
    #[error("already loaded: {0}")]
    AlreadyLoaded(String),

    /// Attempt to delete a handle twice
    #[error("already deleted: {0}")]
    AlreadyDeleted(String),

    /// Session is mid-evaluation and teardown was not forced
    #[error("interpreter is still active: {0}")]
    StillActive(String),

    /// The OS dynamic-load call failed
    #[error(
        "failed to load \"{}\"{}: {message}",
        path.display(),
        code.map(|c| format!(" (error {})", c)).unwrap_or_default()
    )]
    NativeLoadFailure {
        path: PathBuf,
        code: Option<i32>,
        message: String,
    },

    /// A required native entry point was not resolved from the loaded module
    #[error("native entry point unavailable: {0}")]
    AbiUnavailable(String),

    /// The native runtime failed to allocate an internal object
    #[error("native allocation failed: {0}")]
    AllocationFailure(String),

    /// A session-bound call was made from a foreign thread
    #[error("wrong thread for interpreter: {0}")]
    WrongThread(String),

    /// No candidate survived a search or selection pass
    #[error("{0}")]
    NoCandidates(Diagnostics),

    /// Configuration loading failed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O failure while probing the file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tclhost operations.
pub type TclResult<T> = Result<T, TclError>;

/// Ordered, human-readable diagnostic messages collected during a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    messages: Vec<String>,
}

impl Diagnostics {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message
    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Append every message of another list, preserving order
    pub fn extend(&mut self, other: Diagnostics) {
        self.messages.extend(other.messages);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }

    /// Whether any message contains the given fragment
    pub fn contains(&self, fragment: &str) -> bool {
        self.messages.iter().any(|m| m.contains(fragment))
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.messages.is_empty() {
            return write!(f, "no diagnostics available");
        }
        write!(f, "{}", self.messages.join("\n"))
    }
}

impl From<Vec<String>> for Diagnostics {
    fn from(messages: Vec<String>) -> Self {
        Self { messages }
    }
}
