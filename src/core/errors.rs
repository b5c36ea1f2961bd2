//! FSL-prefixed error types with structured error codes, plus the
//! process-wide recorded-error ledger.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, FslError>;

/// Top-level error type for fsledger.
#[derive(Debug, Error)]
pub enum FslError {
    #[error("[FSL-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[FSL-1101] invalid usage: {details}")]
    Misuse { details: String },

    #[error("[FSL-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[FSL-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[FSL-2201] index file {path} has unexpected shape: {details}")]
    CorruptIndex { path: PathBuf, details: String },

    #[error("[FSL-2202] no index at {path}")]
    MissingIndex { path: PathBuf },

    #[error("[FSL-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FSL-3101] interrupted")]
    Interrupted,

    #[error("[FSL-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl FslError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigParse { .. } => "FSL-1003",
            Self::Misuse { .. } => "FSL-1101",
            Self::Serialization { .. } => "FSL-2101",
            Self::Sql { .. } => "FSL-2102",
            Self::CorruptIndex { .. } => "FSL-2201",
            Self::MissingIndex { .. } => "FSL-2202",
            Self::Io { .. } => "FSL-3002",
            Self::Interrupted => "FSL-3101",
            Self::Runtime { .. } => "FSL-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for raw-errno failures from syscall wrappers.
    #[cfg(unix)]
    #[must_use]
    pub fn os(path: impl AsRef<Path>, errno: nix::errno::Errno) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source: std::io::Error::from_raw_os_error(errno as i32),
        }
    }
}

impl From<rusqlite::Error> for FslError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for FslError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for FslError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

/// Process-wide ledger of transient errors that were skipped rather than
/// propagated (vanished entries, unreadable subtrees, unusable roots).
///
/// A nonzero ledger at exit turns into exit code 1 with a warning line.
/// Shared across walker, merger, and CLI via `Arc`.
#[derive(Debug, Default)]
pub struct ErrorLedger {
    entries: Mutex<Vec<String>>,
}

impl ErrorLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one skipped error.
    pub fn record(&self, message: impl Into<String>) {
        self.entries.lock().push(message.into());
    }

    /// Number of recorded errors so far.
    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Snapshot of the recorded messages, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}
