//! Exclusion decisions: a set of normalized literal paths plus an ordered
//! list of unanchored regexes matched against the raw path bytes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::bytes::Regex;

use crate::core::errors::{FslError, Result};
use crate::core::paths::normalize_path;

/// Decides whether a candidate path is excluded from traversal.
///
/// Literal matching is on the normalized path; regex matching is an
/// unanchored search over the path's raw bytes, so patterns work on paths
/// that are not valid UTF-8.
#[derive(Debug, Default)]
pub struct ExcludeMatcher {
    literals: HashSet<PathBuf>,
    patterns: Vec<Regex>,
}

impl ExcludeMatcher {
    /// Build a matcher from literal paths and regex pattern strings.
    ///
    /// Literal paths must be absolute; regex patterns must compile. Either
    /// violation is a usage error.
    pub fn new<P, S>(literals: P, patterns: S) -> Result<Self>
    where
        P: IntoIterator<Item = PathBuf>,
        S: IntoIterator<Item = String>,
    {
        let mut normalized = HashSet::new();
        for literal in literals {
            if !literal.is_absolute() {
                return Err(FslError::Misuse {
                    details: format!("exclude path must be absolute: {}", literal.display()),
                });
            }
            normalized.insert(normalize_path(&literal));
        }

        let mut compiled = Vec::new();
        for pattern in patterns {
            let regex = Regex::new(&pattern).map_err(|err| FslError::Misuse {
                details: format!("invalid exclude pattern {pattern:?}: {err}"),
            })?;
            compiled.push(regex);
        }

        Ok(Self {
            literals: normalized,
            patterns: compiled,
        })
    }

    /// An empty matcher that excludes nothing.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// True when neither literals nor patterns are configured.
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.patterns.is_empty()
    }

    /// True iff `path` is excluded by the literal set or any pattern.
    #[must_use]
    pub fn excludes(&self, path: &Path) -> bool {
        if !self.literals.is_empty() && self.literals.contains(&normalize_path(path)) {
            return true;
        }
        if self.patterns.is_empty() {
            return false;
        }
        let haystack = path_bytes(path);
        self.patterns.iter().any(|rx| rx.is_match(&haystack))
    }
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}
