//! Configuration: TOML file + env var overrides + defaults.
//!
//! Everything here is a front-end convenience; the core components receive
//! their settings as explicit arguments.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{FslError, Result};

/// Default index filename inside the repository directory.
pub const INDEX_FILENAME: &str = "bupindex.sqlite";
/// Default config filename inside the repository directory.
pub const CONFIG_FILENAME: &str = "fsledger.toml";
/// Default journal filename inside the repository directory.
pub const JOURNAL_FILENAME: &str = "fsledger-events.jsonl";
/// Environment override for the repository directory.
pub const REPO_ENV: &str = "FSLEDGER_REPO";
/// Environment override for the config file path.
pub const CONFIG_ENV: &str = "FSLEDGER_CONFIG";

/// Tool configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Repository directory; holds the index, the journal, and is itself
    /// skipped during traversal.
    pub repo_dir: Option<PathBuf>,
    /// Index filename relative to the repository directory.
    pub index_filename: String,
    /// Default for `--xdev` (don't cross filesystem boundaries).
    pub xdev: bool,
    /// Literal paths always excluded (must be absolute).
    pub exclude_paths: Vec<PathBuf>,
    /// Unanchored regex patterns always excluded.
    pub exclude_rx: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo_dir: None,
            index_filename: INDEX_FILENAME.to_string(),
            xdev: false,
            exclude_paths: Vec::new(),
            exclude_rx: Vec::new(),
        }
    }
}

impl Config {
    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| FslError::io(path, source))?;
        Ok(toml::from_str(&raw)?)
    }

    /// Locate and load the effective config.
    ///
    /// Order: `$FSLEDGER_CONFIG`, then `<repo>/fsledger.toml` when a repo
    /// directory is known (argument or `$FSLEDGER_REPO`), then built-in
    /// defaults. A missing file is only an error when it was named
    /// explicitly via `$FSLEDGER_CONFIG`.
    pub fn discover(repo_override: Option<&Path>) -> Result<Self> {
        if let Ok(explicit) = env::var(CONFIG_ENV) {
            return Self::load(Path::new(&explicit));
        }

        let repo = repo_override
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(REPO_ENV).map(PathBuf::from));

        if let Some(repo) = repo {
            let candidate = repo.join(CONFIG_FILENAME);
            let mut config = if candidate.is_file() {
                Self::load(&candidate)?
            } else {
                Self::default()
            };
            config.repo_dir = Some(repo);
            return Ok(config);
        }

        Ok(Self::default())
    }

    /// Path of the index file, honoring an explicit `--indexfile` override.
    pub fn index_file(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        let repo = self.repo_dir.as_ref().ok_or_else(|| FslError::Misuse {
            details: "no repository directory (set --repo, $FSLEDGER_REPO, or repo_dir in config)"
                .to_string(),
        })?;
        Ok(repo.join(&self.index_filename))
    }

    /// Path of the event journal, when a repository directory is known.
    pub fn journal_file(&self) -> Option<PathBuf> {
        self.repo_dir.as_ref().map(|r| r.join(JOURNAL_FILENAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.index_filename, INDEX_FILENAME);
        assert!(!config.xdev);
        assert!(config.repo_dir.is_none());
        assert!(config.exclude_paths.is_empty());
    }

    #[test]
    fn toml_round_trip() {
        let mut config = Config::default();
        config.repo_dir = Some(PathBuf::from("/var/backup"));
        config.xdev = true;
        config.exclude_rx = vec![r"\.tmp$".to_string()];

        let raw = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "xdev = true\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.xdev);
        assert_eq!(config.index_filename, INDEX_FILENAME);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = Config::load(Path::new("/no/such/fsledger.toml")).unwrap_err();
        assert_eq!(err.code(), "FSL-3002");
    }

    #[test]
    fn load_bad_toml_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "= invalid").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.code(), "FSL-1003");
    }

    #[test]
    fn index_file_prefers_explicit_path() {
        let config = Config::default();
        let explicit = PathBuf::from("/elsewhere/index.sqlite");
        assert_eq!(config.index_file(Some(&explicit)).unwrap(), explicit);
    }

    #[test]
    fn index_file_requires_repo_when_not_explicit() {
        let config = Config::default();
        assert_eq!(config.index_file(None).unwrap_err().code(), "FSL-1101");

        let mut with_repo = Config::default();
        with_repo.repo_dir = Some(PathBuf::from("/var/backup"));
        assert_eq!(
            with_repo.index_file(None).unwrap(),
            PathBuf::from("/var/backup").join(INDEX_FILENAME)
        );
    }

    #[test]
    fn discover_uses_repo_config_when_present() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILENAME),
            "xdev = true\nindex_filename = \"custom.sqlite\"\n",
        )
        .unwrap();

        let config = Config::discover(Some(tmp.path())).unwrap();
        assert!(config.xdev);
        assert_eq!(config.index_filename, "custom.sqlite");
        assert_eq!(config.repo_dir.as_deref(), Some(tmp.path()));
    }

    #[test]
    fn discover_without_repo_returns_defaults() {
        // Env vars are process-global; only run the env-free branch here.
        if env::var_os(CONFIG_ENV).is_none() && env::var_os(REPO_ENV).is_none() {
            let config = Config::discover(None).unwrap();
            assert_eq!(config, Config::default());
        }
    }
}
