//! Database configuration
//!
//! Settings come from a TOML file, overridden by `XITDB_*` environment
//! variables (`XITDB_PATH`, `XITDB_HASH`, `XITDB_READ_ONLY`,
//! `XITDB_SYNC_ON_COMMIT`). Everything is optional; the defaults describe
//! a writable in-memory database keyed with SHA-1.

use crate::error::{Error, Result};
use crate::hasher::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of the environment variables layered over a config file
pub const ENV_PREFIX: &str = "XITDB";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file; `None` keeps everything in memory
    pub path: Option<PathBuf>,
    pub hash: HashAlgorithm,
    pub read_only: bool,
    /// Sync the backend after each top-level history append
    pub sync_on_commit: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            hash: HashAlgorithm::default(),
            read_only: false,
            sync_on_commit: true,
        }
    }
}

impl DatabaseConfig {
    /// Config for a file-backed database with default settings
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Load settings from `file` (if given) layered with the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            debug!(path = %file.display(), "Loading database config");
            builder = builder.add_source(config::File::from(file).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Parse settings from TOML text, ignoring the environment
    pub fn from_toml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.path, None);
        assert_eq!(config.hash, HashAlgorithm::Sha1);
        assert!(!config.read_only);
        assert!(config.sync_on_commit);
    }

    #[test]
    fn test_from_toml_str() -> Result<()> {
        let config = DatabaseConfig::from_toml_str(
            r#"
            path = "/var/lib/xitdb/main.db"
            hash = "sha256"
            sync_on_commit = false
            "#,
        )?;
        assert_eq!(config.path, Some(PathBuf::from("/var/lib/xitdb/main.db")));
        assert_eq!(config.hash, HashAlgorithm::Sha256);
        assert!(!config.read_only);
        assert!(!config.sync_on_commit);
        Ok(())
    }

    #[test]
    fn test_empty_toml_is_default() -> Result<()> {
        assert_eq!(DatabaseConfig::from_toml_str("  \n")?, DatabaseConfig::default());
        Ok(())
    }

    #[test]
    fn test_unknown_hash_rejected() {
        let err = DatabaseConfig::from_toml_str(r#"hash = "md5""#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_toml_round_trip() -> Result<()> {
        let config = DatabaseConfig {
            read_only: true,
            ..DatabaseConfig::for_file("data.db")
        };
        let text = config.to_toml_string()?;
        assert_eq!(DatabaseConfig::from_toml_str(&text)?, config);
        Ok(())
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "path = \"history.db\"")?;
        writeln!(file, "read_only = true")?;

        let config = DatabaseConfig::load(Some(file.path()))?;
        assert_eq!(config.path, Some(PathBuf::from("history.db")));
        assert!(config.read_only);
        assert!(config.sync_on_commit);
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let err = DatabaseConfig::load(Some(Path::new("/nonexistent/xitdb.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
