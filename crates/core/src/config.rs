//! Configuration management
//!
//! Loads `config.toml` from the rcopy configuration directory. The directory
//! defaults to `~/.config/rcopy` and can be overridden with `RCOPY_CONFIG_DIR`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "RCOPY_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Named S3-compatible endpoints
    #[serde(default)]
    pub aliases: Vec<Alias>,
}

impl Config {
    /// Look up an alias by name
    pub fn alias(&self, name: &str) -> Option<&Alias> {
        self.aliases.iter().find(|a| a.name == name)
    }
}

/// Defaults applied when a command line flag is not given
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Defaults {
    /// Concurrent transfers; 0 picks one less than the number of CPUs
    #[serde(default)]
    pub parallel: usize,
}

/// Retry policy for transient backend request failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

/// Connection details for an S3-compatible endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alias {
    pub name: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket addressing: auto, path or dns
    #[serde(default = "default_bucket_lookup")]
    pub bucket_lookup: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket_lookup() -> String {
    "auto".to_string()
}

/// Locates and reads the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    dir: PathBuf,
}

impl ConfigManager {
    /// Use the default configuration directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: default_config_dir()?,
        })
    }

    /// Use an explicit configuration directory
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding resumable session files
    pub fn session_dir(&self) -> PathBuf {
        self.dir.join("session")
    }

    /// Load the configuration, returning defaults when no file exists
    pub fn load(&self) -> Result<Config> {
        let path = self.dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }

    dirs::config_dir()
        .map(|d| d.join("rcopy"))
        .ok_or_else(|| Error::Config("cannot determine configuration directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_dir(dir.path());
        let config = manager.load().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_parse_aliases() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
[defaults]
parallel = 8

[[aliases]]
name = "minio"
endpoint = "http://localhost:9000"
access_key = "ak"
secret_key = "sk"
"#,
        )
        .unwrap();

        let config = ConfigManager::with_dir(dir.path()).load().unwrap();
        assert_eq!(config.defaults.parallel, 8);
        let alias = config.alias("minio").unwrap();
        assert_eq!(alias.region, "us-east-1");
        assert_eq!(alias.bucket_lookup, "auto");
        assert!(config.alias("s3").is_none());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "aliases = 3").unwrap();
        let err = ConfigManager::with_dir(dir.path()).load().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_session_dir_under_config_dir() {
        let manager = ConfigManager::with_dir("/tmp/rcopy-config");
        assert_eq!(manager.dir(), Path::new("/tmp/rcopy-config"));
        assert_eq!(
            manager.session_dir(),
            PathBuf::from("/tmp/rcopy-config/session")
        );
    }
}
