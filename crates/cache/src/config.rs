//! Cache configuration.
//!
//! Settings for the RAM working set and the persistent page store. A
//! configuration can be built programmatically, read from environment
//! variables, or loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MB: usize = 1024 * 1024;

pub const ENV_RAM_CACHE_MB: &str = "DOCVIEW_RAM_CACHE_MB";
pub const ENV_DISK_CACHE_MB: &str = "DOCVIEW_DISK_CACHE_MB";
pub const ENV_CACHE_DIR: &str = "DOCVIEW_CACHE_DIR";
pub const ENV_PERSISTENT_CACHE: &str = "DOCVIEW_PERSISTENT_CACHE";

/// Configuration for the render cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// RAM cache size limit in bytes
    pub ram_cache_size: usize,
    /// Directory holding the persistent page store
    pub disk_cache_dir: PathBuf,
    /// Byte limit for the persistent store; `None` keeps every page
    pub disk_cache_limit: Option<usize>,
    /// When false, rendered pages only live in RAM
    pub persistent: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ram_cache_size: 128 * MB,
            disk_cache_dir: Self::default_cache_dir(),
            disk_cache_limit: None,
            persistent: true,
        }
    }
}

/// On-disk layout of the configuration file. Missing keys keep their defaults.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    ram_cache_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disk_cache_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disk_cache_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    persistent: Option<bool>,
}

impl CacheConfig {
    /// Sets the RAM cache size in megabytes.
    pub fn with_ram_mb(mut self, mb: usize) -> Self {
        self.ram_cache_size = mb * MB;
        self
    }

    /// Caps the persistent store at `mb` megabytes.
    pub fn with_disk_limit_mb(mut self, mb: usize) -> Self {
        self.disk_cache_limit = Some(mb * MB);
        self
    }

    pub fn with_disk_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.disk_cache_dir = path.as_ref().to_path_buf();
        self
    }

    /// Keep rendered pages in RAM only.
    pub fn without_persistence(mut self) -> Self {
        self.persistent = false;
        self
    }

    /// Returns the default cache directory for the current platform.
    ///
    /// - macOS: ~/Library/Caches/docview/pages
    /// - Linux: ~/.cache/docview/pages
    /// - Windows: %LOCALAPPDATA%\docview\pages
    pub fn default_cache_dir() -> PathBuf {
        match dirs::cache_dir() {
            Some(cache_dir) => cache_dir.join("docview").join("pages"),
            None => PathBuf::from("cache/pages"),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// - `DOCVIEW_RAM_CACHE_MB`: RAM cache size in MB (default: 128)
    /// - `DOCVIEW_DISK_CACHE_MB`: persistent store limit in MB (default: unbounded)
    /// - `DOCVIEW_CACHE_DIR`: persistent store directory
    /// - `DOCVIEW_PERSISTENT_CACHE`: `true`/`false` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var(ENV_RAM_CACHE_MB) {
            config.ram_cache_size = parse_mb(ENV_RAM_CACHE_MB, &val)?;
        }

        if let Ok(val) = std::env::var(ENV_DISK_CACHE_MB) {
            config.disk_cache_limit = Some(parse_mb(ENV_DISK_CACHE_MB, &val)?);
        }

        if let Ok(val) = std::env::var(ENV_CACHE_DIR) {
            config.disk_cache_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(ENV_PERSISTENT_CACHE) {
            config.persistent = parse_bool(ENV_PERSISTENT_CACHE, &val)?;
        }

        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// ```toml
    /// ram_cache_mb = 128
    /// disk_cache_mb = 2048
    /// disk_cache_dir = "/path/to/cache"
    /// persistent = true
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        let mut config = Self::default();

        if let Some(mb) = file.ram_cache_mb {
            config.ram_cache_size = mb * MB;
        }
        if let Some(mb) = file.disk_cache_mb {
            config.disk_cache_limit = Some(mb * MB);
        }
        if let Some(dir) = file.disk_cache_dir {
            config.disk_cache_dir = dir;
        }
        if let Some(persistent) = file.persistent {
            config.persistent = persistent;
        }

        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            ram_cache_mb: Some(self.ram_cache_mb()),
            disk_cache_mb: self.disk_cache_limit.map(|bytes| bytes / MB),
            disk_cache_dir: Some(self.disk_cache_dir.clone()),
            persistent: Some(self.persistent),
        };
        Ok(toml::to_string(&file)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Returns the RAM cache size in megabytes.
    pub fn ram_cache_mb(&self) -> usize {
        self.ram_cache_size / MB
    }
}

fn parse_mb(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map(|mb| mb * MB)
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(key.to_string())),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ALL_VARS: &[&str] =
        &[ENV_RAM_CACHE_MB, ENV_DISK_CACHE_MB, ENV_CACHE_DIR, ENV_PERSISTENT_CACHE];

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.ram_cache_size, 128 * MB);
        assert_eq!(config.disk_cache_limit, None);
        assert!(config.persistent);
        assert!(config.disk_cache_dir.ends_with("pages"));
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::default()
            .with_ram_mb(512)
            .with_disk_limit_mb(2048)
            .with_disk_dir("/custom/path")
            .without_persistence();

        assert_eq!(config.ram_cache_size, 512 * MB);
        assert_eq!(config.disk_cache_limit, Some(2048 * MB));
        assert_eq!(config.disk_cache_dir, PathBuf::from("/custom/path"));
        assert!(!config.persistent);
        assert_eq!(config.ram_cache_mb(), 512);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(ALL_VARS);

        env::set_var(ENV_RAM_CACHE_MB, "64");
        env::set_var(ENV_DISK_CACHE_MB, "512");
        env::set_var(ENV_CACHE_DIR, "/tmp/test-cache");
        env::set_var(ENV_PERSISTENT_CACHE, "false");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.ram_cache_size, 64 * MB);
        assert_eq!(config.disk_cache_limit, Some(512 * MB));
        assert_eq!(config.disk_cache_dir, PathBuf::from("/tmp/test-cache"));
        assert!(!config.persistent);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(ALL_VARS);

        for name in ALL_VARS {
            env::remove_var(name);
        }
        env::set_var(ENV_RAM_CACHE_MB, "32");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.ram_cache_size, 32 * MB);
        assert_eq!(config.disk_cache_limit, None);
        assert!(config.persistent);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(ALL_VARS);

        env::set_var(ENV_RAM_CACHE_MB, "not_a_number");
        assert!(matches!(CacheConfig::from_env(), Err(ConfigError::InvalidValue(_))));

        env::set_var(ENV_RAM_CACHE_MB, "16");
        env::set_var(ENV_PERSISTENT_CACHE, "sometimes");
        let err = CacheConfig::from_env().unwrap_err();
        assert_eq!(err.to_string(), format!("Invalid value for configuration key: {ENV_PERSISTENT_CACHE}"));
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = CacheConfig::default()
            .with_ram_mb(64)
            .with_disk_limit_mb(256)
            .with_disk_dir("/tmp/cache");
        let parsed = CacheConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
            # only the RAM budget
            ram_cache_mb = 96
        "#;

        let config = CacheConfig::from_toml(toml).unwrap();
        assert_eq!(config.ram_cache_size, 96 * MB);
        assert_eq!(config.disk_cache_limit, None);
        assert!(config.persistent);
    }

    #[test]
    fn test_from_toml_rejects_wrong_types() {
        let err = CacheConfig::from_toml("ram_cache_mb = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_file_save_and_load() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let config_path = temp.path().join("cache.toml");

        let config = CacheConfig::default().with_disk_dir(temp.path().join("pages")).without_persistence();
        config.save_to_file(&config_path).unwrap();

        let loaded = CacheConfig::from_file(&config_path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let err = CacheConfig::from_file(temp.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
