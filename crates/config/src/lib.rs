//! Layered configuration for the object cache.
//!
//! Values are resolved in order, later layers overriding earlier ones:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. A configuration file, `~/.dataone/cache.conf` unless another path is
//!    given. The file is YAML unless its extension says `.toml` or `.json`.
//!    A missing file is not an error.
//! 3. Environment variables prefixed with `OCACHE_`, with `__` separating
//!    nested keys (`OCACHE_SYNC__WORKERS=8`).
//!
//! ```yaml
//! cache:
//!   path: /var/lib/dataone
//! environment:
//!   base_url: https://cn-stage.test.dataone.org/cn
//! sync:
//!   workers: 8
//!   load_content: true
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::BaseDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory, under the user's home, holding the index, the content tree and
/// the configuration file.
pub const HOME_DIRECTORY: &str = ".dataone";
pub const CONFIG_FILE: &str = "cache.conf";
pub const ENV_PREFIX: &str = "OCACHE_";
/// Name of the content tree directory under the cache path.
pub const CONTENT_DIRECTORY: &str = "content";

fn home_directory() -> PathBuf {
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(HOME_DIRECTORY),
        None => PathBuf::from(HOME_DIRECTORY),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root of the local replica.
    pub path: PathBuf,
    /// Index file name, relative to `path`.
    pub database: String,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self { path: home_directory(), database: "cache.sqdb".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub name: String,
    /// Base URL of the coordinating node's REST API.
    #[serde(alias = "baseurl")]
    pub base_url: String,
}
impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self { name: "production".to_string(), base_url: "https://cn.dataone.org/cn".to_string() }
    }
}

/// Where gauges are sent. A host of `null` disables sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsdConfig {
    pub host: String,
    pub port: u16,
    /// Prepended to every gauge name.
    #[serde(alias = "instrument")]
    pub prefix: String,
}
impl Default for StatsdConfig {
    fn default() -> Self {
        Self { host: "statsd.dataone.org".to_string(), port: 8125, prefix: "d1cache".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Concurrent fetch workers per pool.
    pub workers: usize,
    /// Objects requested per catalog page.
    pub page_size: u32,
    /// Identifiers buffered between the producer and the workers.
    pub queue_capacity: usize,
    /// Also fetch object content, not only descriptors.
    pub load_content: bool,
    /// Format types whose content is fetched when `load_content` is set.
    pub content_format_types: Vec<String>,
}
impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            page_size: 1000,
            queue_capacity: 1000,
            load_content: false,
            content_format_types: vec!["METADATA".to_string(), "RESOURCE".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "sysmcache")]
    pub cache: CacheConfig,
    pub environment: EnvironmentConfig,
    pub statsd: StatsdConfig,
    pub sync: SyncConfig,
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_file() -> PathBuf {
        home_directory().join(CONFIG_FILE)
    }

    /// Load from the default file and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_file())
    }

    /// Load from `file` and the environment.
    #[tracing::instrument(level = "debug")]
    pub fn load_from(file: &Path) -> Result<Self> {
        Self::from_figment(Self::figment(file))
    }

    /// Every layer, ready to be extracted or extended.
    pub fn figment(file: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if file.exists() {
            tracing::debug!(file = %file.display(), "Reading configuration file");
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file(file)),
                Some("json") => figment.merge(Json::file(file)),
                _ => figment.merge(Yaml::file(file)),
            };
        } else {
            tracing::debug!(file = %file.display(), "No configuration file, using defaults");
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.workers == 0 {
            exn::bail!(ErrorKind::Invalid("sync.workers must be at least 1"));
        }
        if self.sync.page_size == 0 {
            exn::bail!(ErrorKind::Invalid("sync.page_size must be at least 1"));
        }
        if self.sync.queue_capacity == 0 {
            exn::bail!(ErrorKind::Invalid("sync.queue_capacity must be at least 1"));
        }
        if self.cache.database.is_empty() {
            exn::bail!(ErrorKind::Invalid("cache.database must not be empty"));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.cache.path.join(&self.cache.database)
    }

    pub fn content_path(&self) -> PathBuf {
        self.cache.path.join(CONTENT_DIRECTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn layered(yaml: &str) -> Result<Config> {
        Config::from_figment(Figment::from(Serialized::defaults(Config::default())).merge(Yaml::string(yaml)))
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cache.database, "cache.sqdb");
        assert!(config.cache.path.ends_with(".dataone"));
        assert_eq!(config.environment.base_url, "https://cn.dataone.org/cn");
        assert_eq!(config.statsd.host, "statsd.dataone.org");
        assert_eq!(config.statsd.port, 8125);
        assert_eq!(config.statsd.prefix, "d1cache");
        assert_eq!(config.sync.workers, 5);
        assert_eq!(config.sync.page_size, 1000);
        assert!(!config.sync.load_content);
        assert_eq!(config.sync.content_format_types, vec!["METADATA", "RESOURCE"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = layered("sync:\n  workers: 12\n").unwrap();
        assert_eq!(config.sync.workers, 12);
        assert_eq!(config.sync.page_size, 1000);
        assert_eq!(config.statsd, StatsdConfig::default());
    }

    #[test]
    fn test_legacy_keys() {
        let config = layered("sysmcache:\n  path: /srv/cache\n  database: legacy.sqdb\nenvironment:\n  baseurl: https://cn.example.org/cn\n").unwrap();
        assert_eq!(config.cache.path, PathBuf::from("/srv/cache"));
        assert_eq!(config.database_path(), PathBuf::from("/srv/cache/legacy.sqdb"));
        assert_eq!(config.content_path(), PathBuf::from("/srv/cache/content"));
        assert_eq!(config.environment.base_url, "https://cn.example.org/cn");
    }

    #[rstest]
    #[case::workers("sync:\n  workers: 0\n")]
    #[case::page_size("sync:\n  page_size: 0\n")]
    #[case::queue("sync:\n  queue_capacity: 0\n")]
    #[case::database("cache:\n  database: ''\n")]
    fn test_rejects_invalid(#[case] yaml: &str) {
        let err = layered(yaml).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_wrong_type() {
        let err = layered("sync:\n  workers: many\n").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let figment = Config::figment(&dir.path().join("absent.conf"));
        // Only the defaults and the environment contribute.
        let config: Config = figment.extract().unwrap();
        assert_eq!(config.cache.database, "cache.sqdb");
    }

    #[test]
    fn test_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file("cache.conf", "sync:\n  workers: 3\n  page_size: 50\nstatsd:\n  host: 'null'\n")?;
            jail.set_env("OCACHE_SYNC__WORKERS", "8");
            jail.set_env("OCACHE_ENVIRONMENT__BASE_URL", "https://cn-stage.example.org/cn");
            let config = Config::load_from(Path::new("cache.conf")).map_err(|err| err.to_string())?;
            assert_eq!(config.sync.workers, 8);
            assert_eq!(config.sync.page_size, 50);
            assert_eq!(config.statsd.host, "null");
            assert_eq!(config.environment.base_url, "https://cn-stage.example.org/cn");
            Ok(())
        });
    }

    #[test]
    fn test_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file("cache.toml", "[sync]\nload_content = true\ncontent_format_types = [\"DATA\"]\n")?;
            let config = Config::load_from(Path::new("cache.toml")).map_err(|err| err.to_string())?;
            assert!(config.sync.load_content);
            assert_eq!(config.sync.content_format_types, vec!["DATA"]);
            Ok(())
        });
    }
}
