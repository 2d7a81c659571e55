//! Layered configuration for scenemap.
//!
//! Values are merged in order, later sources winning:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. An optional configuration file. The format is chosen from the file
//!    extension (`.yaml`/`.yml`, `.json`, anything else is TOML).
//! 3. Environment variables prefixed with `SCENEMAP_`, nested keys separated
//!    by a double underscore (`SCENEMAP_REFRESH__MAX_AGE=3600`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SCENEMAP_";
const DEFAULT_PRIMARY_ENDPOINT: &str = "https://thexem.de/map/all";
const DEFAULT_MIRROR_ENDPOINT: &str = "http://show-api.tvtumbler.com/api/thexem/all";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// One day.
const DEFAULT_MAX_AGE_SECS: u64 = 86_400;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub refresh: RefreshConfig,
}

/// Locations of the two SQLite stores.
///
/// User overrides live in the primary store and are precious. Everything in
/// the cache store can be thrown away and re-fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub primary: PathBuf,
    pub cache: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Endpoint queried first for a show's mapping.
    pub primary: String,
    /// Endpoint queried when the primary has nothing (or fails).
    pub mirror: String,
    /// Per-request timeout, in seconds.
    pub timeout: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds after which a show's cached remote mapping is stale.
    pub max_age: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let dir = ProjectDirs::from("", "", "scenemap")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_default();
        Self {
            primary: dir.join("scenemap.db"),
            cache: dir.join("cache.db"),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            primary: DEFAULT_PRIMARY_ENDPOINT.to_string(),
            mirror: DEFAULT_MIRROR_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT_SECS,
            user_agent: concat!("scenemap/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { max_age: DEFAULT_MAX_AGE_SECS }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl RefreshConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age)
    }
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// The result is validated before being returned.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            tracing::debug!(path = %path.display(), "Loading configuration file");
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would load fine but can never work.
    pub fn validate(&self) -> Result<()> {
        for (key, endpoint) in [("remote.primary", &self.remote.primary), ("remote.mirror", &self.remote.mirror)] {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                exn::bail!(ErrorKind::Invalid(key, format!("not an HTTP(S) URL: {endpoint:?}")));
            }
        }
        if self.remote.timeout == 0 {
            exn::bail!(ErrorKind::Invalid("remote.timeout", "must be at least one second".to_string()));
        }
        if self.refresh.max_age == 0 {
            exn::bail!(ErrorKind::Invalid("refresh.max_age", "must be at least one second".to_string()));
        }
        if self.database.primary == self.database.cache {
            exn::bail!(ErrorKind::Invalid(
                "database.cache",
                "must not be the same file as database.primary".to_string()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.refresh.max_age(), Duration::from_secs(86_400));
        assert_eq!(config.remote.primary, "https://thexem.de/map/all");
    }

    #[rstest]
    #[case(".toml", "[refresh]\nmax_age = 3600\n")]
    #[case(".yaml", "refresh:\n  max_age: 3600\n")]
    #[case(".json", r#"{"refresh": {"max_age": 3600}}"#)]
    fn test_load_file_formats(#[case] suffix: &str, #[case] contents: &str) {
        let file = write_config(suffix, contents);
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.refresh.max_age, 3600);
        // Untouched sections keep their defaults.
        assert_eq!(config.remote, RemoteConfig::default());
    }

    #[test]
    fn test_load_without_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.remote.timeout(), Duration::from_secs(30));
    }

    #[rstest]
    #[case("[remote]\nprimary = \"ftp://example.com\"\n", "remote.primary")]
    #[case("[remote]\nmirror = \"\"\n", "remote.mirror")]
    #[case("[remote]\ntimeout = 0\n", "remote.timeout")]
    #[case("[refresh]\nmax_age = 0\n", "refresh.max_age")]
    #[case("[database]\nprimary = \"same.db\"\ncache = \"same.db\"\n", "database.cache")]
    fn test_invalid_values_are_rejected(#[case] contents: &str, #[case] key: &str) {
        let file = write_config(".toml", contents);
        let err = Config::load(Some(file.path())).unwrap_err();
        match &*err {
            ErrorKind::Invalid(k, _) => assert_eq!(*k, key),
            other => panic!("unexpected error kind: {other}"),
        }
    }

    #[test]
    fn test_malformed_file_fails_to_load() {
        let file = write_config(".toml", "[refresh]\nmax_age = \"soon\"\n");
        let err = Config::load(Some(file.path())).unwrap_err();
        assert_eq!(*err, ErrorKind::Load);
    }
}
