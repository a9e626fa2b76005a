//! Runtime configuration for controllers, the page cache and the server.
//!
//! Configuration comes from three layers, later ones winning:
//!
//! 1. [`Config::default`]: production mode, `templates/`, caching on for an hour.
//! 2. A JSON document ([`Config::from_json_str`], [`Config::from_file`]); every
//!    field is optional.
//! 3. Environment overrides applied by [`Config::from_env`]:
//!
//! | Variable                 | Effect                                         |
//! |--------------------------|------------------------------------------------|
//! | `SIMPLECTL_CONFIG`       | path of a JSON file loaded as layer 2          |
//! | `SIMPLECTL_MODE`         | `production` or `development`                  |
//! | `SIMPLECTL_TEMPLATE_DIR` | template root directory                        |

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const ENV_CONFIG: &str = "SIMPLECTL_CONFIG";
pub const ENV_MODE: &str = "SIMPLECTL_MODE";
pub const ENV_TEMPLATE_DIR: &str = "SIMPLECTL_TEMPLATE_DIR";

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown mode {0:?}, expected \"production\" or \"development\"")]
    InvalidMode(String),
}

/// Deployment mode. Decides how failures are reported to the client.
///
/// In [`Mode::Development`] unexpected failures and render errors are written
/// into the response body in full, and page caching is switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Development,
}

impl Mode {
    pub fn is_development(self) -> bool {
        self == Mode::Development
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" | "live" => Ok(Mode::Production),
            "development" | "dev" => Ok(Mode::Development),
            _ => Err(ConfigError::InvalidMode(s.to_owned())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Production => "production",
            Mode::Development => "development",
        })
    }
}

/// Page cache behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Store rendered pages at all.
    pub enabled: bool,
    /// Treat a cached page as stale once its template file changes on disk.
    pub renew_on_template_change: bool,
    /// Lifetime of a cached page, in seconds.
    pub lifetime_secs: u64,
    /// Upper bound on the number of cached pages.
    pub max_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            renew_on_template_change: true,
            lifetime_secs: 3600,
            max_entries: 10_000,
        }
    }
}

impl CacheSettings {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }

    /// Caching as actually applied: development mode never caches.
    pub fn effective(&self, mode: Mode) -> Self {
        Self {
            enabled: self.enabled && !mode.is_development(),
            ..self.clone()
        }
    }
}

/// Top-level configuration.
///
/// ```
/// use simplectl::config::{Config, Mode};
///
/// let config = Config::from_json_str(r#"{ "mode": "development", "cache": { "lifetime_secs": 60 } }"#).unwrap();
/// assert_eq!(config.mode, Mode::Development);
/// assert_eq!(config.cache.lifetime_secs, 60);
/// assert!(config.cache.enabled);
/// assert!(!config.cache.effective(config.mode).enabled);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    /// Root directory all template paths are relative to.
    pub template_dir: PathBuf,
    pub cache: CacheSettings,
    /// Name of the request parameter that selects a service operation.
    pub service_param: String,
    /// Request header sent by fetch-style clients; its presence turns 302 redirects into 204.
    pub fetch_header: String,
    /// Largest request (headers and body) the server will buffer.
    pub max_request_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            template_dir: PathBuf::from("templates"),
            cache: CacheSettings::default(),
            service_param: "service".to_owned(),
            fetch_header: "X-Fetch".to_owned(),
            max_request_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Builds the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(ENV_CONFIG) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(mode) = lookup(ENV_MODE) {
            config.mode = mode.parse()?;
        }
        if let Some(dir) = lookup(ENV_TEMPLATE_DIR) {
            config.template_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }
}
