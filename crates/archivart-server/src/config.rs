//! Server configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables:
//!
//! | variable                    | field                        |
//! |-----------------------------|------------------------------|
//! | `ARCHIVART_BIND`            | `bind`                       |
//! | `ARCHIVART_DATABASE`        | `database_path`              |
//! | `ARCHIVART_SIGNING_KEY`     | `auth.signing_key`           |
//! | `ARCHIVART_MATCHING_URL`    | `matching.base_url`          |
//! | `ARCHIVART_LOG_JSON`        | `log_json`                   |
//! | `ARCHIVART_TRUSTED_PROXIES` | `rate_limit.trusted_proxies` |
//!
//! Trusted proxies are a comma-separated list of IP addresses.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment variable holds an unusable value
    #[error("invalid value for {key}: {value}")]
    Env {
        /// Variable name
        key: &'static str,
        /// Offending value
        value: String,
    },
}

/// Token lifetimes and signing key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Access token lifetime in seconds
    pub access_ttl_secs: u64,
    /// Refresh token lifetime in seconds
    pub refresh_ttl_secs: u64,
    /// Hex-encoded 32-byte ed25519 seed; a random key is generated when absent
    pub signing_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: 60 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            signing_key: None,
        }
    }
}

impl AuthConfig {
    /// Access token lifetime
    #[inline]
    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_secs)
    }

    /// Refresh token lifetime
    #[inline]
    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_secs)
    }
}

/// Limits for the public auth routes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per client and window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_secs: u64,
    /// Reverse proxies allowed to name the client in `x-forwarded-for`
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_secs: 15 * 60,
            trusted_proxies: Vec::new(),
        }
    }
}

/// External feature-matching service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Service root, e.g. `http://localhost:5001`
    pub base_url: String,
    /// Health probe timeout in milliseconds
    pub health_timeout_ms: u64,
    /// Compare call timeout in milliseconds
    pub compare_timeout_ms: u64,
    /// Threshold percentage used when the request names none
    pub default_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".to_string(),
            health_timeout_ms: 2_000,
            compare_timeout_ms: 30_000,
            default_threshold: 20.0,
        }
    }
}

/// Resolved-permission cache sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionCacheConfig {
    /// Maximum cached principals
    pub capacity: u64,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 300,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Prefix for relative media paths in public responses
    pub public_base_url: String,
    /// Emit JSON log lines
    pub log_json: bool,
    /// Tokens
    pub auth: AuthConfig,
    /// Auth route limits
    pub rate_limit: RateLimitConfig,
    /// Matching service
    pub matching: MatchingConfig,
    /// Permission cache
    pub permission_cache: PermissionCacheConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_path: PathBuf::from("archivart.db"),
            public_base_url: "http://localhost:3000".to_string(),
            log_json: false,
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            matching: MatchingConfig::default(),
            permission_cache: PermissionCacheConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With listen address
    #[inline]
    #[must_use]
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// With database file
    #[inline]
    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// With matching service root
    #[inline]
    #[must_use]
    pub fn with_matching_url(mut self, url: impl Into<String>) -> Self {
        self.matching.base_url = url.into();
        self
    }

    /// With auth route limits
    #[inline]
    #[must_use]
    pub fn with_rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.rate_limit.max_requests = max_requests;
        self.rate_limit.window_secs = window.as_secs();
        self
    }

    /// With reverse proxies whose forwarded header is honored
    #[inline]
    #[must_use]
    pub fn with_trusted_proxies(mut self, proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        self.rate_limit.trusted_proxies = proxies.into_iter().collect();
        self
    }

    /// With hex-encoded signing key seed
    #[inline]
    #[must_use]
    pub fn with_signing_key(mut self, hex_seed: impl Into<String>) -> Self {
        self.auth.signing_key = Some(hex_seed.into());
        self
    }

    /// Parse a TOML document
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] on malformed input
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from an optional file, then apply process environment overrides
    ///
    /// # Errors
    /// Returns error if the file is unreadable or a value does not parse
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup
    ///
    /// # Errors
    /// Returns [`ConfigError::Env`] for values that do not parse
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("ARCHIVART_BIND") {
            self.bind = value.parse().map_err(|_| ConfigError::Env {
                key: "ARCHIVART_BIND",
                value,
            })?;
        }
        if let Some(value) = lookup("ARCHIVART_DATABASE") {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("ARCHIVART_SIGNING_KEY") {
            self.auth.signing_key = Some(value);
        }
        if let Some(value) = lookup("ARCHIVART_MATCHING_URL") {
            self.matching.base_url = value;
        }
        if let Some(value) = lookup("ARCHIVART_TRUSTED_PROXIES") {
            self.rate_limit.trusted_proxies = value
                .split(',')
                .map(str::trim)
                .filter(|hop| !hop.is_empty())
                .map(str::parse::<IpAddr>)
                .collect::<Result<_, _>>()
                .map_err(|_| ConfigError::Env {
                    key: "ARCHIVART_TRUSTED_PROXIES",
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup("ARCHIVART_LOG_JSON") {
            self.log_json = match value.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => {
                    return Err(ConfigError::Env {
                        key: "ARCHIVART_LOG_JSON",
                        value,
                    })
                }
            };
        }
        Ok(self)
    }
}
