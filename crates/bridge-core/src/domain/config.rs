//! Session configuration with validation.
//!
//! Consumed once at engine construction. Loadable from TOML, with
//! environment overrides for deployment.
//!
//! # Config File Format
//!
//! ```toml
//! target_origin = "https://host.example.com"
//! allowed_origins = ["https://host.example.com", "https://staging.example.com"]
//! handshake_timeout_ms = 5000
//! request_timeout_ms = 30000
//! ```

use bridge_types::ANY_ORIGIN;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors from configuration loading and validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("No trusted origin: set target_origin or allowed_origins")]
    NoTrustedOrigin,

    #[error("Invalid allowed origin {0:?}")]
    InvalidOrigin(String),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },
}

/// Configuration for one bridge session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Target-origin hint for outbound posts until the peer is pinned.
    pub target_origin: String,
    /// Deadline for the whole handshake, per side.
    pub handshake_timeout_ms: u64,
    /// Default request deadline when the caller gives none.
    pub request_timeout_ms: u64,
    /// Origins trusted before the handshake pins one peer.
    pub allowed_origins: Vec<String>,
    /// Allowed backwards drift of handshake envelope timestamps.
    pub max_handshake_skew_ms: u64,
    /// How long peer envelope ids are remembered for duplicate detection.
    pub seen_id_window_ms: u64,
    /// Upper bound of remembered peer envelope ids.
    pub seen_id_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            target_origin: ANY_ORIGIN.to_string(),
            handshake_timeout_ms: Self::DEFAULT_HANDSHAKE_TIMEOUT_MS,
            request_timeout_ms: Self::DEFAULT_REQUEST_TIMEOUT_MS,
            allowed_origins: Vec::new(),
            max_handshake_skew_ms: Self::DEFAULT_HANDSHAKE_SKEW_MS,
            seen_id_window_ms: Self::DEFAULT_SEEN_ID_WINDOW_MS,
            seen_id_capacity: Self::DEFAULT_SEEN_ID_CAPACITY,
        }
    }
}

impl BridgeConfig {
    pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_HANDSHAKE_SKEW_MS: u64 = 1_000;
    pub const DEFAULT_SEEN_ID_WINDOW_MS: u64 = 120_000;
    pub const DEFAULT_SEEN_ID_CAPACITY: usize = 10_000;

    /// Config that posts to and trusts exactly `origin`.
    pub fn for_peer(origin: impl Into<String>) -> Self {
        let origin = origin.into();
        Self {
            target_origin: origin.clone(),
            allowed_origins: vec![origin],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = duration_ms(timeout);
        self
    }

    /// Origins trusted before the handshake: allow-list plus a concrete target.
    #[must_use]
    pub fn trusted_origins(&self) -> BTreeSet<String> {
        let mut trusted: BTreeSet<String> = self.allowed_origins.iter().cloned().collect();
        if self.target_origin != ANY_ORIGIN && !self.target_origin.is_empty() {
            trusted.insert(self.target_origin.clone());
        }
        trusted
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidOrigin` - wildcard or empty allow-list entry
    /// - `ConfigError::NoTrustedOrigin` - nothing would ever be accepted
    /// - `ConfigError::InvalidTimeout` - a zero timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bad) = self
            .allowed_origins
            .iter()
            .find(|o| o.trim().is_empty() || o.as_str() == ANY_ORIGIN)
        {
            return Err(ConfigError::InvalidOrigin(bad.clone()));
        }

        if self.trusted_origins().is_empty() {
            return Err(ConfigError::NoTrustedOrigin);
        }

        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "handshake_timeout_ms cannot be 0".into(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "request_timeout_ms cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Parse configuration from a TOML string. Unset fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on invalid TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::from_toml_str(&content)
    }

    /// Apply environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `BRIDGE_TARGET_ORIGIN`: target origin hint
    /// - `BRIDGE_ALLOWED_ORIGINS`: comma-separated allow-list (replaces the file's)
    /// - `BRIDGE_HANDSHAKE_TIMEOUT_MS`: handshake timeout
    /// - `BRIDGE_REQUEST_TIMEOUT_MS`: default request timeout
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnv` when a numeric variable does not parse.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| env::var(var).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(origin) = lookup("BRIDGE_TARGET_ORIGIN") {
            self.target_origin = origin.trim().to_string();
        }

        if let Some(list) = lookup("BRIDGE_ALLOWED_ORIGINS") {
            self.allowed_origins = list
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(ms) = parse_env_u64(&lookup, "BRIDGE_HANDSHAKE_TIMEOUT_MS")? {
            self.handshake_timeout_ms = ms;
        }

        if let Some(ms) = parse_env_u64(&lookup, "BRIDGE_REQUEST_TIMEOUT_MS")? {
            self.request_timeout_ms = ms;
        }

        Ok(self)
    }
}

fn parse_env_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<u64>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
        })
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
