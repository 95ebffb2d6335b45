//! Client configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::path::PathBuf;
use std::time::Duration;

/// Base URL baked in at build time, falling back to a local dev server.
pub const DEFAULT_API_URL: &str = match option_env!("HOUSEHOLD_API_URL") {
    Some(url) => url,
    None => "http://127.0.0.1:3000",
};

pub const STORAGE_DIR_NAME: &str = ".household";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid API base URL: {0}")]
    InvalidUrl(String),
    #[error("invalid value for {key}: {value}")]
    InvalidNumber { key: &'static str, value: String },
}

/// Optional transport timeouts. `None` leaves the reqwest default in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub request: Option<Duration>,
    pub connect: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Remote API origin without a trailing slash (e.g. `"https://api.example.com"`).
    pub base_url: String,
    /// Directory backing [`crate::storage::FileStorage`].
    pub storage_dir: PathBuf,
    pub timeouts: Timeouts,
}

impl ClientConfig {
    /// Build config from process environment variables.
    ///
    /// Optional:
    /// - `HOUSEHOLD_API_URL`: defaults to [`DEFAULT_API_URL`]
    /// - `HOUSEHOLD_STORAGE_DIR`: defaults to `$HOME/.household`
    /// - `HOUSEHOLD_REQUEST_TIMEOUT_SECS`: unset means no override
    /// - `HOUSEHOLD_CONNECT_TIMEOUT_SECS`: unset means no override
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URL is not http(s) or a timeout is not
    /// a whole number of seconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ClientConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = normalize_base_url(
            lookup("HOUSEHOLD_API_URL")
                .filter(|v| !v.trim().is_empty())
                .as_deref()
                .unwrap_or(DEFAULT_API_URL),
        )?;

        let storage_dir = lookup("HOUSEHOLD_STORAGE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| default_storage_dir(lookup("HOME")), PathBuf::from);

        let timeouts = Timeouts {
            request: parse_secs("HOUSEHOLD_REQUEST_TIMEOUT_SECS", lookup("HOUSEHOLD_REQUEST_TIMEOUT_SECS"))?,
            connect: parse_secs("HOUSEHOLD_CONNECT_TIMEOUT_SECS", lookup("HOUSEHOLD_CONNECT_TIMEOUT_SECS"))?,
        };

        Ok(Self { base_url, storage_dir, timeouts })
    }

    /// Replace the base URL, applying the same validation as `from_env`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if `raw` is not an http(s) URL with a host.
    pub fn with_base_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.base_url = normalize_base_url(raw)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }
}

pub(crate) fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let host = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"));
    match host {
        Some(rest) if !rest.is_empty() => Ok(trimmed.to_owned()),
        _ => Err(ConfigError::InvalidUrl(raw.to_owned())),
    }
}

fn default_storage_dir(home: Option<String>) -> PathBuf {
    match home.filter(|h| !h.is_empty()) {
        Some(home) => PathBuf::from(home).join(STORAGE_DIR_NAME),
        None => PathBuf::from(STORAGE_DIR_NAME),
    }
}

fn parse_secs(key: &'static str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = raw.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|_| ConfigError::InvalidNumber { key, value: raw })
}
