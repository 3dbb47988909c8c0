//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every endpoint path is joined onto.
    pub api_base_url: String,
    /// Per-request timeout enforced by the transport.
    pub request_timeout: Duration,
    /// TTL for position-sensitive spot queries.
    pub spots_ttl: Duration,
    /// TTL for stable catalog-style reads.
    pub catalog_ttl: Duration,
    /// TTL for the signed-in user's travel profile.
    pub profile_ttl: Duration,
    /// File backing persisted device storage.
    pub storage_path: PathBuf,
    /// Serve a locally stored profile when the backend has none.
    pub dev_profile_fallback: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            request_timeout: Duration::from_secs(30),
            spots_ttl: Duration::from_secs(120), // 2 minutes
            catalog_ttl: Duration::from_secs(600), // 10 minutes
            profile_ttl: Duration::from_secs(300), // 5 minutes
            storage_path: PathBuf::from("./data/device-storage.json"),
            dev_profile_fallback: false,
        }
    }
}

impl ClientConfig {
    /// Build a configuration from `WAYPOINT_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("WAYPOINT_API_URL") {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "WAYPOINT_API_URL".to_string(),
                    message: "must not be empty".to_string(),
                });
            }
            config.api_base_url = url;
        }
        if let Some(secs) = parse_secs(&lookup, "WAYPOINT_TIMEOUT_SECS")? {
            config.request_timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "WAYPOINT_SPOTS_TTL_SECS")? {
            config.spots_ttl = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "WAYPOINT_CATALOG_TTL_SECS")? {
            config.catalog_ttl = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "WAYPOINT_PROFILE_TTL_SECS")? {
            config.profile_ttl = secs;
        }
        if let Some(path) = lookup("WAYPOINT_STORAGE_PATH") {
            config.storage_path = PathBuf::from(path);
        }
        if let Some(flag) = lookup("WAYPOINT_DEV_PROFILE_FALLBACK") {
            config.dev_profile_fallback = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "WAYPOINT_DEV_PROFILE_FALLBACK".to_string(),
                        message: format!("expected a boolean, got {other:?}"),
                    });
                }
            };
        }

        Ok(config)
    }
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
