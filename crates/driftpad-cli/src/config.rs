//! CLI configuration.
//!
//! Remote sync settings come from a JSON config file with environment
//! overrides. Only public endpoint values belong here; there is no secret
//! material beyond the API key the user chose to store.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Remote sync configuration for the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

impl CliConfig {
    /// Whether enough is configured to talk to a remote store.
    #[must_use]
    pub fn is_remote_configured(&self) -> bool {
        normalized(self.remote_url.as_deref()).is_some()
            && normalized(self.owner_id.as_deref()).is_some()
    }

    /// Load from an optional config file, then apply environment overrides
    /// (`DRIFTPAD_REMOTE_URL`, `DRIFTPAD_API_KEY`, `DRIFTPAD_OWNER_ID`,
    /// `DRIFTPAD_POLL_INTERVAL_SECS`).
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let payload = std::fs::read_to_string(path)
                    .map_err(|error| format!("failed to read config {}: {error}", path.display()))?;
                parse_config(&payload)?
            }
            _ => Self::default(),
        };

        if let Ok(url) = env::var("DRIFTPAD_REMOTE_URL") {
            config.remote_url = normalized(Some(&url));
        }
        if let Ok(key) = env::var("DRIFTPAD_API_KEY") {
            config.api_key = normalized(Some(&key));
        }
        if let Ok(owner) = env::var("DRIFTPAD_OWNER_ID") {
            config.owner_id = normalized(Some(&owner));
        }
        if let Ok(interval) = env::var("DRIFTPAD_POLL_INTERVAL_SECS") {
            config.poll_interval_secs = interval.trim().parse().ok();
        }

        Ok(config)
    }
}

/// Parse a config file payload.
///
/// Public for testability — callers can exercise parsing without touching the
/// filesystem.
pub fn parse_config(payload: &str) -> Result<CliConfig, String> {
    serde_json::from_str(payload).map_err(|error| format!("invalid config JSON: {error}"))
}

fn normalized(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_accepts_partial_values() {
        let config = parse_config(r#"{"remote_url": "https://api.example.com"}"#).unwrap();
        assert_eq!(
            config.remote_url.as_deref(),
            Some("https://api.example.com")
        );
        assert!(config.owner_id.is_none());
        assert!(!config.is_remote_configured());
    }

    #[test]
    fn parse_config_rejects_unknown_fields() {
        let error = parse_config(r#"{"remote_url": "x", "unexpected": true}"#).unwrap_err();
        assert!(error.contains("unknown field"));
    }

    #[test]
    fn remote_configured_requires_url_and_owner() {
        let config = parse_config(
            r#"{"remote_url": "https://api.example.com", "owner_id": "user-1"}"#,
        )
        .unwrap();
        assert!(config.is_remote_configured());

        let blank_owner =
            parse_config(r#"{"remote_url": "https://api.example.com", "owner_id": "  "}"#).unwrap();
        assert!(!blank_owner.is_remote_configured());
    }
}
