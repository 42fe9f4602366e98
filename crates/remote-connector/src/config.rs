//!
//! # Connector settings
//!
//! Operator side configuration: trusted endpoints, the stream allowlist and the
//! defaults applied when a connector leaves client config fields unset.
//!
use std::env;
use std::fs::read_to_string;
use std::io::Error as IoError;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::retry::RetryBackoffPolicy;
use crate::template::StreamInterfaces;

/// environment variable naming the settings file read by `ConnectorSettings::load_default`
pub const SETTINGS_PATH_ENV: &str = "CONNECTOR_SETTINGS_PATH";

pub const DEFAULT_MAX_CONNECTIONS: i32 = 30;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: i32 = 30_000;
pub const DEFAULT_READ_TIMEOUT_MS: i32 = 30_000;
pub const DEFAULT_RETRY_BACKOFF_MILLIS: i32 = 200;
pub const DEFAULT_RETRY_TIMEOUT_SECONDS: i32 = 30;
pub const DEFAULT_MAX_RETRY_TIMES: i32 = 0;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings file {path}")]
    Io { path: String, source: IoError },
    #[error("Failed to deserialize connector settings {path}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    pub trusted_endpoints_regex: Vec<String>,
    pub stream_interfaces: StreamInterfaces,
    pub client: ClientDefaults,
}

impl ConnectorSettings {
    /// read from `CONNECTOR_SETTINGS_PATH` when set, built-in defaults otherwise
    pub fn load_default() -> Result<Self, SettingsError> {
        match env::var(SETTINGS_PATH_ENV) {
            Ok(path) => Self::load_from(path),
            Err(_) => {
                debug!("no settings file configured, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from<T: AsRef<Path>>(path: T) -> Result<Self, SettingsError> {
        let path_ref = path.as_ref();
        debug!(?path_ref, "loading from");
        let file_str = read_to_string(path_ref).map_err(|source| SettingsError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        toml::from_str(&file_str).map_err(|source| SettingsError::Toml {
            path: path_ref.display().to_string(),
            source,
        })
    }

    pub fn load_str(settings: &str) -> Result<Self, SettingsError> {
        toml::from_str(settings).map_err(|source| SettingsError::Toml {
            path: "<inline>".to_owned(),
            source,
        })
    }
}

/// Values used for connector client config fields that are absent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientDefaults {
    pub max_connections: i32,
    pub connection_timeout_ms: i32,
    pub read_timeout_ms: i32,
    pub retry_backoff_millis: i32,
    pub retry_timeout_seconds: i32,
    pub max_retry_times: i32,
    pub retry_backoff_policy: RetryBackoffPolicy,
}

impl Default for ClientDefaults {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            retry_backoff_millis: DEFAULT_RETRY_BACKOFF_MILLIS,
            retry_timeout_seconds: DEFAULT_RETRY_TIMEOUT_SECONDS,
            max_retry_times: DEFAULT_MAX_RETRY_TIMES,
            retry_backoff_policy: RetryBackoffPolicy::Constant,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ConnectorSettings::load_str("").expect("empty settings");
        assert_eq!(settings, ConnectorSettings::default());
        assert!(
            settings
                .stream_interfaces
                .contains("openai/v1/chat/completions")
        );
        assert_eq!(settings.client.retry_backoff_millis, 200);
    }

    #[test]
    fn test_load_file() {
        let settings = ConnectorSettings::load_from("test-data/settings.toml").expect("load");
        assert_eq!(
            settings.trusted_endpoints_regex,
            vec![
                r"^https://api\.openai\.com/.*$".to_string(),
                r"^https://runtime\.sagemaker\..*[a-z0-9-]\.amazonaws\.com/.*$".to_string(),
            ]
        );
        assert_eq!(
            settings.stream_interfaces,
            StreamInterfaces::new(["openai/v1/chat/completions"])
        );
        assert_eq!(settings.client.max_retry_times, 3);
        assert_eq!(
            settings.client.retry_backoff_policy,
            RetryBackoffPolicy::ExponentialFullJitter
        );
        assert_eq!(settings.client.read_timeout_ms, DEFAULT_READ_TIMEOUT_MS);
    }

    #[test]
    fn test_bad_file() {
        let err = ConnectorSettings::load_str("client = 3").expect_err("invalid");
        assert!(matches!(err, SettingsError::Toml { .. }));
        let err = ConnectorSettings::load_from("test-data/missing.toml").expect_err("missing");
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}
