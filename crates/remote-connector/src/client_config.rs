use derive_builder::Builder;
use fluvio_protocol::{Decoder, Encoder};
use serde::{Deserialize, Serialize};

use crate::config::ClientDefaults;
use crate::error::{ConnectorError, Result};
use crate::retry::{RetryBackoff, RetryBackoffPolicy};

/// Transport hints of one connector. Absent fields fall back to `ClientDefaults`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Builder, Encoder, Decoder)]
#[derive(Serialize, Deserialize)]
#[builder(build_fn(private, name = "build_impl"))]
pub struct ConnectorClientConfig {
    #[builder(default, setter(strip_option, into))]
    #[serde(rename = "max_connection", skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<i32>,
    #[builder(default, setter(strip_option, into))]
    #[serde(rename = "connection_timeout", skip_serializing_if = "Option::is_none")]
    pub connection_timeout_ms: Option<i32>,
    #[builder(default, setter(strip_option, into))]
    #[serde(rename = "read_timeout", skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<i32>,
    #[builder(default, setter(strip_option, into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_millis: Option<i32>,
    #[builder(default, setter(strip_option, into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_timeout_seconds: Option<i32>,
    #[builder(default, setter(strip_option, into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retry_times: Option<i32>,
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_policy: Option<RetryBackoffPolicy>,
}

impl ConnectorClientConfig {
    pub fn builder() -> ConnectorClientConfigBuilder {
        ConnectorClientConfigBuilder::default()
    }

    /// Reject negative sizes and durations, `max_retry_times` may be negative (unlimited)
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("max_connection", self.max_connections),
            ("connection_timeout", self.connection_timeout_ms),
            ("read_timeout", self.read_timeout_ms),
            ("retry_backoff_millis", self.retry_backoff_millis),
            ("retry_timeout_seconds", self.retry_timeout_seconds),
        ];
        for (name, value) in checks {
            if let Some(value) = value.filter(|v| *v < 0) {
                return Err(ConnectorError::config(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn max_connections_or(&self, defaults: &ClientDefaults) -> i32 {
        self.max_connections.unwrap_or(defaults.max_connections)
    }

    pub fn connection_timeout_ms_or(&self, defaults: &ClientDefaults) -> i32 {
        self.connection_timeout_ms
            .unwrap_or(defaults.connection_timeout_ms)
    }

    pub fn read_timeout_ms_or(&self, defaults: &ClientDefaults) -> i32 {
        self.read_timeout_ms.unwrap_or(defaults.read_timeout_ms)
    }

    pub fn retry_backoff(&self, defaults: &ClientDefaults) -> RetryBackoff {
        RetryBackoff::from_config(Some(self), defaults)
    }
}

impl ConnectorClientConfigBuilder {
    pub fn build(&self) -> Result<ConnectorClientConfig> {
        let config = self.build_impl().map_err(|e| {
            ConnectorError::config(format!("Missing required config option: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use fluvio_protocol::{Decoder, Encoder};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_json_field_names() {
        let config = ConnectorClientConfig::builder()
            .max_connections(20)
            .connection_timeout_ms(1000)
            .retry_backoff_policy(RetryBackoffPolicy::ExponentialEqualJitter)
            .build()
            .expect("config");
        let json = serde_json::to_value(&config).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "max_connection": 20,
                "connection_timeout": 1000,
                "retry_backoff_policy": "exponential_equal_jitter"
            })
        );
        let parsed: ConnectorClientConfig = serde_json::from_value(json).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_negative_values_rejected() {
        let err = ConnectorClientConfig::builder()
            .read_timeout_ms(-1)
            .build()
            .expect_err("negative timeout");
        assert_eq!(err.to_string(), "read_timeout must be non-negative, got -1");

        assert!(
            ConnectorClientConfig::builder()
                .max_retry_times(-1)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_defaults_fill_gaps() {
        let defaults = ClientDefaults::default();
        let config = ConnectorClientConfig::builder()
            .read_timeout_ms(5)
            .build()
            .expect("config");
        assert_eq!(config.read_timeout_ms_or(&defaults), 5);
        assert_eq!(config.connection_timeout_ms_or(&defaults), 30_000);
        assert_eq!(config.max_connections_or(&defaults), 30);
        assert_eq!(
            config.retry_backoff(&defaults).policy(),
            RetryBackoffPolicy::Constant
        );
    }

    #[test]
    fn test_binary_form() {
        let config = ConnectorClientConfig::builder()
            .max_retry_times(3)
            .retry_backoff_policy(RetryBackoffPolicy::ExponentialFullJitter)
            .build()
            .expect("config");
        let mut bytes = vec![];
        config.encode(&mut bytes, 0).expect("encode");
        let decoded = ConnectorClientConfig::decode_from(&mut std::io::Cursor::new(&bytes), 0)
            .expect("decode");
        assert_eq!(decoded, config);
    }
}
