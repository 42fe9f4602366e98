use std::io::Error as IoError;

use crate::protocol::ConnectorProtocol;

pub type Result<T, E = ConnectorError> = core::result::Result<T, E>;

/// Possible errors that may arise when building, validating or driving a connector
#[derive(thiserror::Error, Debug)]
pub enum ConnectorError {
    /// missing or invalid construction field
    #[error("{0}")]
    Configuration(String),
    #[error("Unsupported connector protocol. Please use one of {}", ConnectorProtocol::allowed_values())]
    UnsupportedProtocol(String),
    #[error("Some parameter placeholder not filled in payload: {0}")]
    UnfilledPlaceholder(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Connector URL is not matching the trusted connector endpoint regex")]
    UntrustedEndpoint(String),
    #[error("Exception during encrypting credentials")]
    Encryption(#[source] anyhow::Error),
    #[error("Exception during decrypting credentials")]
    Decryption(#[source] anyhow::Error),
    #[error("{operation} is not supported by {protocol} connectors")]
    UnsupportedOperation {
        operation: &'static str,
        protocol: ConnectorProtocol,
    },
    #[error("No {0} action found")]
    ActionNotFound(String),
    #[error("Unsupported retry backoff policy.")]
    UnsupportedRetryPolicy(String),
    #[error("Failed to sign request: {0}")]
    Signing(String),
    #[error("Invalid request: {0}")]
    Request(#[from] http::Error),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("Connector json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConnectorError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn unsupported(operation: &'static str, protocol: ConnectorProtocol) -> Self {
        Self::UnsupportedOperation {
            operation,
            protocol,
        }
    }
}

impl From<openssl::error::ErrorStack> for ConnectorError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Signing(err.to_string())
    }
}
