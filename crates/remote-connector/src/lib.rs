//! Connectors to remote model endpoints.
//!
//! A [`Connector`] turns runtime parameters into a templated, authenticated
//! [`http::Request`] and normalizes the remote answer into [`ModelTensor`]s. Network
//! I/O and key management stay with the caller.

pub mod action;
pub mod client_config;
pub mod config;
pub mod connector;
pub mod credential;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod template;
pub mod tensor;

pub use action::{ActionType, ConnectorAction};
pub use client_config::ConnectorClientConfig;
pub use config::{ClientDefaults, ConnectorSettings, SettingsError};
pub use connector::{AccessMode, CONNECTOR_CODEC_VERSION, Connector, ConnectorUpdate};
pub use credential::{CredentialCipher, CredentialStore, SecretString};
pub use error::{ConnectorError, Result};
pub use protocol::ConnectorProtocol;
pub use retry::{RetryBackoff, RetryBackoffPolicy};
pub use template::StreamInterfaces;
pub use tensor::ModelTensor;
