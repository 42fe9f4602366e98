//!
//! # Connector protocols
//!
//! A protocol decides which fields a connector must carry and how an outbound
//! request is authenticated before the caller sends it.
//!
mod aws;
mod oci;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use fluvio_protocol::{Decoder, Encoder};
use http::header::{HeaderName, HeaderValue};
use http::Request;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credential::{ACCESS_KEY_FIELD, CredentialStore, SECRET_KEY_FIELD, SecretString};
use crate::error::{ConnectorError, Result};

pub use aws::SigV4Credentials;
pub use oci::{OciAuthType, RESOURCE_PRINCIPAL_KEY_ENV, RESOURCE_PRINCIPAL_TOKEN_ENV};

pub const REGION_FIELD: &str = "region";
pub const SERVICE_NAME_FIELD: &str = "service_name";
pub const SSE_ENDPOINT_FIELD: &str = "sse_endpoint";
pub const ENDPOINT_FIELD: &str = "endpoint";
pub const DEFAULT_SSE_ENDPOINT: &str = "/sse";
pub const DEFAULT_STREAMABLE_HTTP_ENDPOINT: &str = "/mcp";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Encoder, Decoder)]
#[derive(Serialize, Deserialize)]
#[fluvio(encode_discriminant)]
#[repr(u8)]
#[serde(try_from = "String", into = "String")]
pub enum ConnectorProtocol {
    #[default]
    Http = 0,
    AwsSigV4 = 1,
    OciSigV1 = 2,
    McpSse = 3,
    McpStreamableHttp = 4,
}

impl ConnectorProtocol {
    pub const ALL: [ConnectorProtocol; 5] = [
        Self::Http,
        Self::AwsSigV4,
        Self::OciSigV1,
        Self::McpSse,
        Self::McpStreamableHttp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::AwsSigV4 => "aws_sigv4",
            Self::OciSigV1 => "oci_sigv1",
            Self::McpSse => "mcp_sse",
            Self::McpStreamableHttp => "mcp_streamable_http",
        }
    }

    /// `[http, aws_sigv4, ...]`
    pub fn allowed_values() -> String {
        let names: Vec<&str> = Self::ALL.iter().map(|p| p.as_str()).collect();
        format!("[{}]", names.join(", "))
    }

    pub fn is_mcp(&self) -> bool {
        matches!(self, Self::McpSse | Self::McpStreamableHttp)
    }

    /// MCP endpoints are a single implicit action, everything else declares actions
    pub fn supports_actions(&self) -> bool {
        !self.is_mcp()
    }

    /// Construction time checks, the first missing field decides the error.
    pub fn validate(
        &self,
        credential: &CredentialStore,
        parameters: &BTreeMap<String, String>,
        url: Option<&str>,
    ) -> Result<()> {
        match self {
            Self::Http => Ok(()),
            Self::AwsSigV4 => {
                if !credential.has_value(ACCESS_KEY_FIELD)
                    || !credential.has_value(SECRET_KEY_FIELD)
                {
                    return Err(ConnectorError::config("Missing credential"));
                }
                require(parameters, SERVICE_NAME_FIELD, "Missing service name")?;
                require(parameters, REGION_FIELD, "Missing region")
            }
            Self::OciSigV1 => oci::validate(credential, parameters),
            Self::McpSse | Self::McpStreamableHttp => match url {
                Some(url) if !url.trim().is_empty() => Ok(()),
                _ => Err(ConnectorError::config("Missing url")),
            },
        }
    }

    /// sub path of an MCP server url the client talks to
    pub fn mcp_path<'a>(&self, parameters: &'a BTreeMap<String, String>) -> Option<&'a str> {
        let (field, default) = match self {
            Self::McpSse => (SSE_ENDPOINT_FIELD, DEFAULT_SSE_ENDPOINT),
            Self::McpStreamableHttp => (ENDPOINT_FIELD, DEFAULT_STREAMABLE_HTTP_ENDPOINT),
            _ => return None,
        };
        Some(parameters.get(field).map(String::as_str).unwrap_or(default))
    }

    /// Authenticate a fully templated request in place.
    pub fn sign(
        &self,
        request: &mut Request<String>,
        context: &SigningContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self {
            Self::Http | Self::McpSse | Self::McpStreamableHttp => {
                // headers already templated into the request win
                if let Some(headers) = context.headers {
                    let missing: Vec<_> = headers
                        .iter()
                        .filter(|(name, _)| !request.headers().contains_key(name.as_str()))
                        .collect();
                    apply_headers(request, missing)?;
                }
                debug!(protocol = %self, "no request signature required");
                Ok(())
            }
            Self::AwsSigV4 => {
                let credentials = SigV4Credentials::from_decrypted(context.credential)?;
                aws::sign(
                    request,
                    &credentials,
                    required(context.parameters, REGION_FIELD)?,
                    required(context.parameters, SERVICE_NAME_FIELD)?,
                    now,
                )
            }
            Self::OciSigV1 => {
                let signer = oci::OciSigner::from_parameters(context.parameters)?;
                signer.sign(request, now)
            }
        }
    }
}

impl FromStr for ConnectorProtocol {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|protocol| protocol.as_str() == s.trim())
            .ok_or_else(|| ConnectorError::UnsupportedProtocol(s.to_owned()))
    }
}

impl TryFrom<String> for ConnectorProtocol {
    type Error = ConnectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConnectorProtocol> for String {
    fn from(protocol: ConnectorProtocol) -> Self {
        protocol.as_str().to_owned()
    }
}

impl fmt::Display for ConnectorProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connector state a signer may read
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    pub parameters: &'a BTreeMap<String, String>,
    pub credential: Option<&'a BTreeMap<String, SecretString>>,
    pub headers: Option<&'a BTreeMap<String, SecretString>>,
}

fn require(parameters: &BTreeMap<String, String>, key: &str, message: &str) -> Result<()> {
    match parameters.get(key) {
        Some(value) if !value.trim().is_empty() => Ok(()),
        _ => Err(ConnectorError::config(message)),
    }
}

fn required<'a>(parameters: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    parameters
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ConnectorError::Signing(format!("missing parameter {key}")))
}

pub(crate) fn apply_headers<I, K, V>(request: &mut Request<String>, headers: I) -> Result<()>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_ref().as_bytes()).map_err(http::Error::from)?;
        let mut value = HeaderValue::from_str(value.as_ref()).map_err(http::Error::from)?;
        value.set_sensitive(true);
        request.headers_mut().insert(name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_protocol_names() {
        for protocol in ConnectorProtocol::ALL {
            assert_eq!(
                protocol.as_str().parse::<ConnectorProtocol>().expect("parse"),
                protocol
            );
        }
        let err = "grpc".parse::<ConnectorProtocol>().expect_err("unknown");
        assert_eq!(
            err.to_string(),
            "Unsupported connector protocol. Please use one of [http, aws_sigv4, oci_sigv1, mcp_sse, mcp_streamable_http]"
        );
        assert!(serde_json::from_str::<ConnectorProtocol>(r#""AWS_SIGV4""#).is_err());
    }

    #[test]
    fn test_aws_validation_order() {
        let aws = ConnectorProtocol::AwsSigV4;
        let empty = CredentialStore::default();
        let err = aws.validate(&empty, &params(&[]), None).expect_err("credential");
        assert_eq!(err.to_string(), "Missing credential");

        let access_only = CredentialStore::new(params(&[("access_key", "a")]));
        let err = aws
            .validate(&access_only, &params(&[]), None)
            .expect_err("secret");
        assert_eq!(err.to_string(), "Missing credential");

        let blank = CredentialStore::new(params(&[("access_key", ""), ("secret_key", " ")]));
        let err = aws
            .validate(
                &blank,
                &params(&[("service_name", "sagemaker"), ("region", "us-east-1")]),
                None,
            )
            .expect_err("blank keys");
        assert_eq!(err.to_string(), "Missing credential");

        let keys = CredentialStore::new(params(&[("access_key", "a"), ("secret_key", "s")]));
        let err = aws
            .validate(&keys, &params(&[("region", "us-east-1")]), None)
            .expect_err("service");
        assert_eq!(err.to_string(), "Missing service name");

        let err = aws
            .validate(&keys, &params(&[("service_name", "sagemaker")]), None)
            .expect_err("region");
        assert_eq!(err.to_string(), "Missing region");

        assert!(
            aws.validate(
                &keys,
                &params(&[("service_name", "sagemaker"), ("region", "us-east-1")]),
                None
            )
            .is_ok()
        );
    }

    #[test]
    fn test_mcp_requires_url() {
        let store = CredentialStore::default();
        let err = ConnectorProtocol::McpSse
            .validate(&store, &params(&[]), None)
            .expect_err("url");
        assert_eq!(err.to_string(), "Missing url");
        assert!(
            ConnectorProtocol::McpStreamableHttp
                .validate(&store, &params(&[]), Some("https://mcp.test.com"))
                .is_ok()
        );
    }

    #[test]
    fn test_mcp_path() {
        let empty = params(&[]);
        assert_eq!(ConnectorProtocol::McpSse.mcp_path(&empty), Some("/sse"));
        assert_eq!(
            ConnectorProtocol::McpStreamableHttp.mcp_path(&empty),
            Some("/mcp")
        );
        let custom = params(&[("sse_endpoint", "/v2/sse")]);
        assert_eq!(ConnectorProtocol::McpSse.mcp_path(&custom), Some("/v2/sse"));
        assert_eq!(ConnectorProtocol::Http.mcp_path(&custom), None);
    }

    #[test]
    fn test_http_sign_applies_headers() {
        let mut request = Request::builder()
            .method("POST")
            .uri("https://api.openai.com/v1/chat/completions")
            .body(String::new())
            .expect("request");
        let headers = BTreeMap::from([(
            "Authorization".to_string(),
            SecretString::from("Bearer sk-1".to_string()),
        )]);
        let parameters = BTreeMap::new();
        let context = SigningContext {
            parameters: &parameters,
            credential: None,
            headers: Some(&headers),
        };
        ConnectorProtocol::Http
            .sign(&mut request, &context, Utc::now())
            .expect("sign");
        assert_eq!(request.headers()["authorization"], "Bearer sk-1");
    }
}
