//!
//! # Connector
//!
//! A connector describes how to reach one remote model endpoint: its protocol,
//! request templates, parameters and encrypted credential. It builds and signs
//! outbound requests and normalizes what comes back, the caller owns the transport.
//!
use std::collections::BTreeMap;
use std::io::{Cursor, Error as IoError};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use fluvio_protocol::bytes::{Buf, BufMut};
use fluvio_protocol::{Decoder, Encoder, Version};
use http::Request;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::action::{ActionType, ConnectorAction};
use crate::client_config::ConnectorClientConfig;
use crate::config::ClientDefaults;
use crate::credential::{CredentialCipher, CredentialStore, SecretString};
use crate::error::{ConnectorError, Result};
use crate::protocol::{self, ConnectorProtocol, SigningContext};
use crate::retry::RetryBackoff;
use crate::tensor::{self, ModelTensor};
use crate::template::{self, StreamInterfaces};

/// version passed to the binary codec by `to_bytes` / `from_bytes`
pub const CONNECTOR_CODEC_VERSION: Version = 0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Encoder, Decoder)]
#[derive(Serialize, Deserialize)]
#[fluvio(encode_discriminant)]
#[repr(u8)]
#[serde(try_from = "String", into = "String")]
pub enum AccessMode {
    #[default]
    Private = 0,
    Public = 1,
    Restricted = 2,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
            Self::Restricted => "restricted",
        }
    }
}

impl FromStr for AccessMode {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            "restricted" => Ok(Self::Restricted),
            _ => Err(ConnectorError::config(format!("Unsupported access mode: {s}"))),
        }
    }
}

impl TryFrom<String> for AccessMode {
    type Error = ConnectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccessMode> for String {
    fn from(access: AccessMode) -> Self {
        access.as_str().to_owned()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(build_fn(private, name = "build_impl"))]
pub struct Connector {
    #[builder(setter(into))]
    pub name: String,
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub protocol: ConnectorProtocol,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[builder(default, setter(custom))]
    #[serde(default, skip_serializing_if = "CredentialStore::is_empty")]
    credential: CredentialStore,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ConnectorAction>,
    /// MCP server url
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// MCP header templates
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backend_roles: Vec<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessMode>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_config: Option<ConnectorClientConfig>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// epoch millis
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
    /// epoch millis
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_time: Option<i64>,
}

impl ConnectorBuilder {
    /// plaintext secrets, encrypted later by `Connector::encrypt`
    pub fn credential(&mut self, credential: BTreeMap<String, String>) -> &mut Self {
        self.credential = Some(CredentialStore::new(credential));
        self
    }

    pub fn parameter(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let mut parameters = self.parameters.take().unwrap_or_default();
        parameters.insert(key.into(), value.into());
        self.parameters = Some(parameters);
        self
    }

    pub fn action(&mut self, action: ConnectorAction) -> &mut Self {
        let mut actions = self.actions.take().unwrap_or_default();
        actions.push(action);
        self.actions = Some(actions);
        self
    }

    pub fn build(&self) -> Result<Connector> {
        let mut connector = self.build_impl().map_err(|e| {
            ConnectorError::config(format!("Missing required config option: {e}"))
        })?;
        connector.validate()?;
        if connector.created_time.is_none() {
            connector.created_time = Some(now_millis());
        }
        Ok(connector)
    }
}

/// Partial replacement of a connector, absent fields are kept
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectorUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub protocol: Option<ConnectorProtocol>,
    pub parameters: Option<BTreeMap<String, String>>,
    /// plaintext, replaces the whole credential map
    pub credential: Option<BTreeMap<String, String>>,
    pub actions: Option<Vec<ConnectorAction>>,
    pub backend_roles: Option<Vec<String>>,
    pub access: Option<AccessMode>,
    pub client_config: Option<ConnectorClientConfig>,
    pub url: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
}

impl Connector {
    pub fn builder() -> ConnectorBuilder {
        ConnectorBuilder::default()
    }

    /// Parse a persisted document and check it against its protocol
    pub fn from_json(json: &str) -> Result<Self> {
        let connector: Self = serde_json::from_str(json)?;
        connector.validate()?;
        Ok(connector)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut dest = Vec::with_capacity(self.write_size(CONNECTOR_CODEC_VERSION));
        self.encode(&mut dest, CONNECTOR_CODEC_VERSION)?;
        Ok(dest)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::decode_from(
            &mut Cursor::new(bytes),
            CONNECTOR_CODEC_VERSION,
        )?)
    }

    pub fn validate(&self) -> Result<()> {
        self.protocol
            .validate(&self.credential, &self.parameters, self.url.as_deref())?;
        if !self.protocol.supports_actions() && !self.actions.is_empty() {
            return Err(ConnectorError::unsupported("actions", self.protocol));
        }
        for action in &self.actions {
            action.validate_process_functions(&self.parameters)?;
        }
        if let Some(config) = &self.client_config {
            config.validate()?;
        }
        Ok(())
    }

    pub fn credential(&self) -> &CredentialStore {
        &self.credential
    }

    pub fn decrypted_credential(&self) -> Option<&BTreeMap<String, SecretString>> {
        self.credential.decrypted_credential()
    }

    pub fn decrypted_headers(&self) -> Option<&BTreeMap<String, SecretString>> {
        self.credential.decrypted_headers()
    }

    pub fn actions(&self) -> Result<&[ConnectorAction]> {
        self.require_actions("actions")?;
        Ok(&self.actions)
    }

    pub fn add_action(&mut self, action: ConnectorAction) -> Result<()> {
        self.require_actions("add_action")?;
        action.validate_process_functions(&self.parameters)?;
        self.actions.push(action);
        Ok(())
    }

    /// Action matching `action` case-insensitively on its type
    pub fn find_action(&self, action: &str) -> Result<&ConnectorAction> {
        self.require_actions("find_action")?;
        let action_type: ActionType = action.parse()?;
        self.actions
            .iter()
            .find(|candidate| candidate.action_type == action_type)
            .ok_or_else(|| ConnectorError::ActionNotFound(action.to_owned()))
    }

    /// Fill the action body with the connector parameters overlaid by `parameters`
    /// and the decrypted credential. An action without a body yields an empty payload.
    pub fn create_payload(
        &self,
        action: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<String> {
        self.create_payload_with(action, parameters, &StreamInterfaces::default())
    }

    #[instrument(skip(self, parameters, stream_interfaces), fields(connector = %self.name))]
    pub fn create_payload_with(
        &self,
        action: &str,
        parameters: &BTreeMap<String, String>,
        stream_interfaces: &StreamInterfaces,
    ) -> Result<String> {
        self.require_actions("create_payload")?;
        let found = self.find_action(action)?;
        let Some(body) = &found.request_body else {
            debug!("action has no request body");
            return Ok(String::new());
        };
        let merged = self.merged_parameters(parameters);
        let empty = BTreeMap::new();
        let credential = self.decrypted_credential().unwrap_or(&empty);
        let payload = template::fill(body, &merged, credential);
        debug!(parameters = merged.len(), "created payload");
        Ok(stream_interfaces.apply(payload, &merged))
    }

    pub fn get_action_endpoint(
        &self,
        action: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<String> {
        let found = self.find_action(action)?;
        Ok(template::fill_parameters(
            &found.url,
            &self.merged_parameters(parameters),
        ))
    }

    pub fn get_action_http_method(&self, action: &str) -> Result<&str> {
        Ok(&self.find_action(action)?.method)
    }

    /// Encrypt every credential value in place
    #[instrument(skip(self, cipher), fields(connector = %self.name))]
    pub async fn encrypt(
        &mut self,
        cipher: &dyn CredentialCipher,
        tenant_id: Option<&str>,
    ) -> Result<()> {
        self.credential.encrypt(cipher, tenant_id).await
    }

    /// Decrypt the credential and derive the headers of `action`, for MCP connectors
    /// the connector level headers. Nothing changes when any value fails.
    #[instrument(skip(self, cipher), fields(connector = %self.name))]
    pub async fn decrypt(
        &mut self,
        action: &str,
        cipher: &dyn CredentialCipher,
        tenant_id: Option<&str>,
    ) -> Result<()> {
        let (action_type, header_templates) = if self.protocol.is_mcp() {
            (None, self.headers.clone())
        } else {
            let action_type = action.parse::<ActionType>().ok();
            let templates = self
                .actions
                .iter()
                .find(|candidate| Some(candidate.action_type) == action_type)
                .and_then(|found| found.headers.clone());
            (action_type, templates)
        };
        self.credential
            .decrypt_for(cipher, tenant_id, action_type, header_templates.as_ref())
            .await
    }

    /// Drop the credential together with every value derived from it
    pub fn remove_credential(&mut self) {
        self.credential.clear();
    }

    /// Apply `update` to a copy, encrypt a replacement credential and validate the
    /// result before committing, so a failed update leaves the connector untouched.
    #[instrument(skip(self, update, cipher), fields(connector = %self.name))]
    pub async fn update(
        &mut self,
        update: ConnectorUpdate,
        cipher: &dyn CredentialCipher,
    ) -> Result<()> {
        let mut next = self.clone();
        if let Some(name) = update.name {
            next.name = name;
        }
        if let Some(description) = update.description {
            next.description = Some(description);
        }
        if let Some(version) = update.version {
            next.version = Some(version);
        }
        if let Some(protocol) = update.protocol {
            if protocol != next.protocol {
                debug!(from = %next.protocol, to = %protocol, "protocol changed");
            }
            next.protocol = protocol;
        }
        if let Some(parameters) = update.parameters {
            next.parameters = parameters;
        }
        if let Some(actions) = update.actions {
            next.actions = actions;
        }
        if let Some(backend_roles) = update.backend_roles {
            next.backend_roles = backend_roles;
        }
        if let Some(access) = update.access {
            next.access = Some(access);
        }
        if let Some(client_config) = update.client_config {
            next.client_config = Some(client_config);
        }
        if let Some(url) = update.url {
            next.url = Some(url);
        }
        if let Some(headers) = update.headers {
            next.headers = Some(headers);
        }
        if let Some(credential) = update.credential {
            let tenant_id = next.tenant_id.clone();
            next.credential
                .replace(credential, cipher, tenant_id.as_deref())
                .await?;
        }
        next.validate()?;
        next.last_updated_time = Some(now_millis());
        *self = next;
        Ok(())
    }

    /// Every endpoint the connector can reach must start with a match of one of the
    /// trusted patterns.
    pub fn validate_connector_url(&self, trusted_endpoints_regex: &[String]) -> Result<()> {
        let patterns = trusted_endpoints_regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    ConnectorError::config(format!("Invalid trusted endpoint regex {pattern}: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let urls: Vec<String> = if self.protocol.is_mcp() {
            self.url.iter().cloned().collect()
        } else {
            self.actions
                .iter()
                .map(|action| template::fill_parameters(&action.url, &self.parameters))
                .collect()
        };
        for url in urls {
            let trusted = patterns
                .iter()
                .any(|pattern| pattern.find(&url).is_some_and(|m| m.start() == 0));
            if !trusted {
                warn!(connector = %self.name, %url, "untrusted connector endpoint");
                return Err(ConnectorError::UntrustedEndpoint(url));
            }
        }
        Ok(())
    }

    /// Normalize a raw remote response into `tensors`
    pub fn parse_response(
        &self,
        raw: &Value,
        tensors: &mut Vec<ModelTensor>,
        wrap_response_in_array: bool,
    ) -> Result<()> {
        self.require_actions("parse_response")?;
        tensor::normalize(raw, tensors, wrap_response_in_array);
        Ok(())
    }

    /// Templated, unsigned request for `action`
    pub fn build_request(
        &self,
        action: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<Request<String>> {
        self.build_request_with(action, parameters, &StreamInterfaces::default())
    }

    /// `build_request` with the stream injection allowlist of the caller settings
    pub fn build_request_with(
        &self,
        action: &str,
        parameters: &BTreeMap<String, String>,
        stream_interfaces: &StreamInterfaces,
    ) -> Result<Request<String>> {
        let found = self.find_action(action)?;
        let merged = self.merged_parameters(parameters);
        let url = template::fill_parameters(&found.url, &merged);
        let body = self.create_payload_with(action, parameters, stream_interfaces)?;
        if found.request_body.is_some() {
            template::validate_payload(&body)?;
        }

        let mut request = Request::builder()
            .method(found.method.to_uppercase().as_str())
            .uri(url.as_str())
            .body(body)?;

        // decrypted headers only count when they were derived for this action
        let scoped = self.credential.decrypted_headers_for(found.action_type);
        let headers: BTreeMap<String, String> = match scoped {
            Some(decrypted) => decrypted
                .iter()
                .map(|(name, value)| (name.clone(), template::fill_parameters(value, &merged)))
                .collect(),
            None => {
                let empty = BTreeMap::new();
                let credential = self.decrypted_credential().unwrap_or(&empty);
                found
                    .headers
                    .iter()
                    .flatten()
                    .map(|(name, value)| (name.clone(), template::fill(value, &merged, credential)))
                    .collect()
            }
        };
        if let Some(key) = headers.values().find_map(|value| template::unfilled_placeholder(value)) {
            return Err(ConnectorError::UnfilledPlaceholder(key));
        }
        protocol::apply_headers(&mut request, &headers)?;
        debug!(connector = %self.name, %action, %url, "built request");
        Ok(request)
    }

    /// Authenticate `request` the way the connector protocol requires
    pub fn sign_request(&self, request: &mut Request<String>, now: DateTime<Utc>) -> Result<()> {
        // action headers are applied by `build_request`, only MCP carries connector level ones
        let headers = if self.protocol.is_mcp() {
            self.decrypted_headers()
        } else {
            None
        };
        let context = SigningContext {
            parameters: &self.parameters,
            credential: self.decrypted_credential(),
            headers,
        };
        self.protocol.sign(request, &context, now)
    }

    /// `url` joined with the protocol sub path, MCP connectors only
    pub fn mcp_endpoint(&self) -> Result<String> {
        let path = self
            .protocol
            .mcp_path(&self.parameters)
            .ok_or_else(|| ConnectorError::unsupported("mcp_endpoint", self.protocol))?;
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| ConnectorError::config("Missing url"))?;
        let path = path.trim_start_matches('/');
        Ok(format!("{}/{path}", url.trim_end_matches('/')))
    }

    pub fn retry_backoff(&self, defaults: &ClientDefaults) -> RetryBackoff {
        RetryBackoff::from_config(self.client_config.as_ref(), defaults)
    }

    fn require_actions(&self, operation: &'static str) -> Result<()> {
        if self.protocol.supports_actions() {
            Ok(())
        } else {
            Err(ConnectorError::unsupported(operation, self.protocol))
        }
    }

    fn merged_parameters(&self, parameters: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = self.parameters.clone();
        merged.extend(parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// hand written so the decrypted view never reaches the wire
impl Encoder for Connector {
    fn write_size(&self, version: Version) -> usize {
        self.name.write_size(version)
            + self.description.write_size(version)
            + self.version.write_size(version)
            + self.protocol.write_size(version)
            + self.parameters.write_size(version)
            + self.credential.credential().cloned().write_size(version)
            + self.actions.write_size(version)
            + self.url.write_size(version)
            + self.headers.write_size(version)
            + self.backend_roles.write_size(version)
            + self.access.write_size(version)
            + self.client_config.write_size(version)
            + self.tenant_id.write_size(version)
            + self.created_time.write_size(version)
            + self.last_updated_time.write_size(version)
    }

    fn encode<T>(&self, dest: &mut T, version: Version) -> Result<(), IoError>
    where
        T: BufMut,
    {
        self.name.encode(dest, version)?;
        self.description.encode(dest, version)?;
        self.version.encode(dest, version)?;
        self.protocol.encode(dest, version)?;
        self.parameters.encode(dest, version)?;
        self.credential.credential().cloned().encode(dest, version)?;
        self.actions.encode(dest, version)?;
        self.url.encode(dest, version)?;
        self.headers.encode(dest, version)?;
        self.backend_roles.encode(dest, version)?;
        self.access.encode(dest, version)?;
        self.client_config.encode(dest, version)?;
        self.tenant_id.encode(dest, version)?;
        self.created_time.encode(dest, version)?;
        self.last_updated_time.encode(dest, version)?;
        Ok(())
    }
}

impl Decoder for Connector {
    fn decode<T>(&mut self, src: &mut T, version: Version) -> Result<(), IoError>
    where
        T: Buf,
    {
        self.name.decode(src, version)?;
        self.description.decode(src, version)?;
        self.version.decode(src, version)?;
        self.protocol.decode(src, version)?;
        self.parameters.decode(src, version)?;
        let mut credential: Option<BTreeMap<String, String>> = None;
        credential.decode(src, version)?;
        self.credential = CredentialStore::from_persisted(credential);
        self.actions.decode(src, version)?;
        self.url.decode(src, version)?;
        self.headers.decode(src, version)?;
        self.backend_roles.decode(src, version)?;
        self.access.decode(src, version)?;
        self.client_config.decode(src, version)?;
        self.tenant_id.decode(src, version)?;
        self.created_time.decode(src, version)?;
        self.last_updated_time.decode(src, version)?;
        Ok(())
    }
}
