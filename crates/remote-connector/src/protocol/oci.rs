use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use http::header::{
    AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, DATE, HOST, HeaderName, HeaderValue,
};
use http::{Method, Request};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::credential::CredentialStore;
use crate::error::{ConnectorError, Result};

pub const AUTH_TYPE_FIELD: &str = "auth_type";
pub const TENANT_ID_FIELD: &str = "tenant_id";
pub const USER_ID_FIELD: &str = "user_id";
pub const FINGERPRINT_FIELD: &str = "fingerprint";
pub const PEMFILE_PATH_FIELD: &str = "pemfile_path";

/// session token of a resource principal, literal value or file path
pub const RESOURCE_PRINCIPAL_TOKEN_ENV: &str = "OCI_RESOURCE_PRINCIPAL_RPST";
/// private key of a resource principal, literal pem or file path
pub const RESOURCE_PRINCIPAL_KEY_ENV: &str = "OCI_RESOURCE_PRINCIPAL_PRIVATE_PEM";

const DATE_HEADER: &str = "date";
const REQUEST_TARGET: &str = "(request-target)";
const HOST_HEADER: &str = "host";
const CONTENT_LENGTH_HEADER: &str = "content-length";
const CONTENT_TYPE_HEADER: &str = "content-type";
const CONTENT_SHA256_HEADER: &str = "x-content-sha256";
const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OciAuthType {
    UserPrincipal,
    ResourcePrincipal,
}

impl FromStr for OciAuthType {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER_PRINCIPAL" => Ok(Self::UserPrincipal),
            "RESOURCE_PRINCIPAL" => Ok(Self::ResourcePrincipal),
            _ => Err(ConnectorError::config("Wrong OCI client auth type")),
        }
    }
}

impl fmt::Display for OciAuthType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UserPrincipal => f.write_str("USER_PRINCIPAL"),
            Self::ResourcePrincipal => f.write_str("RESOURCE_PRINCIPAL"),
        }
    }
}

fn auth_type(parameters: &BTreeMap<String, String>) -> Result<OciAuthType> {
    parameters
        .get(AUTH_TYPE_FIELD)
        .ok_or_else(|| ConnectorError::config("Missing OCI client auth type"))?
        .parse()
}

pub(super) fn validate(
    credential: &CredentialStore,
    parameters: &BTreeMap<String, String>,
) -> Result<()> {
    if credential.is_empty() {
        return Err(ConnectorError::config("Missing credential"));
    }
    if auth_type(parameters)? == OciAuthType::ResourcePrincipal {
        return Ok(());
    }
    for (field, message) in [
        (TENANT_ID_FIELD, "Missing tenant id"),
        (USER_ID_FIELD, "Missing user id"),
        (FINGERPRINT_FIELD, "Missing fingerprint"),
        (PEMFILE_PATH_FIELD, "Missing pemfile"),
        (super::REGION_FIELD, "Missing region"),
    ] {
        super::require(parameters, field, message)?;
    }
    Ok(())
}

/// Request signer for the OCI http signature scheme (version 1)
pub(crate) struct OciSigner {
    key_id: String,
    key: PKey<Private>,
}

impl fmt::Debug for OciSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OciSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl OciSigner {
    pub(super) fn from_parameters(parameters: &BTreeMap<String, String>) -> Result<Self> {
        match auth_type(parameters)? {
            OciAuthType::UserPrincipal => {
                let field = |name: &str| {
                    parameters
                        .get(name)
                        .map(String::as_str)
                        .ok_or_else(|| ConnectorError::Signing(format!("missing parameter {name}")))
                };
                let pem = fs::read(field(PEMFILE_PATH_FIELD)?)?;
                Self::user_principal(
                    field(TENANT_ID_FIELD)?,
                    field(USER_ID_FIELD)?,
                    field(FINGERPRINT_FIELD)?,
                    &pem,
                )
            }
            OciAuthType::ResourcePrincipal => {
                let env_value = |name: &str| {
                    env::var(name)
                        .map_err(|_| ConnectorError::Signing(format!("{name} is not set")))
                        .and_then(|value| literal_or_file(&value))
                };
                Self::resource_principal(
                    &env_value(RESOURCE_PRINCIPAL_TOKEN_ENV)?,
                    env_value(RESOURCE_PRINCIPAL_KEY_ENV)?.as_bytes(),
                )
            }
        }
    }

    pub(crate) fn user_principal(
        tenant_id: &str,
        user_id: &str,
        fingerprint: &str,
        pem: &[u8],
    ) -> Result<Self> {
        Ok(Self {
            key_id: format!("{tenant_id}/{user_id}/{fingerprint}"),
            key: PKey::private_key_from_pem(pem)?,
        })
    }

    pub(crate) fn resource_principal(token: &str, pem: &[u8]) -> Result<Self> {
        Ok(Self {
            key_id: format!("ST${}", token.trim()),
            key: PKey::private_key_from_pem(pem)?,
        })
    }

    pub(crate) fn sign(&self, request: &mut Request<String>, now: DateTime<Utc>) -> Result<()> {
        let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        insert(request, DATE, &date)?;
        if !request.headers().contains_key(HOST) {
            let host = request
                .uri()
                .authority()
                .map(|authority| authority.host().to_owned())
                .ok_or_else(|| ConnectorError::Signing("request uri has no host".to_owned()))?;
            insert(request, HOST, &host)?;
        }

        let mut signed = vec![DATE_HEADER, REQUEST_TARGET, HOST_HEADER];
        if matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH) {
            let length = request.body().len().to_string();
            let digest = STANDARD.encode(Sha256::digest(request.body().as_bytes()));
            insert(request, CONTENT_LENGTH, &length)?;
            if !request.headers().contains_key(CONTENT_TYPE) {
                insert(request, CONTENT_TYPE, DEFAULT_CONTENT_TYPE)?;
            }
            insert(
                request,
                HeaderName::from_static(CONTENT_SHA256_HEADER),
                &digest,
            )?;
            signed.extend([
                CONTENT_LENGTH_HEADER,
                CONTENT_TYPE_HEADER,
                CONTENT_SHA256_HEADER,
            ]);
        }

        let signing_string = signing_string(request, &signed)?;
        let mut signer = Signer::new(MessageDigest::sha256(), &self.key)?;
        signer.update(signing_string.as_bytes())?;
        let signature = STANDARD.encode(signer.sign_to_vec()?);

        let authorization = format!(
            r#"Signature version="1",keyId="{}",algorithm="rsa-sha256",headers="{}",signature="{signature}""#,
            self.key_id,
            signed.join(" ")
        );
        let mut value = HeaderValue::from_str(&authorization).map_err(http::Error::from)?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        debug!(headers = %signed.join(" "), "signed request with oci sigv1");
        Ok(())
    }
}

fn insert(request: &mut Request<String>, name: HeaderName, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value).map_err(http::Error::from)?;
    request.headers_mut().insert(name, value);
    Ok(())
}

pub(crate) fn signing_string(request: &Request<String>, headers: &[&str]) -> Result<String> {
    let lines = headers
        .iter()
        .map(|name| -> Result<String> {
            if *name == REQUEST_TARGET {
                let target = request
                    .uri()
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/");
                return Ok(format!(
                    "{REQUEST_TARGET}: {} {target}",
                    request.method().as_str().to_lowercase()
                ));
            }
            let value = request
                .headers()
                .get(*name)
                .ok_or_else(|| ConnectorError::Signing(format!("missing header {name}")))?
                .to_str()
                .map_err(|e| ConnectorError::Signing(format!("header {name}: {e}")))?;
            Ok(format!("{name}: {value}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(lines.join("\n"))
}

fn literal_or_file(value: &str) -> Result<String> {
    let path = Path::new(value);
    if path.is_file() {
        Ok(fs::read_to_string(path)?)
    } else {
        Ok(value.to_owned())
    }
}
