//!
//! # Connector credentials
//!
//! Secrets are persisted encrypted. Decrypted values and the headers derived from
//! them live only in memory, they are never serialized and are dropped together
//! with the encrypted map.
//!
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::action::ActionType;
use crate::error::{ConnectorError, Result};
use crate::template;

/// Credential names understood by the aws_sigv4 protocol
pub const ACCESS_KEY_FIELD: &str = "access_key";
pub const SECRET_KEY_FIELD: &str = "secret_key";
pub const SESSION_TOKEN_FIELD: &str = "session_token";

/// External encrypt/decrypt collaborator, typically backed by a key management service.
///
/// Implementations may complete asynchronously, the connector awaits them and never
/// blocks.
#[async_trait]
pub trait CredentialCipher: Send + Sync {
    async fn encrypt(&self, plaintext: &str, tenant_id: Option<&str>) -> anyhow::Result<String>;

    async fn decrypt(&self, ciphertext: &str, tenant_id: Option<&str>) -> anyhow::Result<String>;
}

#[derive(Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
/// Wrapper for string that does not reveal its internal
/// content in its display and debug implementation
pub struct SecretString(String);

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl FromStr for SecretString {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.into()))
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for SecretString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for SecretString {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Encrypted credential map plus its transient decrypted view.
///
/// Equality only looks at the persisted (encrypted) map, the decrypted view is
/// runtime state.
#[derive(Debug, Default, Clone)]
pub struct CredentialStore {
    encrypted: Option<BTreeMap<String, String>>,
    decrypted: Option<BTreeMap<String, SecretString>>,
    decrypted_headers: Option<BTreeMap<String, SecretString>>,
    /// action the decrypted headers were derived for, `None` for connector level headers
    headers_action: Option<ActionType>,
}

impl PartialEq for CredentialStore {
    fn eq(&self, other: &Self) -> bool {
        self.encrypted == other.encrypted
    }
}

impl CredentialStore {
    pub fn new(credential: BTreeMap<String, String>) -> Self {
        Self {
            encrypted: Some(credential),
            ..Default::default()
        }
    }

    pub(crate) fn from_persisted(credential: Option<BTreeMap<String, String>>) -> Self {
        Self {
            encrypted: credential,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.encrypted.is_none()
    }

    /// persisted form, values are ciphertext once `encrypt` ran
    pub fn credential(&self) -> Option<&BTreeMap<String, String>> {
        self.encrypted.as_ref()
    }

    pub fn decrypted_credential(&self) -> Option<&BTreeMap<String, SecretString>> {
        self.decrypted.as_ref()
    }

    pub fn decrypted_headers(&self) -> Option<&BTreeMap<String, SecretString>> {
        self.decrypted_headers.as_ref()
    }

    /// `key` is present with a non blank value
    pub fn has_value(&self, key: &str) -> bool {
        self.encrypted
            .as_ref()
            .and_then(|credential| credential.get(key))
            .is_some_and(|value| !value.trim().is_empty())
    }

    /// Decrypted headers when they were derived for `action`
    pub fn decrypted_headers_for(
        &self,
        action: ActionType,
    ) -> Option<&BTreeMap<String, SecretString>> {
        if self.headers_action == Some(action) {
            self.decrypted_headers.as_ref()
        } else {
            None
        }
    }

    /// Encrypt every value. Nothing is replaced unless every value encrypts.
    pub async fn encrypt(
        &mut self,
        cipher: &dyn CredentialCipher,
        tenant_id: Option<&str>,
    ) -> Result<()> {
        let Some(credential) = self.encrypted.as_mut() else {
            return Ok(());
        };
        let mut encrypted = BTreeMap::new();
        for (key, value) in credential.iter() {
            let ciphertext = cipher
                .encrypt(value, tenant_id)
                .await
                .map_err(ConnectorError::Encryption)?;
            encrypted.insert(key.clone(), ciphertext);
        }
        debug!(secrets = encrypted.len(), "encrypted credential");
        *credential = encrypted;
        Ok(())
    }

    /// Decrypt every value and derive the decrypted headers from `header_templates`.
    ///
    /// The store is left untouched when any value fails to decrypt.
    pub async fn decrypt(
        &mut self,
        cipher: &dyn CredentialCipher,
        tenant_id: Option<&str>,
        header_templates: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        self.decrypt_for(cipher, tenant_id, None, header_templates)
            .await
    }

    /// Same as `decrypt`, remembering that the headers belong to `action`
    pub async fn decrypt_for(
        &mut self,
        cipher: &dyn CredentialCipher,
        tenant_id: Option<&str>,
        action: Option<ActionType>,
        header_templates: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        let Some(credential) = self.encrypted.as_ref() else {
            return Ok(());
        };
        let mut decrypted = BTreeMap::new();
        for (key, value) in credential {
            let plain = cipher
                .decrypt(value, tenant_id)
                .await
                .map_err(ConnectorError::Decryption)?;
            decrypted.insert(key.clone(), SecretString::from(plain));
        }
        debug!(secrets = decrypted.len(), "decrypted credential");

        self.decrypted_headers = header_templates.map(|headers| {
            headers
                .iter()
                .map(|(name, value)| {
                    let filled = template::fill_credentials(value, &decrypted);
                    (name.clone(), SecretString::from(filled))
                })
                .collect()
        });
        self.headers_action = action;
        self.decrypted = Some(decrypted);
        Ok(())
    }

    /// Replace the whole credential map with fresh plaintext secrets and encrypt them.
    /// Decrypted state belongs to the old secrets and is dropped.
    pub async fn replace(
        &mut self,
        credential: BTreeMap<String, String>,
        cipher: &dyn CredentialCipher,
        tenant_id: Option<&str>,
    ) -> Result<()> {
        let mut fresh = Self::new(credential);
        fresh.encrypt(cipher, tenant_id).await?;
        *self = fresh;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.encrypted = None;
        self.decrypted = None;
        self.decrypted_headers = None;
        self.headers_action = None;
    }
}

impl Serialize for CredentialStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.encrypted.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CredentialStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<BTreeMap<String, String>>::deserialize(deserializer).map(Self::from_persisted)
    }
}
