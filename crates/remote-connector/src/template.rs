//!
//! # Payload templates
//!
//! Connector urls, headers and request bodies are plain strings carrying
//! `${parameters.<key>}` and `${credential.<key>}` placeholders. A placeholder may
//! name a fallback with `${parameters.<key>:-<default>}`.
//!
use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::credential::SecretString;
use crate::error::{ConnectorError, Result};

const PARAMETERS_SOURCE: &str = "parameters";
const CREDENTIAL_SOURCE: &str = "credential";
const NULL_DEFAULT: &str = "null";

/// internal parameter asking the remote endpoint for a streamed answer
pub const STREAM_PARAMETER: &str = "stream";
/// internal parameter naming the llm interface the payload was written for
pub const LLM_INTERFACE_PARAMETER: &str = "_llm_interface";

pub const DEFAULT_STREAM_INTERFACE: &str = "openai/v1/chat/completions";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"("?)\$\{(parameters|credential)\.([^}:]+)(?::-([^}]*))?\}("?)"#)
        .expect("placeholder pattern is valid")
});

/// Fill every recognized placeholder of `template` in a single left-to-right pass.
///
/// Substituted values are inserted verbatim and never interpolated again. Placeholders
/// whose key is absent and which carry no default are left in place, `validate_payload`
/// reports them.
pub fn fill(
    template: &str,
    parameters: &BTreeMap<String, String>,
    credentials: &BTreeMap<String, SecretString>,
) -> String {
    Substitutor {
        parameters: Some(parameters),
        credentials: Some(credentials),
    }
    .replace(template)
}

/// Fill only `${credential.*}` placeholders, parameter placeholders (defaults included)
/// are kept for a later pass with the runtime parameters.
pub(crate) fn fill_credentials(
    template: &str,
    credentials: &BTreeMap<String, SecretString>,
) -> String {
    Substitutor {
        parameters: None,
        credentials: Some(credentials),
    }
    .replace(template)
}

/// Fill only `${parameters.*}` placeholders.
pub(crate) fn fill_parameters(template: &str, parameters: &BTreeMap<String, String>) -> String {
    Substitutor {
        parameters: Some(parameters),
        credentials: None,
    }
    .replace(template)
}

struct Substitutor<'a> {
    parameters: Option<&'a BTreeMap<String, String>>,
    credentials: Option<&'a BTreeMap<String, SecretString>>,
}

impl Substitutor<'_> {
    fn replace(&self, template: &str) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| self.resolve(caps))
            .into_owned()
    }

    fn resolve(&self, caps: &Captures) -> String {
        let whole = &caps[0];
        let (open, close) = (&caps[1], &caps[5]);
        let key = &caps[3];
        let found = match &caps[2] {
            PARAMETERS_SOURCE => match self.parameters {
                Some(parameters) => parameters.get(key).map(|v| v.as_str()),
                None => return whole.to_owned(),
            },
            CREDENTIAL_SOURCE => match self.credentials {
                Some(credentials) => credentials.get(key).map(|v| &**v),
                None => return whole.to_owned(),
            },
            _ => None,
        };
        match (found, caps.get(4).map(|m| m.as_str())) {
            (Some(value), _) => format!("{open}{value}{close}"),
            // a quoted null default stands for a json null, not the string "null"
            (None, Some(NULL_DEFAULT)) if !open.is_empty() && !close.is_empty() => {
                NULL_DEFAULT.to_owned()
            }
            (None, Some(default)) => format!("{open}{default}{close}"),
            (None, None) => whole.to_owned(),
        }
    }
}

/// First placeholder still present in `text`, reported by key
pub fn unfilled_placeholder(text: &str) -> Option<String> {
    PLACEHOLDER.captures(text).map(|caps| caps[3].to_owned())
}

/// Check that a filled payload is complete and syntactically valid json
pub fn validate_payload(payload: &str) -> Result<()> {
    if let Some(key) = unfilled_placeholder(payload) {
        return Err(ConnectorError::UnfilledPlaceholder(key));
    }
    if serde_json::from_str::<Value>(payload).is_err() {
        return Err(ConnectorError::InvalidPayload(payload.to_owned()));
    }
    Ok(())
}

/// LLM interfaces whose payloads accept a top level `"stream": true`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamInterfaces(Vec<String>);

impl Default for StreamInterfaces {
    fn default() -> Self {
        Self(vec![DEFAULT_STREAM_INTERFACE.to_owned()])
    }
}

impl StreamInterfaces {
    pub fn new<I, S>(interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(interfaces.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, interface: &str) -> bool {
        let interface = interface.trim();
        self.0.iter().any(|known| known.eq_ignore_ascii_case(interface))
    }

    /// Add `"stream": true` to a json object payload when the parameters request
    /// streaming for an allowlisted interface. Anything else is returned untouched.
    pub fn apply(&self, payload: String, parameters: &BTreeMap<String, String>) -> String {
        let streaming = parameters
            .get(STREAM_PARAMETER)
            .is_some_and(|flag| flag == "true");
        if !streaming {
            return payload;
        }
        let Some(interface) = parameters.get(LLM_INTERFACE_PARAMETER) else {
            return payload;
        };
        if !self.contains(interface) {
            debug!(%interface, "stream flag ignored for interface");
            return payload;
        }
        match serde_json::from_str::<Value>(&payload) {
            Ok(Value::Object(mut object)) => {
                object.insert(STREAM_PARAMETER.to_owned(), Value::Bool(true));
                Value::Object(object).to_string()
            }
            _ => payload,
        }
    }
}
