//!
//! # Connector actions
//!
//! One templated request definition per operation a remote endpoint supports.
//!
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use derive_builder::Builder;
use fluvio_protocol::{Decoder, Encoder};
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};
use crate::template;

pub const PRE_PROCESS_PREFIX: &str = "connector.pre_process.";
pub const POST_PROCESS_PREFIX: &str = "connector.post_process.";

const DEFAULT_PROVIDER: &str = "default";

const BUILTIN_PRE_PROCESS: &[&str] = &[
    "cohere.embedding",
    "openai.embedding",
    "bedrock.embedding",
    "bedrock.multimodal_embedding",
    "default.embedding",
    "cohere.rerank",
    "bedrock.rerank",
    "default.rerank",
];

const BUILTIN_POST_PROCESS: &[&str] = &[
    "cohere.embedding",
    "openai.embedding",
    "bedrock.embedding",
    "bedrock_v2.embedding.float",
    "default.embedding",
    "cohere.rerank",
    "bedrock.rerank",
    "default.rerank",
    "bedrock.batch_job_arn",
];

/// url fragment identifying each provider with built-in process functions
const PROVIDER_HOSTS: &[(&str, &str)] = &[
    ("api.openai.com", "openai"),
    ("api.cohere.ai", "cohere"),
    ("api.cohere.com", "cohere"),
    ("bedrock-runtime", "bedrock"),
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encoder, Decoder)]
#[derive(Serialize, Deserialize)]
#[fluvio(encode_discriminant)]
#[repr(u8)]
#[serde(try_from = "String", into = "String")]
pub enum ActionType {
    #[default]
    Predict = 0,
    Execute = 1,
    BatchPredict = 2,
    CancelBatchPredict = 3,
    BatchPredictStatus = 4,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Predict => "PREDICT",
            Self::Execute => "EXECUTE",
            Self::BatchPredict => "BATCH_PREDICT",
            Self::CancelBatchPredict => "CANCEL_BATCH_PREDICT",
            Self::BatchPredictStatus => "BATCH_PREDICT_STATUS",
        }
    }
}

impl FromStr for ActionType {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PREDICT" => Ok(Self::Predict),
            "EXECUTE" => Ok(Self::Execute),
            "BATCH_PREDICT" => Ok(Self::BatchPredict),
            "CANCEL_BATCH_PREDICT" => Ok(Self::CancelBatchPredict),
            "BATCH_PREDICT_STATUS" => Ok(Self::BatchPredictStatus),
            _ => Err(ConnectorError::ActionNotFound(s.to_owned())),
        }
    }
}

impl TryFrom<String> for ActionType {
    type Error = ConnectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ActionType> for String {
    fn from(action: ActionType) -> Self {
        action.as_str().to_owned()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request template for one action type
#[derive(Debug, Default, Clone, PartialEq, Eq, Builder, Encoder, Decoder)]
#[derive(Serialize, Deserialize)]
#[builder(build_fn(private, name = "build_impl"))]
#[serde(try_from = "ActionDocument")]
pub struct ConnectorAction {
    pub action_type: ActionType,
    #[builder(setter(into))]
    pub method: String,
    #[builder(setter(into))]
    pub url: String,
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[builder(default, setter(strip_option, into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[builder(default, setter(strip_option, into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_process_function: Option<String>,
    #[builder(default, setter(strip_option, into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_process_function: Option<String>,
}

impl ConnectorActionBuilder {
    /// add a single header template
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let mut headers = self.headers.take().flatten().unwrap_or_default();
        headers.insert(name.into(), value.into());
        self.headers = Some(Some(headers));
        self
    }

    pub fn build(&self) -> Result<ConnectorAction> {
        self.build_impl().map_err(|e| match e {
            ConnectorActionBuilderError::UninitializedField(field) => missing_field(field),
            other => ConnectorError::config(format!("Missing required config option: {other}")),
        })
    }
}

fn missing_field(field: &str) -> ConnectorError {
    match field {
        "action_type" => ConnectorError::config("action type can't be null"),
        other => ConnectorError::config(format!("{other} can't be null")),
    }
}

/// persisted shape, every field optional so missing ones get a readable error
#[derive(Deserialize)]
struct ActionDocument {
    action_type: Option<ActionType>,
    method: Option<String>,
    url: Option<String>,
    headers: Option<BTreeMap<String, String>>,
    request_body: Option<String>,
    pre_process_function: Option<String>,
    post_process_function: Option<String>,
}

impl TryFrom<ActionDocument> for ConnectorAction {
    type Error = ConnectorError;

    fn try_from(doc: ActionDocument) -> Result<Self> {
        Ok(Self {
            action_type: doc.action_type.ok_or_else(|| missing_field("action_type"))?,
            method: doc.method.ok_or_else(|| missing_field("method"))?,
            url: doc.url.ok_or_else(|| missing_field("url"))?,
            headers: doc.headers,
            request_body: doc.request_body,
            pre_process_function: doc.pre_process_function,
            post_process_function: doc.post_process_function,
        })
    }
}

impl ConnectorAction {
    pub fn builder() -> ConnectorActionBuilder {
        ConnectorActionBuilder::default()
    }

    /// Check built-in process function names against the known set and against the
    /// provider the action url points at. Custom scripts are not inspected.
    pub fn validate_process_functions(&self, parameters: &BTreeMap<String, String>) -> Result<()> {
        let url = template::fill_parameters(&self.url, parameters);
        let provider = PROVIDER_HOSTS
            .iter()
            .find(|(host, _)| url.contains(host))
            .map(|(_, provider)| *provider);

        if let Some(function) = &self.pre_process_function {
            check_builtin(
                function,
                PRE_PROCESS_PREFIX,
                BUILTIN_PRE_PROCESS,
                "pre_process",
                provider,
            )?;
        }
        if let Some(function) = &self.post_process_function {
            check_builtin(
                function,
                POST_PROCESS_PREFIX,
                BUILTIN_POST_PROCESS,
                "post_process",
                provider,
            )?;
        }
        Ok(())
    }
}

fn check_builtin(
    function: &str,
    prefix: &str,
    known: &[&str],
    kind: &str,
    provider: Option<&str>,
) -> Result<()> {
    let Some(name) = function.trim().strip_prefix(prefix) else {
        return Ok(());
    };
    if !known.contains(&name) {
        return Err(ConnectorError::config(format!(
            "Unsupported {kind} function: {function}"
        )));
    }
    let Some(provider) = provider else {
        return Ok(());
    };
    // bedrock_v2.embedding.float belongs to bedrock
    let owner = name
        .split(['.', '_'])
        .next()
        .unwrap_or_default();
    if owner == provider || owner == DEFAULT_PROVIDER {
        Ok(())
    } else {
        Err(ConnectorError::config(format!(
            "LLM service is {provider}, so {kind} function should be for {provider} or default"
        )))
    }
}
