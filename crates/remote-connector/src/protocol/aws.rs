use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::Request;
use http::header::{HOST, HeaderValue};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::credential::{ACCESS_KEY_FIELD, SECRET_KEY_FIELD, SESSION_TOKEN_FIELD, SecretString};
use crate::error::{ConnectorError, Result};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const TERMINATOR: &str = "aws4_request";
const AMZ_DATE_HEADER: &str = "x-amz-date";
const SECURITY_TOKEN_HEADER: &str = "x-amz-security-token";
const CONTENT_SHA256_HEADER: &str = "x-amz-content-sha256";
/// header value asking the signer to fill in the payload hash
const CONTENT_SHA256_REQUIRED: &str = "required";

/// Decrypted AWS key pair, optionally temporary
#[derive(Debug, Clone)]
pub struct SigV4Credentials {
    access_key: SecretString,
    secret_key: SecretString,
    session_token: Option<SecretString>,
}

impl SigV4Credentials {
    pub fn new(
        access_key: SecretString,
        secret_key: SecretString,
        session_token: Option<SecretString>,
    ) -> Self {
        Self {
            access_key,
            secret_key,
            session_token,
        }
    }

    pub(crate) fn from_decrypted(
        credential: Option<&BTreeMap<String, SecretString>>,
    ) -> Result<Self> {
        let credential = credential
            .ok_or_else(|| ConnectorError::Signing("credential is not decrypted".to_owned()))?;
        let field = |name: &str| {
            credential
                .get(name)
                .cloned()
                .ok_or_else(|| ConnectorError::Signing(format!("missing {name}")))
        };
        Ok(Self::new(
            field(ACCESS_KEY_FIELD)?,
            field(SECRET_KEY_FIELD)?,
            credential.get(SESSION_TOKEN_FIELD).cloned(),
        ))
    }
}

/// Add `x-amz-date`, `host`, the optional security token and the `Authorization`
/// header computed over the request as it stands. An `x-amz-content-sha256: required`
/// header is replaced by the payload hash first.
pub(crate) fn sign(
    request: &mut Request<String>,
    credentials: &SigV4Credentials,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    if !request.headers().contains_key(HOST) {
        let host = request
            .uri()
            .authority()
            .map(|authority| authority.as_str().to_owned())
            .ok_or_else(|| ConnectorError::Signing("request uri has no host".to_owned()))?;
        let host = HeaderValue::from_str(&host).map_err(http::Error::from)?;
        request.headers_mut().insert(HOST, host);
    }
    let amz_date_value = HeaderValue::from_str(&amz_date).map_err(http::Error::from)?;
    request.headers_mut().insert(AMZ_DATE_HEADER, amz_date_value);
    if let Some(token) = &credentials.session_token {
        let mut token = HeaderValue::from_str(token).map_err(http::Error::from)?;
        token.set_sensitive(true);
        request.headers_mut().insert(SECURITY_TOKEN_HEADER, token);
    }

    let payload_hash = hex_sha256(request.body().as_bytes());
    let hash_requested = request
        .headers()
        .get(CONTENT_SHA256_HEADER)
        .is_some_and(|value| {
            value
                .as_bytes()
                .eq_ignore_ascii_case(CONTENT_SHA256_REQUIRED.as_bytes())
        });
    if hash_requested {
        let value = HeaderValue::from_str(&payload_hash).map_err(http::Error::from)?;
        request.headers_mut().insert(CONTENT_SHA256_HEADER, value);
    }

    let (canonical_headers, signed_headers) = canonical_headers(request)?;
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method().as_str(),
        canonical_uri(request.uri().path()),
        canonical_query(request.uri().query().unwrap_or_default()),
        canonical_headers,
        signed_headers,
        payload_hash
    );

    let scope = format!("{date}/{region}/{service}/{TERMINATOR}");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let mut key = hmac(format!("AWS4{}", &*credentials.secret_key).as_bytes(), &date)?;
    for part in [region, service, TERMINATOR] {
        key = hmac(&key, part)?;
    }
    let signature = hex::encode(hmac(&key, &string_to_sign)?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        &*credentials.access_key
    );
    let mut authorization = HeaderValue::from_str(&authorization).map_err(http::Error::from)?;
    authorization.set_sensitive(true);
    request
        .headers_mut()
        .insert(http::header::AUTHORIZATION, authorization);

    debug!(%region, %service, %signed_headers, "signed request with sigv4");
    Ok(())
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| ConnectorError::Signing(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(query: &str) -> String {
    let decode = |raw: &str| {
        urlencoding::decode(raw)
            .map(Cow::into_owned)
            .unwrap_or_else(|_| raw.to_owned())
    };
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                urlencoding::encode(&decode(key)).into_owned(),
                urlencoding::encode(&decode(value)).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// canonical header block (newline terminated lines) and the signed header list
fn canonical_headers(request: &Request<String>) -> Result<(String, String)> {
    let mut headers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in request.headers() {
        let value = value
            .to_str()
            .map_err(|e| ConnectorError::Signing(format!("header {name}: {e}")))?;
        headers
            .entry(name.as_str())
            .or_default()
            .push(value.split_whitespace().collect::<Vec<_>>().join(" "));
    }
    let canonical: String = headers
        .iter()
        .map(|(name, values)| format!("{name}:{}\n", values.join(",")))
        .collect();
    let signed = headers.keys().copied().collect::<Vec<_>>().join(";");
    Ok((canonical, signed))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn example_credentials(token: Option<&str>) -> SigV4Credentials {
        SigV4Credentials::new(
            SecretString::from("AKIDEXAMPLE".to_string()),
            SecretString::from("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string()),
            token.map(|t| SecretString::from(t.to_string())),
        )
    }

    fn example_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    #[test]
    fn test_get_vanilla() {
        let mut request = Request::builder()
            .method("GET")
            .uri("https://example.amazonaws.com/")
            .body(String::new())
            .expect("request");
        sign(
            &mut request,
            &example_credentials(None),
            "us-east-1",
            "service",
            example_time(),
        )
        .expect("sign");
        assert_eq!(
            request.headers()["authorization"],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, SignedHeaders=host;x-amz-date, Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
        assert_eq!(request.headers()["x-amz-date"], "20150830T123600Z");
        assert_eq!(request.headers()["host"], "example.amazonaws.com");
    }

    #[test]
    fn test_post_with_query_and_token() {
        let mut request = Request::builder()
            .method("POST")
            .uri("https://runtime.sagemaker.us-east-1.amazonaws.com/endpoints/my-model/invocations?b=2&a=1")
            .header("content-type", "application/json")
            .body(r#"{"inputs":"hello"}"#.to_string())
            .expect("request");
        sign(
            &mut request,
            &example_credentials(Some("session-token")),
            "us-east-1",
            "sagemaker",
            example_time(),
        )
        .expect("sign");
        assert_eq!(request.headers()["x-amz-security-token"], "session-token");
        assert_eq!(
            request.headers()["authorization"],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/sagemaker/aws4_request, SignedHeaders=content-type;host;x-amz-date;x-amz-security-token, Signature=48cc122e8acec34f0b06b2266af92b0e0ef2347f5de5183566345b34ada19ba5"
        );
    }

    #[test]
    fn test_required_content_sha256_is_filled() {
        let mut request = Request::builder()
            .method("POST")
            .uri("https://runtime.sagemaker.us-east-1.amazonaws.com/endpoints/my-model/invocations")
            .header("content-type", "application/json")
            .header("x-amz-content-sha256", "required")
            .body(r#"{"inputs":"hello"}"#.to_string())
            .expect("request");
        sign(
            &mut request,
            &example_credentials(None),
            "us-east-1",
            "sagemaker",
            example_time(),
        )
        .expect("sign");
        assert_eq!(
            request.headers()["x-amz-content-sha256"],
            "f501139a249d6c50826fb24ea29220a9e1c84e491842c0301984046984fb6155"
        );
        assert_eq!(
            request.headers()["authorization"],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/sagemaker/aws4_request, SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date, Signature=5bfd6e4bd0a613f4741eaad2fef6242f4af0ccdc1e80b2b26593f4431f240027"
        );
    }

    #[test]
    fn test_canonical_parts() {
        assert_eq!(canonical_uri(""), "/");
        assert_eq!(
            canonical_uri("/model/anthropic.claude-v2:1/invoke"),
            "/model/anthropic.claude-v2%3A1/invoke"
        );
        assert_eq!(canonical_query("b=2&a=x y&a=1"), "a=1&a=x%20y&b=2");
        assert_eq!(canonical_query(""), "");
    }

    #[test]
    fn test_missing_decrypted_credential() {
        let err = SigV4Credentials::from_decrypted(None).expect_err("not decrypted");
        assert_eq!(
            err.to_string(),
            "Failed to sign request: credential is not decrypted"
        );
    }
}
