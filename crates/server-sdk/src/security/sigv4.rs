//! AWS Signature Version 4 for the connection query string.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE_NAME: &str = "gamelift";
const TERMINATION: &str = "aws4_request";
const SECRET_KEY_PREFIX: &str = "AWS4";
const DATE_FORMAT: &str = "%Y%m%d";
const DATE_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

pub const AUTHORIZATION_KEY: &str = "Authorization";
pub const AUTHORIZATION_VALUE: &str = "SigV4";
pub const AMZ_ALGORITHM_KEY: &str = "X-Amz-Algorithm";
pub const AMZ_CREDENTIAL_KEY: &str = "X-Amz-Credential";
pub const AMZ_DATE_KEY: &str = "X-Amz-Date";
pub const AMZ_SIGNATURE_KEY: &str = "X-Amz-Signature";
pub const AMZ_SECURITY_TOKEN_KEY: &str = "X-Amz-Security-Token";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("missing signing input: {0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct SigV4Parameters<'a> {
    pub region: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub session_token: &'a str,
    pub query_params: &'a BTreeMap<String, String>,
    pub request_time: DateTime<Utc>,
}

impl SigV4Parameters<'_> {
    fn validate(&self) -> Result<(), SigningError> {
        if self.region.is_empty() {
            return Err(SigningError::Missing("AwsRegion"));
        }
        if self.access_key.is_empty() {
            return Err(SigningError::Missing("AccessKey"));
        }
        if self.secret_key.is_empty() {
            return Err(SigningError::Missing("SecretKey"));
        }
        if self.query_params.is_empty() {
            return Err(SigningError::Missing("QueryParams"));
        }
        Ok(())
    }
}

/// Sign `params.query_params` and return the query parameters that carry
/// the signature.  Values are already URI-encoded.
pub fn sign_query(params: &SigV4Parameters<'_>) -> Result<BTreeMap<String, String>, SigningError> {
    params.validate()?;

    let date = params.request_time.format(DATE_FORMAT).to_string();
    let date_time = params.request_time.format(DATE_TIME_FORMAT).to_string();

    let canonical = canonical_query(params.query_params);
    let hashed_canonical = hex::encode(Sha256::digest(canonical.as_bytes()));

    let scope = format!("{date}/{}/{SERVICE_NAME}/{TERMINATION}", params.region);
    let string_to_sign = format!("{ALGORITHM}\n{date_time}\n{scope}\n{hashed_canonical}");
    let credential = format!("{}/{scope}", params.access_key);
    let signature = signature(params.secret_key, &date, params.region, &string_to_sign);

    let mut out = BTreeMap::new();
    out.insert(AUTHORIZATION_KEY.to_string(), AUTHORIZATION_VALUE.to_string());
    out.insert(AMZ_ALGORITHM_KEY.to_string(), ALGORITHM.to_string());
    out.insert(AMZ_CREDENTIAL_KEY.to_string(), uri_encode(&credential));
    out.insert(AMZ_DATE_KEY.to_string(), date_time);
    out.insert(AMZ_SIGNATURE_KEY.to_string(), uri_encode(&signature));
    if !params.session_token.is_empty() {
        out.insert(
            AMZ_SECURITY_TOKEN_KEY.to_string(),
            uri_encode(params.session_token),
        );
    }
    Ok(out)
}

fn canonical_query(query: &BTreeMap<String, String>) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac accepts any key length"),
    };
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn signature(secret_key: &str, date: &str, region: &str, string_to_sign: &str) -> String {
    let k_secret = format!("{SECRET_KEY_PREFIX}{secret_key}");
    let k_date = hmac(k_secret.as_bytes(), date);
    let k_region = hmac(&k_date, region);
    let k_service = hmac(&k_region, SERVICE_NAME);
    let k_signing = hmac(&k_service, TERMINATION);
    hex::encode(hmac(&k_signing, string_to_sign))
}

/// Percent-encode everything except unreserved characters.
pub fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
