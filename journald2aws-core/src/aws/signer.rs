//! AWS Signature Version 4 request signing
//!
//! Implements the header-based SigV4 scheme described at
//! <https://docs.aws.amazon.com/IAM/latest/UserGuide/create-signed-request.html>
//! with no SDK involved: the signer only computes headers, it never sends
//! anything.
//!
//! Known simplifications:
//! - the query string is used as given, not re-sorted
//! - no session tokens and no chunked (streaming) payload signing

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header multimap: name to one or more values.
pub type HttpHeaders = BTreeMap<String, Vec<String>>;

const ISO8601: &str = "%Y%m%dT%H%M%SZ";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of the empty payload
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Header names that are never part of the signature.
const SIGNED_HEADERS_BLACKLIST: &[&str] = &["authorization", "expect", "user-agent", "x-amzn-trace-id"];

/// AWS access key pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Input to signing
#[derive(Debug, Clone, Default)]
pub struct SignRequest {
    pub method: String,
    pub url: String,
    pub headers: HttpHeaders,
    pub payload: Vec<u8>,
}

/// Something that can produce authentication headers for a request.
pub trait AwsSigner: Send + Sync {
    /// Headers to merge into `req`, computed as of `now`.
    fn sign(&self, req: &SignRequest, sign_payload: bool, now: DateTime<Utc>) -> Result<HttpHeaders>;

    /// [`AwsSigner::sign`] against the wall clock.
    fn sign_now(&self, req: &SignRequest, sign_payload: bool) -> Result<HttpHeaders> {
        self.sign(req, sign_payload, Utc::now())
    }
}

/// Signature Version 4 signer bound to one region and service
#[derive(Debug, Clone)]
pub struct V4AwsSigner {
    creds: Credentials,
    region_name: String,
    service_name: String,
}

impl V4AwsSigner {
    pub fn new(
        creds: Credentials,
        region_name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            creds,
            region_name: region_name.into(),
            service_name: service_name.into(),
        }
    }

    pub fn region_name(&self) -> &str {
        &self.region_name
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl AwsSigner for V4AwsSigner {
    fn sign(&self, req: &SignRequest, sign_payload: bool, now: DateTime<Utc>) -> Result<HttpHeaders> {
        validate_request(req)?;

        let req_dt = now.format(ISO8601).to_string();
        let req_date = &req_dt[..8];

        let url = Url::parse(&req.url)
            .map_err(|e| Error::Signing(format!("invalid url {:?}: {}", req.url, e)))?;
        let canon_uri = url.path();
        let canon_qs = url.query().unwrap_or("");

        let mut headers_to_sign: HttpHeaders = lower_case_http_map(&req.headers)
            .into_iter()
            .filter(|(k, _)| !SIGNED_HEADERS_BLACKLIST.contains(&k.as_str()))
            .collect();

        if !headers_to_sign.contains_key("host") {
            headers_to_sign.insert("host".to_string(), vec![host_from_url(&url)?]);
        }

        headers_to_sign.insert("x-amz-date".to_string(), vec![req_dt.clone()]);

        let hashed_payload = if req.payload.is_empty() {
            EMPTY_SHA256.to_string()
        } else {
            sha256_hex(&req.payload)
        };
        if sign_payload {
            headers_to_sign.insert("x-amz-content-sha256".to_string(), vec![hashed_payload.clone()]);
        }

        // BTreeMap iteration is already sorted by name.
        let canon_headers: String = headers_to_sign
            .iter()
            .map(|(k, vs)| format!("{}:{}\n", k, vs.join(",")))
            .collect();
        let signed_headers = headers_to_sign
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(";");

        let canon_req = [
            req.method.as_str(),
            canon_uri,
            canon_qs,
            canon_headers.as_str(),
            signed_headers.as_str(),
            hashed_payload.as_str(),
        ]
        .join("\n");

        let scope_parts = [
            req_date,
            self.region_name.as_str(),
            self.service_name.as_str(),
            "aws4_request",
        ];
        let scope = scope_parts.join("/");
        let hashed_canon_req = sha256_hex(canon_req.as_bytes());
        let string_to_sign = [
            ALGORITHM,
            req_dt.as_str(),
            scope.as_str(),
            hashed_canon_req.as_str(),
        ]
        .join("\n");

        let key_date = hmac_sha256(
            format!("AWS4{}", self.creds.secret_access_key).as_bytes(),
            req_date.as_bytes(),
        )?;
        let key_region = hmac_sha256(&key_date, self.region_name.as_bytes())?;
        let key_service = hmac_sha256(&key_region, self.service_name.as_bytes())?;
        let key_signing = hmac_sha256(&key_service, b"aws4_request")?;
        let signature = hex::encode(hmac_sha256(&key_signing, string_to_sign.as_bytes())?);

        let auth = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.creds.access_key_id, scope, signed_headers, signature
        );

        let mut out = HttpHeaders::new();
        out.insert("Authorization".to_string(), vec![auth]);
        out.insert("X-Amz-Date".to_string(), vec![req_dt]);
        if sign_payload {
            out.insert("X-Amz-Content-SHA256".to_string(), vec![hashed_payload]);
        }
        Ok(out)
    }
}

fn validate_request(req: &SignRequest) -> Result<()> {
    if req.method.is_empty() {
        return Err(Error::Signing("method must not be empty".to_string()));
    }
    if req.method.to_uppercase() != req.method {
        return Err(Error::Signing(format!("method must be upper case: {:?}", req.method)));
    }
    for (k, vs) in &req.headers {
        if k.trim() != k {
            return Err(Error::Signing(format!("header name has surrounding whitespace: {:?}", k)));
        }
        for v in vs {
            if v.trim() != v {
                return Err(Error::Signing(format!(
                    "header {:?} value has surrounding whitespace: {:?}",
                    k, v
                )));
            }
        }
    }
    Ok(())
}

/// Host header value for `url`; default ports are omitted.
fn host_from_url(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::Signing(format!("url has no host: {}", url)))?;
    // `Url::port` is None when the port is the scheme default.
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn lower_case_http_map(headers: &HttpHeaders) -> HttpHeaders {
    let mut out = HttpHeaders::new();
    for (k, vs) in headers {
        out.entry(k.to_lowercase()).or_default().extend(vs.iter().cloned());
    }
    out
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Signing(format!("invalid hmac key: {}", e)))?;
    mac.update(msg);
    Ok(mac.finalize().into_bytes().to_vec())
}
