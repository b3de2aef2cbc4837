//! CloudWatch Logs `PutLogEvents` request construction
//!
//! Wire shapes follow
//! <https://docs.aws.amazon.com/AmazonCloudWatchLogs/latest/APIReference/API_PutLogEvents.html>.
//!
//! The service limits a single call to 1,048,576 bytes (message bytes plus 26
//! per event), 10,000 events and a 24 hour span. [`AwsLogMessageBuilder`] does
//! not split batches to fit these; callers must keep batches within them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::signer::{AwsSigner, Credentials, HttpHeaders, SignRequest, V4AwsSigner};
use crate::error::{Error, Result};

pub const DEFAULT_SERVICE_NAME: &str = "logs";
pub const DEFAULT_TARGET: &str = "Logs_20140328.PutLogEvents";
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Regional endpoint for CloudWatch Logs
pub fn default_url(region_name: &str) -> String {
    format!("https://logs.{}.amazonaws.com/", region_name)
}

/// One log event in a `PutLogEvents` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub message: String,
    /// Milliseconds since the Unix epoch, UTC
    pub timestamp: i64,
}

/// Request body for `PutLogEvents`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutLogEventsRequest {
    pub log_group_name: String,
    pub log_stream_name: String,
    pub log_events: Vec<LogEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_token: Option<String>,
}

/// Which events of a batch the service refused
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedLogEventsInfo {
    #[serde(default)]
    pub expired_log_event_end_index: Option<i64>,
    #[serde(default)]
    pub too_new_log_event_start_index: Option<i64>,
    #[serde(default)]
    pub too_old_log_event_end_index: Option<i64>,
}

/// Response from `PutLogEvents`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutLogEventsResponse {
    #[serde(default)]
    pub next_sequence_token: Option<String>,
    #[serde(default)]
    pub rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

/// A message to ship, with its event time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub message: String,
    /// Milliseconds since the Unix epoch, UTC
    pub ts_ms: i64,
}

/// A fully formed HTTP request, ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Turns batches of [`LogMessage`]s into signed `PutLogEvents` posts.
#[derive(Debug)]
pub struct AwsLogMessageBuilder {
    log_group_name: String,
    log_stream_name: String,
    url: String,
    headers: HttpHeaders,
    signer: Option<V4AwsSigner>,
}

impl AwsLogMessageBuilder {
    /// Create a builder for one log stream.
    ///
    /// Posts are unsigned when `credentials` is `None` (useful for dry runs).
    pub fn new(
        log_group_name: &str,
        log_stream_name: &str,
        region_name: &str,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        if log_group_name.is_empty() {
            return Err(Error::Config("log group name must not be empty".to_string()));
        }
        if log_stream_name.is_empty() {
            return Err(Error::Config("log stream name must not be empty".to_string()));
        }

        let mut headers = HttpHeaders::new();
        headers.insert("X-Amz-Target".to_string(), vec![DEFAULT_TARGET.to_string()]);
        headers.insert(
            "Content-Type".to_string(),
            vec![DEFAULT_CONTENT_TYPE.to_string()],
        );

        Ok(Self {
            log_group_name: log_group_name.to_string(),
            log_stream_name: log_stream_name.to_string(),
            url: default_url(region_name),
            headers,
            signer: credentials
                .map(|c| V4AwsSigner::new(c, region_name, DEFAULT_SERVICE_NAME)),
        })
    }

    /// Send to `url` instead of the regional endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_signing(&self) -> bool {
        self.signer.is_some()
    }

    /// Build the posts for a batch; an empty batch produces none.
    pub fn feed(&self, messages: &[LogMessage]) -> Result<Vec<Post>> {
        self.feed_with_token(messages, None)
    }

    /// Like [`Self::feed`], carrying the previous response's sequence token.
    pub fn feed_with_token(
        &self,
        messages: &[LogMessage],
        sequence_token: Option<&str>,
    ) -> Result<Vec<Post>> {
        if messages.is_empty() {
            return Ok(vec![]);
        }

        let mut sorted: Vec<&LogMessage> = messages.iter().collect();
        sorted.sort_by_key(|m| m.ts_ms);

        let payload = PutLogEventsRequest {
            log_group_name: self.log_group_name.clone(),
            log_stream_name: self.log_stream_name.clone(),
            log_events: sorted
                .into_iter()
                .map(|m| LogEvent {
                    message: m.message.clone(),
                    timestamp: m.ts_ms,
                })
                .collect(),
            sequence_token: sequence_token.map(str::to_string),
        };
        let body = serde_json::to_vec(&payload)?;

        let mut sig_req = SignRequest {
            method: "POST".to_string(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            payload: body,
        };

        if let Some(signer) = &self.signer {
            let sig_headers = signer.sign_now(&sig_req, false)?;
            sig_req.headers.extend(sig_headers);
        }

        let mut headers = BTreeMap::new();
        for (k, mut vs) in sig_req.headers {
            if vs.len() != 1 {
                return Err(Error::Signing(format!(
                    "header {:?} must have exactly one value, got {}",
                    k,
                    vs.len()
                )));
            }
            headers.insert(k, vs.remove(0));
        }

        Ok(vec![Post {
            url: sig_req.url,
            headers,
            body: sig_req.payload,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(credentials: Option<Credentials>) -> AwsLogMessageBuilder {
        AwsLogMessageBuilder::new("omlish", "host-1", "us-west-1", credentials).unwrap()
    }

    fn msg(message: &str, ts_ms: i64) -> LogMessage {
        LogMessage {
            message: message.to_string(),
            ts_ms,
        }
    }

    fn parse_body(post: &Post) -> PutLogEventsRequest {
        serde_json::from_slice(&post.body).unwrap()
    }

    #[test]
    fn test_empty_batch_produces_no_posts() {
        assert!(builder(None).feed(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_events_sorted_by_timestamp() {
        let posts = builder(None)
            .feed(&[msg("c", 30), msg("a", 10), msg("b2", 20), msg("b1", 20)])
            .unwrap();
        assert_eq!(posts.len(), 1);

        let body = parse_body(&posts[0]);
        let ts: Vec<i64> = body.log_events.iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![10, 20, 20, 30]);
        // Stable: equal timestamps keep input order.
        assert_eq!(body.log_events[1].message, "b2");
        assert_eq!(body.log_events[2].message, "b1");
    }

    #[test]
    fn test_body_is_compact_camel_case_json() {
        let posts = builder(None).feed(&[msg("hello", 5)]).unwrap();
        let body = String::from_utf8(posts[0].body.clone()).unwrap();
        assert_eq!(
            body,
            r#"{"logGroupName":"omlish","logStreamName":"host-1","logEvents":[{"message":"hello","timestamp":5}]}"#
        );
        assert_eq!(posts[0].url, "https://logs.us-west-1.amazonaws.com/");
    }

    #[test]
    fn test_sequence_token_included_when_given() {
        let posts = builder(None)
            .feed_with_token(&[msg("x", 1)], Some("tok-1"))
            .unwrap();
        assert_eq!(parse_body(&posts[0]).sequence_token.as_deref(), Some("tok-1"));
    }

    #[test]
    fn test_unsigned_without_credentials() {
        let posts = builder(None).feed(&[msg("x", 1)]).unwrap();
        let headers = &posts[0].headers;
        assert_eq!(headers["X-Amz-Target"], DEFAULT_TARGET);
        assert_eq!(headers["Content-Type"], DEFAULT_CONTENT_TYPE);
        assert!(!headers.contains_key("Authorization"));
    }

    #[test]
    fn test_signed_with_credentials() {
        let b = builder(Some(Credentials::new("AKID", "secret")));
        assert!(b.is_signing());
        let posts = b.feed(&[msg("x", 1)]).unwrap();
        let headers = &posts[0].headers;
        let auth = &headers["Authorization"];
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKID/"));
        assert!(auth.contains("/us-west-1/logs/aws4_request"));
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-date;x-amz-target"));
        assert!(headers.contains_key("X-Amz-Date"));
    }

    #[test]
    fn test_rejects_empty_names() {
        assert!(AwsLogMessageBuilder::new("", "s", "us-west-1", None).is_err());
        assert!(AwsLogMessageBuilder::new("g", "", "us-west-1", None).is_err());
    }

    #[test]
    fn test_parse_response_with_rejections() {
        let resp: PutLogEventsResponse = serde_json::from_str(
            r#"{"nextSequenceToken":"49","rejectedLogEventsInfo":{"tooOldLogEventEndIndex":2}}"#,
        )
        .unwrap();
        assert_eq!(resp.next_sequence_token.as_deref(), Some("49"));
        assert_eq!(
            resp.rejected_log_events_info.unwrap().too_old_log_event_end_index,
            Some(2)
        );

        let empty: PutLogEventsResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, PutLogEventsResponse::default());
    }
}
