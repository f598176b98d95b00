// HTTP request carrier — URL, method, headers, body, and the pre-codec object.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use tracing::warn;

/// Mutable request state owned by a cycle. Request processors fill in the
/// body (and headers) from `object` before dispatch.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// The value a request processor serializes into the body.
    pub object: Option<serde_json::Value>,
    /// Stamped when the transport task is created.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Request {
    pub fn new(url: Url, method: Method) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            object: None,
            timestamp: None,
        }
    }

    /// Set a header, replacing any existing value. Invalid names/values are
    /// logged and skipped rather than corrupting the request.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!("ignoring invalid header {}: {}", name, value),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }
}
