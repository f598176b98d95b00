// HTTP response carrier — status, headers, accumulated body, decoded object.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use crate::query::parse_content_type_like_header;

/// Text encoding of a response body, resolved from its headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Ascii,
    Latin1,
}

/// Mutable response state owned by a cycle. The body is append-only while
/// the transport streams chunks in; response processors may then decode it
/// into `object`.
#[derive(Debug, Default)]
pub struct Response {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    body: BytesMut,
    /// The value a response processor decodes from the body.
    pub object: Option<serde_json::Value>,
    /// Stamped when the transport task completes.
    pub timestamp: Option<DateTime<Utc>>,
    /// Caller-forced read encoding, overriding header resolution.
    text_read_encoding: Option<TextEncoding>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.body)
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status.map(|s| s.as_u16())
    }

    /// Case-insensitive header lookup.
    pub fn value_for_header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Force the encoding used by [`Response::text`].
    pub fn set_text_read_encoding(&mut self, encoding: TextEncoding) {
        self.text_read_encoding = Some(encoding);
    }

    /// Resolve the body's text encoding: the `charset` parameter of
    /// Content-Type if recognized, else ISO-8859-1 for `text/*` types with
    /// no charset (RFC 2616 3.7.1), else UTF-8.
    pub fn text_encoding(&self) -> TextEncoding {
        if let Some(forced) = self.text_read_encoding {
            return forced;
        }
        if let Some(content_type) = self.value_for_header("content-type") {
            let (kind, parameters) = parse_content_type_like_header(&content_type);
            if let Some(charset) = parameters.get("charset") {
                match charset.to_lowercase().as_str() {
                    "utf-8" | "utf8" => return TextEncoding::Utf8,
                    "us-ascii" | "ascii" => return TextEncoding::Ascii,
                    "iso-8859-1" | "latin1" | "latin-1" => return TextEncoding::Latin1,
                    _ => {}
                }
            } else if kind.is_some_and(|k| k.contains("text")) {
                return TextEncoding::Latin1;
            }
        }
        TextEncoding::Utf8
    }

    /// Decode the body as text with the resolved encoding. Computed on
    /// demand; the body may still be accumulating.
    pub fn text(&self) -> String {
        match self.text_encoding() {
            TextEncoding::Utf8 | TextEncoding::Ascii => {
                String::from_utf8_lossy(&self.body).into_owned()
            }
            TextEncoding::Latin1 => self.body.iter().map(|&b| b as char).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, CONTENT_TYPE};

    fn response_with_content_type(value: &str, body: &[u8]) -> Response {
        let mut response = Response::new();
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_str(value).unwrap());
        response.append_body(body);
        response
    }

    #[test]
    fn test_charset_from_header() {
        let response = response_with_content_type("text/html; charset=utf-8", b"ok");
        assert_eq!(response.text_encoding(), TextEncoding::Utf8);
    }

    #[test]
    fn test_text_type_defaults_to_latin1() {
        let response = response_with_content_type("text/html", &[0xE9]);
        assert_eq!(response.text_encoding(), TextEncoding::Latin1);
        assert_eq!(response.text(), "é");
    }

    #[test]
    fn test_unknown_type_defaults_to_utf8() {
        let response = response_with_content_type("application/octet-stream", b"abc");
        assert_eq!(response.text_encoding(), TextEncoding::Utf8);
        assert_eq!(response.text(), "abc");
    }

    #[test]
    fn test_forced_read_encoding_wins() {
        let mut response = response_with_content_type("text/html; charset=utf-8", &[0xE9]);
        response.set_text_read_encoding(TextEncoding::Latin1);
        assert_eq!(response.text(), "é");
    }

    #[test]
    fn test_body_append_only() {
        let mut response = Response::new();
        response.append_body(b"hello ");
        response.append_body(b"world");
        assert_eq!(response.body(), b"hello world");
    }
}
