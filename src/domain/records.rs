//! Cache entries and captured requests
//!
//! Both records are stored as JSON documents. Header maps follow the common
//! `name -> value | [values]` shape and bodies are kept as text whenever they
//! are valid UTF-8, falling back to base64 otherwise.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, Uri};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::identifiers::RequestId;

/// Cache identity: the request path and query exactly as received
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRef
))]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_uri(uri: &Uri) -> Self {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Self::new(path_and_query.to_string())
    }
}

/// A persisted header value; repeated headers collapse into a list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredHeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

impl StoredHeaderValue {
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let values: Vec<&str> = match self {
            Self::Single(value) => vec![value.as_str()],
            Self::Multiple(values) => values.iter().map(String::as_str).collect(),
        };
        values.into_iter()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredHeaders(BTreeMap<String, StoredHeaderValue>);

impl StoredHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let stored = headers
            .keys()
            .map(|name| {
                let mut values: Vec<String> = headers
                    .get_all(name)
                    .iter()
                    .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                    .collect();
                let value = if values.len() == 1 {
                    StoredHeaderValue::Single(values.remove(0))
                } else {
                    StoredHeaderValue::Multiple(values)
                };
                (name.as_str().to_string(), value)
            })
            .collect();
        Self(stored)
    }

    /// Rebuilds a header map, dropping names or values `http` refuses
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.0 {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            for value in value.values() {
                if let Ok(value) = HeaderValue::from_str(value) {
                    headers.append(name.clone(), value);
                }
            }
        }
        headers
    }

    pub fn get(&self, name: &str) -> Option<&StoredHeaderValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    #[default]
    Utf8,
    Base64,
}

/// Payload as stored; flattened into the owning record as `body` + `body_encoding`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBody {
    body: String,
    #[serde(default)]
    body_encoding: BodyEncoding,
}

impl StoredBody {
    pub fn encode(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self {
                body: text.to_string(),
                body_encoding: BodyEncoding::Utf8,
            },
            Err(_) => Self {
                body: STANDARD.encode(bytes),
                body_encoding: BodyEncoding::Base64,
            },
        }
    }

    pub fn decode(&self) -> Result<Bytes, base64::DecodeError> {
        match self.body_encoding {
            BodyEncoding::Utf8 => Ok(Bytes::from(self.body.clone())),
            BodyEncoding::Base64 => STANDARD.decode(&self.body).map(Bytes::from),
        }
    }

    pub fn encoding(&self) -> BodyEncoding {
        self.body_encoding
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }
}

/// A cached upstream response. Only ever created from a `200 OK`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: CacheKey,
    pub headers: StoredHeaders,
    #[serde(flatten)]
    pub body: StoredBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(url: CacheKey, headers: &HeaderMap, body: &[u8]) -> Self {
        Self {
            url,
            headers: StoredHeaders::from_header_map(headers),
            body: StoredBody::encode(body),
            cached_at: Some(Utc::now()),
        }
    }
}

/// Audit copy of a non-GET request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRequest {
    pub url: CacheKey,
    pub method: String,
    pub headers: StoredHeaders,
    #[serde(flatten)]
    pub body: StoredBody,
    pub request_id: RequestId,
    pub received_at: DateTime<Utc>,
}

impl StoredRequest {
    pub fn new(
        request_id: RequestId,
        url: CacheKey,
        method: &http::Method,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Self {
        Self {
            url,
            method: method.as_str().to_string(),
            headers: StoredHeaders::from_header_map(headers),
            body: StoredBody::encode(body),
            request_id,
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_TYPE, SET_COOKIE};

    #[test]
    fn cache_key_keeps_query_string() {
        let uri: Uri = "/api/widgets?x=1&y=2".parse().unwrap();
        assert_eq!(CacheKey::from_uri(&uri).as_ref(), "/api/widgets?x=1&y=2");
    }

    #[test]
    fn cache_key_of_absolute_uri_is_path_and_query() {
        let uri: Uri = "http://example.com/svc/x?q=1".parse().unwrap();
        assert_eq!(CacheKey::from_uri(&uri).as_ref(), "/svc/x?q=1");
    }

    #[test]
    fn repeated_headers_become_lists() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));

        let stored = StoredHeaders::from_header_map(&headers);
        assert_eq!(
            stored.get("content-type"),
            Some(&StoredHeaderValue::Single("text/plain".to_string()))
        );
        assert_eq!(
            stored.get("set-cookie"),
            Some(&StoredHeaderValue::Multiple(vec![
                "a=1".to_string(),
                "b=2".to_string()
            ]))
        );

        let rebuilt = stored.to_header_map();
        assert_eq!(rebuilt.get_all(SET_COOKIE).iter().count(), 2);
        assert_eq!(rebuilt.get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn header_documents_use_string_or_list_shape() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));

        let json = serde_json::to_value(StoredHeaders::from_header_map(&headers)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "content-type": "text/plain",
                "set-cookie": ["a=1", "b=2"]
            })
        );
    }

    #[test]
    fn text_bodies_are_stored_verbatim() {
        let body = StoredBody::encode(b"hello");
        assert_eq!(body.encoding(), BodyEncoding::Utf8);
        assert_eq!(body.as_str(), "hello");
        assert_eq!(body.decode().unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn binary_bodies_are_base64_encoded() {
        let raw = [0xff_u8, 0x00, 0xfe, 0x10];
        let body = StoredBody::encode(&raw);
        assert_eq!(body.encoding(), BodyEncoding::Base64);
        assert_eq!(body.decode().unwrap().as_ref(), &raw);
    }

    #[test]
    fn cache_entry_document_shape() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let entry = CacheEntry::new(CacheKey::new("/svc/x".to_string()), &headers, b"hello");

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["url"], "/svc/x");
        assert_eq!(json["body"], "hello");
        assert_eq!(json["body_encoding"], "utf8");
        assert_eq!(json["headers"]["content-type"], "text/plain");
    }

    #[test]
    fn documents_without_encoding_or_timestamp_still_parse() {
        let json = serde_json::json!({
            "url": "/legacy",
            "headers": { "content-type": "application/json" },
            "body": "{\"ok\":true}"
        });

        let entry: CacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(entry.url.as_ref(), "/legacy");
        assert_eq!(entry.body.encoding(), BodyEncoding::Utf8);
        assert!(entry.cached_at.is_none());
    }

    #[test]
    fn stored_request_records_method() {
        let request = StoredRequest::new(
            RequestId::generate(),
            CacheKey::new("/svc/echo".to_string()),
            &http::Method::POST,
            &HeaderMap::new(),
            b"payload",
        );
        assert_eq!(request.method, "POST");
        assert_eq!(request.body.as_str(), "payload");
    }
}
