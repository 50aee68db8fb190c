//! Event payload published for each indexable request.
//!
//! Only allow-listed headers and object user metadata leave the proxy; the
//! indexer never sees credentials or other request headers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::request::RequestDescriptor;

/// Headers exported regardless of prefix (compared lowercase).
pub const ALLOWED_HEADERS: &[&str] = &["content-type", "content-length", "x-project-name"];

/// Prefix of object user metadata headers (compared lowercase).
pub const META_OBJECT_PREFIX: &str = "x-object-meta-";

/// Message body sent to the indexer queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Request path, e.g. `/v1/acct/cont/obj`.
    pub uri: String,
    /// Request method, e.g. `PUT`.
    pub http_method: String,
    /// Filtered request headers, keyed in source casing.
    pub headers: BTreeMap<String, String>,
    /// RFC 3339 UTC timestamp of event creation.
    pub timestamp: String,
}

impl EventMessage {
    /// Build the event for `req`, stamped with the current time.
    pub fn from_request(req: &RequestDescriptor) -> Self {
        Self::from_request_at(req, Utc::now())
    }

    pub fn from_request_at(req: &RequestDescriptor, at: DateTime<Utc>) -> Self {
        Self {
            uri: req.path.clone(),
            http_method: req.method.clone(),
            headers: filter_headers(req.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    /// UTF-8 JSON encoding of the event.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Whether a header name may be exported to the indexer.
pub fn is_exported_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ALLOWED_HEADERS.contains(&lower.as_str()) || lower.starts_with(META_OBJECT_PREFIX)
}

/// Keep only allow-listed and `x-object-meta-` headers.
///
/// Key casing is preserved.  Applying the filter to its own output returns
/// the same map.
pub fn filter_headers<'a, I>(headers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .filter(|(name, _)| is_exported_header(name))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
