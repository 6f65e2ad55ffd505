//! Read-only views handed to policies and condition evaluators.

use std::sync::Arc;

use bytes::Bytes;
use url::form_urlencoded;

use crate::headers::Headers;
use crate::route::RouteMetadata;

/// The request as the chain currently sees it.
///
/// Earlier policies' modifications are already applied when a later policy
/// runs, so `path`, `headers` and `body` reflect the running state.
#[derive(Debug, Clone, Default)]
pub struct RequestView {
    pub route: Arc<RouteMetadata>,
    pub method: String,
    /// Path including the query string.
    pub path: String,
    pub authority: String,
    pub scheme: String,
    /// Regular headers; pseudo headers are lifted into the fields above.
    pub headers: Headers,
    /// Present only when the chain buffers the request body.
    pub body: Option<Bytes>,
    pub end_of_stream: bool,
}

impl RequestView {
    /// Path without the query string.
    pub fn path_only(&self) -> &str {
        split_path(&self.path).0
    }

    /// Raw query string (without `?`).
    pub fn query(&self) -> Option<&str> {
        split_path(&self.path).1
    }

    /// First raw (still percent-encoded) value of a query parameter.
    ///
    /// `key` is compared against the decoded parameter name, the same way
    /// `remove_query_param` matches.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        query_segments(self.query()?).find_map(|(k, segment)| {
            (k == key).then(|| segment.split_once('=').map_or("", |(_, v)| v))
        })
    }
}

/// The upstream response as the chain currently sees it.
#[derive(Debug, Clone, Default)]
pub struct ResponseView {
    pub route: Arc<RouteMetadata>,
    pub status: u16,
    pub headers: Headers,
    /// Present only when the chain buffers the response body.
    pub body: Option<Bytes>,
    pub end_of_stream: bool,
    pub request_method: String,
    pub request_path: String,
    pub request_headers: Headers,
}

/// Split `path?query` into its parts.
pub fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    }
}

/// Non-empty `&`-separated segments of a raw query, each paired with its
/// decoded key. Segments come back exactly as received.
pub fn query_segments(query: &str) -> impl Iterator<Item = (String, &str)> {
    query.split('&').filter(|s| !s.is_empty()).map(|segment| {
        let raw_key = segment.split_once('=').map_or(segment, |(k, _)| k);
        let key = form_urlencoded::parse(raw_key.as_bytes())
            .next()
            .map(|(k, _)| k.into_owned())
            .unwrap_or_default();
        (key, segment)
    })
}
