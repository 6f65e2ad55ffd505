//! Path rewrite and query-parameter editing on the running request path.

use url::form_urlencoded;

use chainward_core::view::{query_segments, split_path};
use chainward_core::UpstreamRequestModifications;

/// Apply one policy's path rewrite and query edits to `current`.
///
/// A rewrite without `?` keeps the current query string. Query edits run
/// after the rewrite: removals first, then additions in issue order.
pub fn apply_request_path(current: &str, m: &UpstreamRequestModifications) -> String {
    let mut path = match &m.path {
        Some(p) if p.contains('?') => p.clone(),
        Some(p) => match split_path(current).1 {
            Some(q) => format!("{p}?{q}"),
            None => p.clone(),
        },
        None => current.to_string(),
    };

    if !m.query_remove.is_empty() || !m.query_add.is_empty() {
        path = edit_query(&path, &m.query_remove, &m.query_add);
    }
    path
}

/// Untouched segments keep their original encoding; only added pairs are
/// form-encoded.
fn edit_query(path: &str, remove: &[String], add: &[(String, String)]) -> String {
    let (base, query) = split_path(path);

    let mut segments: Vec<String> = query
        .map(|q| {
            query_segments(q)
                .filter(|(k, _)| !remove.iter().any(|r| r == k))
                .map(|(_, segment)| segment.to_string())
                .collect()
        })
        .unwrap_or_default();
    segments.extend(add.iter().map(|(k, v)| {
        form_urlencoded::Serializer::new(String::new())
            .append_pair(k, v)
            .finish()
    }));

    if segments.is_empty() {
        return base.to_string();
    }
    format!("{base}?{}", segments.join("&"))
}
