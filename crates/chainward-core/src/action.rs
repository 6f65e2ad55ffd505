//! Actions returned by policies.
//!
//! Each phase has its own closed set of variants: continue untouched, modify
//! the exchange, or answer the client directly. The translator matches on
//! these exhaustively; there is no other way for a policy to influence the
//! proxy.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::headers::HeaderOp;

/// Flat analytics key/value map.
pub type AnalyticsMap = Map<String, Value>;

/// Namespace -> flat key/value map.
pub type DynamicMetadata = BTreeMap<String, Map<String, Value>>;

/// Filter deciding which raw headers are copied into analytics output.
///
/// `mode` is kept as the policy supplied it; the translator interprets
/// `"allow"` and `"deny"` and passes everything through for anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsHeaderFilter {
    pub mode: String,
    pub headers: Vec<String>,
}

impl AnalyticsHeaderFilter {
    pub fn allow<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: "allow".into(),
            headers: headers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn deny<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: "deny".into(),
            headers: headers.into_iter().map(Into::into).collect(),
        }
    }
}

/// Modifications to the request before it goes upstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamRequestModifications {
    /// Header operations in the order the policy issued them.
    pub header_ops: Vec<HeaderOp>,
    /// Replacement body.
    pub body: Option<Bytes>,
    /// New path; keeps the current query string unless it carries its own.
    pub path: Option<String>,
    pub query_add: Vec<(String, String)>,
    pub query_remove: Vec<String>,
    pub analytics: AnalyticsMap,
    pub dynamic_metadata: DynamicMetadata,
    pub analytics_header_filter: Option<AnalyticsHeaderFilter>,
}

impl UpstreamRequestModifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.header_ops.push(HeaderOp::set(name, value));
        self
    }

    pub fn append_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.header_ops.push(HeaderOp::append(name, value));
        self
    }

    pub fn remove_header(mut self, name: &str) -> Self {
        self.header_ops.push(HeaderOp::remove(name));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn rewrite_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn add_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_add.push((key.into(), value.into()));
        self
    }

    pub fn remove_query_param(mut self, key: impl Into<String>) -> Self {
        self.query_remove.push(key.into());
        self
    }

    pub fn analytics(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.analytics.insert(key.into(), value.into());
        self
    }

    pub fn dynamic_metadata(
        mut self,
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.dynamic_metadata
            .entry(namespace.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    pub fn analytics_header_filter(mut self, filter: AnalyticsHeaderFilter) -> Self {
        self.analytics_header_filter = Some(filter);
        self
    }
}

/// Modifications to the response before it goes back downstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownstreamResponseModifications {
    pub header_ops: Vec<HeaderOp>,
    pub body: Option<Bytes>,
    /// Replacement status code.
    pub status: Option<u16>,
    pub analytics: AnalyticsMap,
    pub dynamic_metadata: DynamicMetadata,
    pub analytics_header_filter: Option<AnalyticsHeaderFilter>,
}

impl DownstreamResponseModifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.header_ops.push(HeaderOp::set(name, value));
        self
    }

    pub fn append_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.header_ops.push(HeaderOp::append(name, value));
        self
    }

    pub fn remove_header(mut self, name: &str) -> Self {
        self.header_ops.push(HeaderOp::remove(name));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn analytics(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.analytics.insert(key.into(), value.into());
        self
    }

    pub fn dynamic_metadata(
        mut self,
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.dynamic_metadata
            .entry(namespace.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    pub fn analytics_header_filter(mut self, filter: AnalyticsHeaderFilter) -> Self {
        self.analytics_header_filter = Some(filter);
        self
    }
}

/// A response sent straight to the client. Ends the chain and every later phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImmediateResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub analytics: AnalyticsMap,
    pub dynamic_metadata: DynamicMetadata,
}

impl ImmediateResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn analytics(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.analytics.insert(key.into(), value.into());
        self
    }

    pub fn dynamic_metadata(
        mut self,
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.dynamic_metadata
            .entry(namespace.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

/// Result of a request-phase policy invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestAction {
    #[default]
    Continue,
    Modify(UpstreamRequestModifications),
    Respond(ImmediateResponse),
}

/// Result of a response-phase policy invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseAction {
    #[default]
    Continue,
    Modify(DownstreamResponseModifications),
    Respond(ImmediateResponse),
}

impl RequestAction {
    pub fn immediate_response(&self) -> Option<&ImmediateResponse> {
        match self {
            RequestAction::Respond(r) => Some(r),
            _ => None,
        }
    }
}

impl ResponseAction {
    pub fn immediate_response(&self) -> Option<&ImmediateResponse> {
        match self {
            ResponseAction::Respond(r) => Some(r),
            _ => None,
        }
    }
}
