//! Shared fixtures: spy policies, app construction and proto builders.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use prost_types::{value::Kind, Struct, Value as PbValue};

use chainward_core::error::Result;
use chainward_core::{
    Params, Policy, PolicySpec, ProcessingMode, RequestAction, RequestView, ResponseAction,
    ResponseView,
};
use chainward_engine::app_state::AppState;
use chainward_engine::config;
use chainward_engine::kernel::attributes::{EXT_PROC_ATTRIBUTES, ROUTE_METADATA_ATTR, ROUTE_NAME_ATTR};
use chainward_engine::kernel::{PolicyChain, PolicyRegistry};
use chainward_engine::proto::{
    processing_request, processing_response, CommonResponse, HeaderMap, HeaderValue, HttpBody,
    HttpHeaders, ProcessingRequest, ProcessingResponse,
};

type OnRequest = dyn Fn(&RequestView) -> Result<RequestAction> + Send + Sync;
type OnResponse = dyn Fn(&ResponseView) -> Result<ResponseAction> + Send + Sync;

/// Policy driven by closures that counts its invocations.
pub struct Spy {
    mode: ProcessingMode,
    on_request: Box<OnRequest>,
    on_response: Box<OnResponse>,
    pub request_calls: AtomicUsize,
    pub response_calls: AtomicUsize,
}

impl Spy {
    pub fn new(mode: ProcessingMode) -> Self {
        Self {
            mode,
            on_request: Box::new(|_| Ok(RequestAction::Continue)),
            on_response: Box::new(|_| Ok(ResponseAction::Continue)),
            request_calls: AtomicUsize::new(0),
            response_calls: AtomicUsize::new(0),
        }
    }

    pub fn request<F>(f: F) -> Self
    where
        F: Fn(&RequestView) -> Result<RequestAction> + Send + Sync + 'static,
    {
        let mut spy = Self::new(ProcessingMode::REQUEST_HEADERS);
        spy.on_request = Box::new(f);
        spy
    }

    pub fn response<F>(f: F) -> Self
    where
        F: Fn(&ResponseView) -> Result<ResponseAction> + Send + Sync + 'static,
    {
        let mut spy = Self::new(ProcessingMode::HEADERS_ONLY);
        spy.on_response = Box::new(f);
        spy
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_response<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResponseView) -> Result<ResponseAction> + Send + Sync + 'static,
    {
        self.on_response = Box::new(f);
        self
    }

    pub fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }

    pub fn response_calls(&self) -> usize {
        self.response_calls.load(Ordering::SeqCst)
    }
}

impl Policy for Spy {
    fn mode(&self) -> ProcessingMode {
        self.mode
    }

    fn on_request(&self, req: &RequestView, _params: &Params) -> Result<RequestAction> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        (self.on_request)(req)
    }

    fn on_response(&self, resp: &ResponseView, _params: &Params) -> Result<ResponseAction> {
        self.response_calls.fetch_add(1, Ordering::SeqCst);
        (self.on_response)(resp)
    }
}

pub fn spec(name: &str) -> PolicySpec {
    PolicySpec::new(name, "v1")
}

/// Chain from `(policy, name)` pairs, all enabled, no conditions.
pub fn chain(policies: Vec<(Arc<Spy>, &str)>) -> PolicyChain {
    let entries = policies
        .into_iter()
        .map(|(p, name)| (p as Arc<dyn Policy>, spec(name)))
        .collect();
    PolicyChain::new(entries).unwrap()
}

pub fn minimal_config() -> config::EngineConfig {
    config::load_from_str("version: 1\n").unwrap()
}

pub fn app() -> AppState {
    AppState::with_defaults(minimal_config()).unwrap()
}

pub fn app_with_policies(policies: PolicyRegistry) -> AppState {
    AppState::new(
        minimal_config(),
        policies,
        Arc::new(chainward_engine::condition::LiteralEvaluator),
    )
    .unwrap()
}

pub fn header_map(headers: &[(&str, &str)]) -> HeaderMap {
    HeaderMap {
        headers: headers
            .iter()
            .map(|(k, v)| HeaderValue {
                key: (*k).to_string(),
                value: String::new(),
                raw_value: v.as_bytes().to_vec(),
            })
            .collect(),
    }
}

fn string_value(s: &str) -> PbValue {
    PbValue {
        kind: Some(Kind::StringValue(s.to_string())),
    }
}

/// Route attributes as the proxy sends them, optionally with a metadata blob.
pub fn route_attributes(route: &str, metadata_blob: Option<&str>) -> HashMap<String, Struct> {
    let mut fields = std::collections::BTreeMap::new();
    fields.insert(ROUTE_NAME_ATTR.to_string(), string_value(route));
    if let Some(blob) = metadata_blob {
        fields.insert(ROUTE_METADATA_ATTR.to_string(), string_value(blob));
    }
    let mut attrs = HashMap::new();
    attrs.insert(EXT_PROC_ATTRIBUTES.to_string(), Struct { fields });
    attrs
}

/// Request-headers message for `route` with the usual pseudo headers.
pub fn request_headers(route: &str, path: &str, extra: &[(&str, &str)], eos: bool) -> ProcessingRequest {
    let mut headers = vec![
        (":method", "GET"),
        (":path", path),
        (":authority", "api.example.com"),
        (":scheme", "https"),
    ];
    headers.extend_from_slice(extra);
    ProcessingRequest {
        request: Some(processing_request::Request::RequestHeaders(HttpHeaders {
            headers: Some(header_map(&headers)),
            end_of_stream: eos,
        })),
        attributes: route_attributes(route, None),
        ..Default::default()
    }
}

pub fn request_body(body: &[u8], eos: bool) -> ProcessingRequest {
    ProcessingRequest {
        request: Some(processing_request::Request::RequestBody(HttpBody {
            body: body.to_vec(),
            end_of_stream: eos,
        })),
        ..Default::default()
    }
}

pub fn response_headers(status: &str, extra: &[(&str, &str)], eos: bool) -> ProcessingRequest {
    let mut headers = vec![(":status", status)];
    headers.extend_from_slice(extra);
    ProcessingRequest {
        request: Some(processing_request::Request::ResponseHeaders(HttpHeaders {
            headers: Some(header_map(&headers)),
            end_of_stream: eos,
        })),
        ..Default::default()
    }
}

pub fn response_body(body: &[u8], eos: bool) -> ProcessingRequest {
    ProcessingRequest {
        request: Some(processing_request::Request::ResponseBody(HttpBody {
            body: body.to_vec(),
            end_of_stream: eos,
        })),
        ..Default::default()
    }
}

/// The common response of a headers or body reply.
pub fn common(resp: &ProcessingResponse) -> &CommonResponse {
    use processing_response::Response as R;
    let c = match resp.response.as_ref().expect("response set") {
        R::RequestHeaders(h) | R::ResponseHeaders(h) => h.response.as_ref(),
        R::RequestBody(b) | R::ResponseBody(b) => b.response.as_ref(),
        other => panic!("not a headers/body response: {other:?}"),
    };
    c.expect("common response set")
}

/// Continue with no mutation and no metadata, for any phase.
pub fn is_plain_continue(resp: &ProcessingResponse) -> bool {
    use processing_response::Response as R;
    let untouched = |c: Option<&CommonResponse>| c.map_or(true, |c| *c == CommonResponse::default());
    let ok = match resp.response.as_ref() {
        Some(R::RequestHeaders(h)) | Some(R::ResponseHeaders(h)) => untouched(h.response.as_ref()),
        Some(R::RequestBody(b)) | Some(R::ResponseBody(b)) => untouched(b.response.as_ref()),
        Some(R::RequestTrailers(_)) | Some(R::ResponseTrailers(_)) => true,
        _ => false,
    };
    ok && resp.dynamic_metadata.is_none()
}

/// `(key, value, append_action)` for every set header, in order.
pub fn set_headers(c: &CommonResponse) -> Vec<(String, String, i32)> {
    c.header_mutation
        .as_ref()
        .map(|m| {
            m.set_headers
                .iter()
                .map(|o| {
                    let h = o.header.as_ref().unwrap();
                    (
                        h.key.clone(),
                        String::from_utf8(h.raw_value.clone()).unwrap(),
                        o.append_action,
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn removed_headers(c: &CommonResponse) -> Vec<String> {
    c.header_mutation
        .as_ref()
        .map(|m| m.remove_headers.clone())
        .unwrap_or_default()
}

/// Field of a namespace in the dynamic metadata struct.
pub fn metadata_field<'a>(resp: &'a ProcessingResponse, ns: &str, key: &str) -> Option<&'a PbValue> {
    let dm = resp.dynamic_metadata.as_ref()?;
    match dm.fields.get(ns)?.kind.as_ref()? {
        Kind::StructValue(s) => s.fields.get(key),
        _ => None,
    }
}

pub fn as_str(v: &PbValue) -> Option<&str> {
    match v.kind.as_ref()? {
        Kind::StringValue(s) => Some(s),
        _ => None,
    }
}

pub fn as_struct(v: &PbValue) -> Option<&Struct> {
    match v.kind.as_ref()? {
        Kind::StructValue(s) => Some(s),
        _ => None,
    }
}
