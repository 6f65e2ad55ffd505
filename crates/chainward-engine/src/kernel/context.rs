//! Per-request execution context.
//!
//! Built on the first phase of a request from the matched chain and the
//! request headers; owned by that request's stream and dropped with it.
//! Analytics and dynamic metadata accumulate across phases, later values
//! overwriting earlier ones per key.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use chainward_core::{
    AnalyticsMap, DynamicMetadata, Headers, ProcessingMode, RequestAction, RequestView,
    ResponseAction, ResponseView, RouteMetadata,
};

use crate::condition::ConditionEvaluator;

use super::chain::PolicyChain;
use super::executor::{self, ExecutionResult, RequestPhase, ResponsePhase};

pub struct ExecutionContext {
    chain: Arc<PolicyChain>,
    route: Arc<RouteMetadata>,
    request_id: String,

    request: RequestView,
    /// Request headers exactly as received, for analytics copies.
    raw_request_headers: Headers,
    response: Option<ResponseView>,
    raw_response_headers: Headers,

    /// Path at the start of the current request phase run.
    phase_start_path: String,

    analytics: AnalyticsMap,
    dynamic_metadata: DynamicMetadata,
    /// Header-derived request analytics, kept aside until a response phase asks for it.
    request_header_analytics: Option<Value>,

    mode_override: ProcessingMode,
}

impl ExecutionContext {
    /// `headers` is the full received header list, pseudo headers included.
    pub fn new(chain: Arc<PolicyChain>, route: RouteMetadata, headers: Headers, end_of_stream: bool) -> Self {
        let route = Arc::new(route);
        let mut request = RequestView {
            route: Arc::clone(&route),
            end_of_stream,
            ..RequestView::default()
        };
        let mut regular = Headers::new();
        for (name, value) in headers.iter() {
            match name {
                ":method" => request.method = value.to_string(),
                ":path" => request.path = value.to_string(),
                ":authority" => request.authority = value.to_string(),
                ":scheme" => request.scheme = value.to_string(),
                n if n.starts_with(':') => {}
                n => regular.append(n, value),
            }
        }
        if request.authority.is_empty() {
            if let Some(host) = regular.get("host") {
                request.authority = host.to_string();
            }
        }
        request.headers = regular.clone();

        let request_id = regular.get("x-request-id").unwrap_or_default().to_string();
        let mode_override = chain.mode();
        let analytics = route_analytics(&route);

        Self {
            chain,
            route,
            request_id,
            phase_start_path: request.path.clone(),
            request,
            raw_request_headers: regular,
            response: None,
            raw_response_headers: Headers::new(),
            analytics,
            dynamic_metadata: DynamicMetadata::new(),
            request_header_analytics: None,
            mode_override,
        }
    }

    pub fn chain(&self) -> &Arc<PolicyChain> {
        &self.chain
    }

    pub fn route(&self) -> &RouteMetadata {
        &self.route
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn request(&self) -> &RequestView {
        &self.request
    }

    pub fn response(&self) -> Option<&ResponseView> {
        self.response.as_ref()
    }

    pub fn raw_request_headers(&self) -> &Headers {
        &self.raw_request_headers
    }

    pub fn raw_response_headers(&self) -> &Headers {
        &self.raw_response_headers
    }

    pub fn phase_start_path(&self) -> &str {
        &self.phase_start_path
    }

    /// Phases the proxy should stream for this request.
    pub fn mode_override(&self) -> ProcessingMode {
        self.mode_override
    }

    pub fn set_request_body(&mut self, body: Bytes, end_of_stream: bool) {
        self.request.body = Some(body);
        self.request.end_of_stream = end_of_stream;
    }

    /// Build the response view from the received response headers.
    pub fn begin_response(&mut self, headers: Headers, end_of_stream: bool) {
        let mut view = ResponseView {
            route: Arc::clone(&self.route),
            end_of_stream,
            request_method: self.request.method.clone(),
            request_path: self.request.path.clone(),
            request_headers: self.request.headers.clone(),
            ..ResponseView::default()
        };
        let mut regular = Headers::new();
        for (name, value) in headers.iter() {
            match name {
                ":status" => view.status = value.parse().unwrap_or_default(),
                n if n.starts_with(':') => {}
                n => regular.append(n, value),
            }
        }
        view.headers = regular.clone();
        self.raw_response_headers = regular;
        self.response = Some(view);
    }

    pub fn set_response_body(&mut self, body: Bytes, end_of_stream: bool) {
        if let Some(view) = self.response.as_mut() {
            view.body = Some(body);
            view.end_of_stream = end_of_stream;
        }
    }

    pub fn execute_request(&mut self, evaluator: &dyn ConditionEvaluator) -> ExecutionResult<RequestAction> {
        self.phase_start_path = self.request.path.clone();
        let chain = Arc::clone(&self.chain);
        executor::execute::<RequestPhase>(&chain, &mut self.request, evaluator)
    }

    /// `None` when no response has been seen yet.
    pub fn execute_response(
        &mut self,
        evaluator: &dyn ConditionEvaluator,
    ) -> Option<ExecutionResult<ResponseAction>> {
        let chain = Arc::clone(&self.chain);
        let view = self.response.as_mut()?;
        Some(executor::execute::<ResponsePhase>(&chain, view, evaluator))
    }

    pub fn analytics(&self) -> &AnalyticsMap {
        &self.analytics
    }

    pub fn dynamic_metadata(&self) -> &DynamicMetadata {
        &self.dynamic_metadata
    }

    pub fn merge_analytics(&mut self, key: String, value: Value) {
        self.analytics.insert(key, value);
    }

    pub fn merge_dynamic_metadata(&mut self, namespace: &str, key: String, value: Value) {
        self.dynamic_metadata
            .entry(namespace.to_string())
            .or_default()
            .insert(key, value);
    }

    pub fn request_header_analytics(&self) -> Option<&Value> {
        self.request_header_analytics.as_ref()
    }

    pub fn set_request_header_analytics(&mut self, value: Value) {
        self.request_header_analytics = Some(value);
    }
}

fn route_analytics(route: &RouteMetadata) -> AnalyticsMap {
    let mut out = AnalyticsMap::new();
    let fields = [
        ("route_name", &route.route_name),
        ("api_id", &route.api_id),
        ("api_name", &route.api_name),
        ("api_version", &route.api_version),
        ("api_context", &route.api_context),
        ("operation_path", &route.operation_path),
    ];
    for (k, v) in fields {
        if !v.is_empty() {
            out.insert(k.to_string(), Value::String(v.clone()));
        }
    }
    out
}
