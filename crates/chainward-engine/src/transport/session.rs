//! Per-stream ext_proc state machine.
//!
//! One `StreamSession` per proxy stream (one HTTP request). It owns the
//! request's execution context and answers each inbound message with
//! exactly one response. No I/O happens here; the gRPC service feeds it.
//!
//! Lifecycle:
//! - request headers: resolve route, build context, run the request chain
//!   (unless a request body is required and still to come). Unmatched
//!   routes get a skip-all mode override and every later message passes.
//! - bodies: chunks accumulate until end of stream, then the deferred
//!   chain runs once. Bodies the chain has no use for are never buffered.
//! - response headers / body: same shape for the response chain.
//! - an immediate response finishes the stream; anything after it, and any
//!   duplicate or out-of-order phase, is a protocol error.

use std::time::Instant;

use bytes::BytesMut;

use chainward_core::error::{ChainwardError, Result};
use chainward_core::{Headers, PhaseMode, ProcessingMode};

use crate::app_state::AppState;
use crate::kernel::{attributes, ExecutionContext, ExecutionResult, PhaseKind, PolicyOutcome, Translation};
use crate::proto::{
    self, processing_mode::BodySendMode, processing_mode::HeaderSendMode, processing_request,
    processing_response, BodyResponse, CommonResponse, HeaderMap, HeadersResponse, HttpBody,
    HttpHeaders, ProcessingRequest, ProcessingResponse, TrailersResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    RequestHeaders,
    RequestBody,
    RequestTrailers,
    ResponseHeaders,
    ResponseBody,
    ResponseTrailers,
}

impl StreamPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamPhase::RequestHeaders => "request_headers",
            StreamPhase::RequestBody => "request_body",
            StreamPhase::RequestTrailers => "request_trailers",
            StreamPhase::ResponseHeaders => "response_headers",
            StreamPhase::ResponseBody => "response_body",
            StreamPhase::ResponseTrailers => "response_trailers",
        }
    }

    fn of(req: &processing_request::Request) -> Self {
        use processing_request::Request as R;
        match req {
            R::RequestHeaders(_) => StreamPhase::RequestHeaders,
            R::RequestBody(_) => StreamPhase::RequestBody,
            R::RequestTrailers(_) => StreamPhase::RequestTrailers,
            R::ResponseHeaders(_) => StreamPhase::ResponseHeaders,
            R::ResponseBody(_) => StreamPhase::ResponseBody,
            R::ResponseTrailers(_) => StreamPhase::ResponseTrailers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Waiting for request headers.
    Start,
    /// Route matched; context live.
    Active,
    /// No chain for this route; everything passes.
    Passthrough,
    /// Immediate response sent.
    Finished,
}

#[derive(Debug, Default)]
struct Direction {
    headers_seen: bool,
    body_complete: bool,
    /// Chain has run for this direction.
    executed: bool,
    pending_body: BytesMut,
}

pub struct StreamSession {
    app: AppState,
    stage: Stage,
    ctx: Option<ExecutionContext>,
    request: Direction,
    response: Direction,
}

impl StreamSession {
    pub fn new(app: AppState) -> Self {
        Self {
            app,
            stage: Stage::Start,
            ctx: None,
            request: Direction::default(),
            response: Direction::default(),
        }
    }

    /// True once an immediate response has been sent.
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Finished
    }

    pub fn context(&self) -> Option<&ExecutionContext> {
        self.ctx.as_ref()
    }

    /// Body bytes held across both directions, waiting for end of stream.
    pub fn buffered_body_len(&self) -> usize {
        self.request.pending_body.len() + self.response.pending_body.len()
    }

    /// Answer one inbound message.
    pub fn handle(&mut self, mut req: ProcessingRequest) -> Result<ProcessingResponse> {
        let msg = req
            .request
            .take()
            .ok_or_else(|| ChainwardError::Protocol("processing request carries no phase".into()))?;
        let phase = StreamPhase::of(&msg);
        self.app.metrics().phase_messages.inc(&[("phase", phase.as_str())]);

        match self.stage {
            Stage::Finished => {
                return Err(ChainwardError::Protocol(format!(
                    "{} received after immediate response",
                    phase.as_str()
                )))
            }
            Stage::Passthrough => return Ok(continue_response(phase, None)),
            Stage::Start if phase != StreamPhase::RequestHeaders => {
                return Err(ChainwardError::Protocol(format!(
                    "{} received before request headers",
                    phase.as_str()
                )))
            }
            _ => {}
        }

        use processing_request::Request as R;
        match msg {
            R::RequestHeaders(h) => self.on_request_headers(&req, h),
            R::RequestBody(b) => self.on_request_body(b),
            R::ResponseHeaders(h) => self.on_response_headers(h),
            R::ResponseBody(b) => self.on_response_body(b),
            R::RequestTrailers(_) | R::ResponseTrailers(_) => Ok(continue_response(phase, None)),
        }
    }

    fn on_request_headers(&mut self, req: &ProcessingRequest, h: HttpHeaders) -> Result<ProcessingResponse> {
        if self.request.headers_seen {
            return Err(ChainwardError::Protocol("duplicate request headers".into()));
        }
        self.request.headers_seen = true;

        let namespace = self.app.route_metadata_namespace();
        let route = attributes::extract_route(req, namespace);
        let chain = route
            .as_ref()
            .and_then(|r| self.app.kernel().get_policy_chain_for_key(&r.route_name));
        let (Some(route), Some(chain)) = (route, chain) else {
            tracing::debug!("no policy chain for route; skipping all phases");
            self.app.metrics().unmatched_routes.inc(&[]);
            self.stage = Stage::Passthrough;
            return Ok(skip_all_response());
        };

        let headers = headers_from_proto(h.headers.as_ref());
        let ctx = ExecutionContext::new(chain, route, headers, h.end_of_stream);
        tracing::debug!(
            route = %ctx.route().route_name,
            request_id = %ctx.request_id(),
            policies = ctx.chain().len(),
            "stream bound to route"
        );
        let mode = to_proto_mode(ctx.mode_override());
        self.stage = Stage::Active;
        self.request.body_complete = h.end_of_stream;
        let ctx = self.ctx.insert(ctx);

        let runs_now = ctx.chain().mode().needs_request_phase()
            && (!ctx.chain().requires_request_body() || h.end_of_stream);
        let translation = if runs_now {
            self.request.executed = true;
            run_request(&self.app, ctx, PhaseKind::Headers)
        } else {
            self.app.translator().passthrough(ctx)
        };
        Ok(self.finish(StreamPhase::RequestHeaders, translation, Some(mode)))
    }

    fn on_request_body(&mut self, b: HttpBody) -> Result<ProcessingResponse> {
        if self.request.body_complete {
            return Err(ChainwardError::Protocol("request body after end of stream".into()));
        }
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| ChainwardError::Internal("active stream without context".into()))?;

        let wanted = !self.request.executed && ctx.chain().requires_request_body();
        if wanted {
            self.request.pending_body.extend_from_slice(&b.body);
        }
        if !b.end_of_stream {
            return Ok(continue_response(StreamPhase::RequestBody, None));
        }
        self.request.body_complete = true;

        let translation = if !wanted {
            self.app.translator().passthrough(ctx)
        } else {
            let body = std::mem::take(&mut self.request.pending_body).freeze();
            ctx.set_request_body(body, true);
            self.request.executed = true;
            run_request(&self.app, ctx, PhaseKind::Body)
        };
        Ok(self.finish(StreamPhase::RequestBody, translation, None))
    }

    fn on_response_headers(&mut self, h: HttpHeaders) -> Result<ProcessingResponse> {
        if self.response.headers_seen {
            return Err(ChainwardError::Protocol("duplicate response headers".into()));
        }
        self.response.headers_seen = true;
        self.response.body_complete = h.end_of_stream;

        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| ChainwardError::Internal("active stream without context".into()))?;
        ctx.begin_response(headers_from_proto(h.headers.as_ref()), h.end_of_stream);

        let runs_now = ctx.chain().mode().needs_response_phase()
            && (!ctx.chain().requires_response_body() || h.end_of_stream);
        let translation = if runs_now {
            self.response.executed = true;
            run_response(&self.app, ctx, PhaseKind::Headers)
        } else {
            self.app.translator().passthrough(ctx)
        };
        Ok(self.finish(StreamPhase::ResponseHeaders, translation, None))
    }

    fn on_response_body(&mut self, b: HttpBody) -> Result<ProcessingResponse> {
        if !self.response.headers_seen {
            return Err(ChainwardError::Protocol("response body before response headers".into()));
        }
        if self.response.body_complete {
            return Err(ChainwardError::Protocol("response body after end of stream".into()));
        }
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| ChainwardError::Internal("active stream without context".into()))?;

        let wanted = !self.response.executed && ctx.chain().requires_response_body();
        if wanted {
            self.response.pending_body.extend_from_slice(&b.body);
        }
        if !b.end_of_stream {
            return Ok(continue_response(StreamPhase::ResponseBody, None));
        }
        self.response.body_complete = true;

        let translation = if !wanted {
            self.app.translator().passthrough(ctx)
        } else {
            let body = std::mem::take(&mut self.response.pending_body).freeze();
            ctx.set_response_body(body, true);
            self.response.executed = true;
            run_response(&self.app, ctx, PhaseKind::Body)
        };
        Ok(self.finish(StreamPhase::ResponseBody, translation, None))
    }

    fn finish(
        &mut self,
        phase: StreamPhase,
        translation: Translation,
        mode_override: Option<proto::ProcessingMode>,
    ) -> ProcessingResponse {
        match translation {
            Translation::Immediate {
                response,
                dynamic_metadata,
            } => {
                self.stage = Stage::Finished;
                ProcessingResponse {
                    response: Some(processing_response::Response::ImmediateResponse(response)),
                    dynamic_metadata,
                    mode_override: None,
                }
            }
            Translation::Continue {
                response,
                dynamic_metadata,
            } => {
                let mut out = continue_response(phase, Some(response));
                out.dynamic_metadata = dynamic_metadata;
                out.mode_override = mode_override;
                out
            }
        }
    }
}

fn run_request(app: &AppState, ctx: &mut ExecutionContext, kind: PhaseKind) -> Translation {
    let started = Instant::now();
    let result = ctx.execute_request(app.evaluator());
    record(app, "request", &result, started);
    app.translator().translate_request(ctx, &result, kind)
}

fn run_response(app: &AppState, ctx: &mut ExecutionContext, kind: PhaseKind) -> Translation {
    let started = Instant::now();
    let Some(result) = ctx.execute_response(app.evaluator()) else {
        return app.translator().passthrough(ctx);
    };
    record(app, "response", &result, started);
    app.translator().translate_response(ctx, &result, kind)
}

fn record<A>(app: &AppState, phase: &str, result: &ExecutionResult<A>, started: Instant) {
    let m = app.metrics();
    m.chain_duration.observe(&[("phase", phase)], started.elapsed());
    for o in &result.outcomes {
        m.policy_outcomes
            .inc(&[("policy", o.name.as_str()), ("result", outcome_label(o))]);
    }
    if result.short_circuited {
        if let Some(last) = result.outcomes.last() {
            m.short_circuits.inc(&[("policy", last.name.as_str())]);
        }
    }
}

fn outcome_label<A>(o: &PolicyOutcome<A>) -> &'static str {
    if o.error.is_some() {
        "error"
    } else if o.skipped {
        "skipped"
    } else {
        "ok"
    }
}

/// Plain continue for `phase`, optionally carrying a mutation.
fn continue_response(phase: StreamPhase, common: Option<CommonResponse>) -> ProcessingResponse {
    use processing_response::Response as R;
    let response = match phase {
        StreamPhase::RequestHeaders => R::RequestHeaders(HeadersResponse { response: common }),
        StreamPhase::ResponseHeaders => R::ResponseHeaders(HeadersResponse { response: common }),
        StreamPhase::RequestBody => R::RequestBody(BodyResponse { response: common }),
        StreamPhase::ResponseBody => R::ResponseBody(BodyResponse { response: common }),
        StreamPhase::RequestTrailers => R::RequestTrailers(TrailersResponse::default()),
        StreamPhase::ResponseTrailers => R::ResponseTrailers(TrailersResponse::default()),
    };
    ProcessingResponse {
        response: Some(response),
        dynamic_metadata: None,
        mode_override: None,
    }
}

/// Continue with no mutation and tell the proxy to skip the rest of the stream.
pub fn skip_all_response() -> ProcessingResponse {
    let mut out = continue_response(StreamPhase::RequestHeaders, Some(CommonResponse::default()));
    out.mode_override = Some(to_proto_mode(ProcessingMode::SKIP_ALL));
    out
}

/// Proxy-side processing mode for a chain's aggregated mode.
///
/// Request headers are always sent (this message is the request headers).
/// Bodies are buffered when any policy wants them; trailers are never sent.
pub fn to_proto_mode(mode: ProcessingMode) -> proto::ProcessingMode {
    let body = |m: PhaseMode| match m {
        PhaseMode::Skip => BodySendMode::None,
        PhaseMode::Process | PhaseMode::Buffer => BodySendMode::Buffered,
    };
    let send_if = |on: bool| if on { HeaderSendMode::Send } else { HeaderSendMode::Skip };
    proto::ProcessingMode {
        request_header_mode: send_if(mode != ProcessingMode::SKIP_ALL) as i32,
        response_header_mode: send_if(mode.needs_response_phase()) as i32,
        request_body_mode: body(mode.request_body) as i32,
        response_body_mode: body(mode.response_body) as i32,
        request_trailer_mode: HeaderSendMode::Skip as i32,
        response_trailer_mode: HeaderSendMode::Skip as i32,
    }
}

/// Header list from the proxy. `raw_value` wins over `value` when set.
pub fn headers_from_proto(map: Option<&HeaderMap>) -> Headers {
    let mut out = Headers::new();
    let Some(map) = map else { return out };
    for h in &map.headers {
        let value = if h.raw_value.is_empty() {
            h.value.clone()
        } else {
            String::from_utf8_lossy(&h.raw_value).into_owned()
        };
        out.append(&h.key, value);
    }
    out
}
