//! Action translator.
//!
//! Turns an execution result into the single mutation the proxy applies:
//! headers merged in chain order, last body wins with an authoritative
//! `content-length`, the effective path surfaced as `:path` plus metadata,
//! and analytics/dynamic metadata folded into the context and emitted as
//! one namespaced struct. Immediate responses bypass the merge.
//!
//! Skipped and errored outcomes are excluded the same way in both
//! directions.

pub mod headers;
pub mod metadata;
pub mod path;

use chainward_core::{
    AnalyticsHeaderFilter, AnalyticsMap, DynamicMetadata, HeaderOp, ImmediateResponse,
    RequestAction, ResponseAction,
};

use crate::proto::{
    body_mutation, common_response::ResponseStatus, BodyMutation, CommonResponse, HttpStatus,
};
use crate::proto;

use self::headers::{merge_header_ops, to_header_mutation, with_content_length, MergedHeader};
use self::metadata::{
    build_dynamic_metadata, filtered_headers, ANALYTICS_DATA_KEY, PATH_KEY, REQUEST_HEADERS_KEY,
    RESPONSE_HEADERS_KEY,
};
use super::context::ExecutionContext;
use super::executor::ExecutionResult;

/// Which message of a direction is being answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Headers,
    Body,
}

/// Translated result for one phase.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Continue {
        response: CommonResponse,
        dynamic_metadata: Option<prost_types::Struct>,
    },
    Immediate {
        response: proto::ImmediateResponse,
        dynamic_metadata: Option<prost_types::Struct>,
    },
}

impl Translation {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Translation::Immediate { .. })
    }
}

/// Per-policy contributions shared by both directions.
struct Contributions<'a> {
    header_ops: Vec<&'a HeaderOp>,
    body: Option<&'a bytes::Bytes>,
    header_filter: Option<&'a AnalyticsHeaderFilter>,
}

pub struct Translator {
    engine_namespace: String,
}

impl Translator {
    pub fn new(engine_namespace: impl Into<String>) -> Self {
        Self {
            engine_namespace: engine_namespace.into(),
        }
    }

    pub fn engine_namespace(&self) -> &str {
        &self.engine_namespace
    }

    pub fn translate_request(
        &self,
        ctx: &mut ExecutionContext,
        result: &ExecutionResult<RequestAction>,
        phase: PhaseKind,
    ) -> Translation {
        let mut c = Contributions {
            header_ops: Vec::new(),
            body: None,
            header_filter: None,
        };
        for (outcome, action) in result.effective_actions() {
            match action {
                RequestAction::Continue | RequestAction::Respond(_) => {}
                RequestAction::Modify(m) => {
                    c.header_ops.extend(m.header_ops.iter());
                    if m.body.is_some() {
                        c.body = m.body.as_ref();
                    }
                    if m.analytics_header_filter.is_some() {
                        c.header_filter = m.analytics_header_filter.as_ref();
                    }
                    self.fold_metadata(ctx, &outcome.name, &m.analytics, &m.dynamic_metadata);
                }
            }
        }

        let mut analytics = ctx.analytics().clone();
        if let Some(filter) = c.header_filter {
            let copied = filtered_headers(ctx.raw_request_headers(), filter);
            ctx.set_request_header_analytics(copied.clone());
            analytics.insert(REQUEST_HEADERS_KEY.into(), copied);
        }

        let effective_path = ctx.request().path.clone();
        if let Some(RequestAction::Respond(immediate)) = result.final_action.as_ref() {
            return self.immediate(ctx, immediate, analytics, effective_path);
        }

        let mut merged = merge_header_ops(c.header_ops.iter().copied());
        if effective_path != ctx.phase_start_path() {
            merged.retain(|h| h.name() != ":path");
            merged.push(MergedHeader::Overwrite {
                name: ":path".into(),
                value: effective_path.clone(),
            });
        }

        let response = common_response(merged, c.body, phase);
        let dynamic_metadata = build_dynamic_metadata(
            &self.engine_namespace,
            &analytics,
            &effective_path,
            ctx.dynamic_metadata(),
        );
        Translation::Continue {
            response,
            dynamic_metadata,
        }
    }

    pub fn translate_response(
        &self,
        ctx: &mut ExecutionContext,
        result: &ExecutionResult<ResponseAction>,
        phase: PhaseKind,
    ) -> Translation {
        let mut c = Contributions {
            header_ops: Vec::new(),
            body: None,
            header_filter: None,
        };
        let mut status = None;
        for (outcome, action) in result.effective_actions() {
            match action {
                ResponseAction::Continue | ResponseAction::Respond(_) => {}
                ResponseAction::Modify(m) => {
                    c.header_ops.extend(m.header_ops.iter());
                    if m.body.is_some() {
                        c.body = m.body.as_ref();
                    }
                    if m.status.is_some() {
                        status = m.status;
                    }
                    if m.analytics_header_filter.is_some() {
                        c.header_filter = m.analytics_header_filter.as_ref();
                    }
                    self.fold_metadata(ctx, &outcome.name, &m.analytics, &m.dynamic_metadata);
                }
            }
        }

        // request-phase analytics carry forward; header copies only when asked for again
        let mut analytics = ctx.analytics().clone();
        if let Some(filter) = c.header_filter {
            if let Some(req_headers) = ctx.request_header_analytics() {
                analytics.insert(REQUEST_HEADERS_KEY.into(), req_headers.clone());
            }
            analytics.insert(
                RESPONSE_HEADERS_KEY.into(),
                filtered_headers(ctx.raw_response_headers(), filter),
            );
        }

        let path = ctx.request().path.clone();
        if let Some(ResponseAction::Respond(immediate)) = result.final_action.as_ref() {
            return self.immediate(ctx, immediate, analytics, path);
        }

        let mut merged = merge_header_ops(c.header_ops.iter().copied());
        if let Some(code) = status {
            merged.retain(|h| h.name() != ":status");
            merged.push(MergedHeader::Overwrite {
                name: ":status".into(),
                value: code.to_string(),
            });
        }

        let response = common_response(merged, c.body, phase);
        let dynamic_metadata =
            build_dynamic_metadata(&self.engine_namespace, &analytics, &path, ctx.dynamic_metadata());
        Translation::Continue {
            response,
            dynamic_metadata,
        }
    }

    /// Metadata-only continue, used when a phase runs no policies.
    pub fn passthrough(&self, ctx: &ExecutionContext) -> Translation {
        Translation::Continue {
            response: CommonResponse::default(),
            dynamic_metadata: build_dynamic_metadata(
                &self.engine_namespace,
                ctx.analytics(),
                &ctx.request().path,
                ctx.dynamic_metadata(),
            ),
        }
    }

    /// Status, headers (each an overwrite) and body go out verbatim.
    fn immediate(
        &self,
        ctx: &mut ExecutionContext,
        immediate: &ImmediateResponse,
        mut analytics: AnalyticsMap,
        path: String,
    ) -> Translation {
        self.fold_metadata(ctx, "immediate_response", &immediate.analytics, &immediate.dynamic_metadata);
        for (k, v) in &immediate.analytics {
            if !is_reserved_analytics_key(k) {
                analytics.insert(k.clone(), v.clone());
            }
        }

        let merged: Vec<MergedHeader> = immediate
            .headers
            .iter()
            .map(|(name, value)| MergedHeader::Overwrite {
                name: name.to_ascii_lowercase(),
                value: value.clone(),
            })
            .collect();

        let response = proto::ImmediateResponse {
            status: Some(HttpStatus {
                code: i32::from(immediate.status),
            }),
            headers: Some(to_header_mutation(&merged)),
            body: immediate.body.to_vec(),
            details: String::new(),
        };
        let dynamic_metadata =
            build_dynamic_metadata(&self.engine_namespace, &analytics, &path, ctx.dynamic_metadata());
        Translation::Immediate {
            response,
            dynamic_metadata,
        }
    }

    /// Fold one policy's analytics and dynamic metadata into the context.
    fn fold_metadata(
        &self,
        ctx: &mut ExecutionContext,
        policy: &str,
        analytics: &AnalyticsMap,
        dynamic: &DynamicMetadata,
    ) {
        for (k, v) in analytics {
            if is_reserved_analytics_key(k) {
                tracing::debug!(policy = %policy, key = %k, "ignoring reserved analytics key");
                continue;
            }
            ctx.merge_analytics(k.clone(), v.clone());
        }
        for (ns, map) in dynamic {
            for (k, v) in map {
                if ns == &self.engine_namespace && (k == ANALYTICS_DATA_KEY || k == PATH_KEY) {
                    tracing::warn!(policy = %policy, key = %k, "policy may not overwrite engine metadata");
                    continue;
                }
                ctx.merge_dynamic_metadata(ns, k.clone(), v.clone());
            }
        }
    }
}

fn is_reserved_analytics_key(k: &str) -> bool {
    k == REQUEST_HEADERS_KEY || k == RESPONSE_HEADERS_KEY
}

fn common_response(
    merged: Vec<MergedHeader>,
    body: Option<&bytes::Bytes>,
    phase: PhaseKind,
) -> CommonResponse {
    let mut response = CommonResponse::default();

    let merged = match body {
        Some(b) => with_content_length(merged, b.len()),
        None => merged,
    };
    if !merged.is_empty() {
        response.header_mutation = Some(to_header_mutation(&merged));
    }

    if let Some(b) = body {
        response.body_mutation = Some(BodyMutation {
            mutation: Some(body_mutation::Mutation::Body(b.to_vec())),
        });
        if phase == PhaseKind::Headers {
            response.status = ResponseStatus::ContinueAndReplace as i32;
        }
    }
    response
}
