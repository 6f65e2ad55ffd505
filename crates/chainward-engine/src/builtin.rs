//! Policies shipped with the engine binary.
//!
//! Embedders register their own policies on a `PolicyRegistry`; these two
//! cover static header rewriting and fixed responses so a route table is
//! useful without any custom code.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use chainward_core::error::{ChainwardError, Result};
use chainward_core::{
    DownstreamResponseModifications, ImmediateResponse, Params, Policy, ProcessingMode,
    RequestAction, RequestView, ResponseAction, ResponseView, UpstreamRequestModifications,
};

use crate::kernel::PolicyRegistry;

pub const HEADER_REWRITE: &str = "header-rewrite";
pub const DIRECT_RESPONSE: &str = "direct-response";
pub const BUILTIN_VERSION: &str = "v1";

pub fn register_builtins(registry: &PolicyRegistry) {
    registry.register(HEADER_REWRITE, BUILTIN_VERSION, Arc::new(HeaderRewrite));
    registry.register(DIRECT_RESPONSE, BUILTIN_VERSION, Arc::new(DirectResponse));
}

fn parse<T: DeserializeOwned>(policy: &str, params: &Params) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| ChainwardError::policy(format!("{policy}: invalid params: {e}")))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeaderEdits {
    #[serde(default)]
    set: BTreeMap<String, String>,
    #[serde(default)]
    append: BTreeMap<String, String>,
    #[serde(default)]
    remove: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeaderRewriteParams {
    #[serde(default)]
    request: HeaderEdits,
    #[serde(default)]
    response: HeaderEdits,
}

/// Static header edits in both directions. Removes apply first, then sets,
/// then appends.
pub struct HeaderRewrite;

impl Policy for HeaderRewrite {
    fn mode(&self) -> ProcessingMode {
        ProcessingMode::HEADERS_ONLY
    }

    fn validate(&self, params: &Params) -> Result<()> {
        parse::<HeaderRewriteParams>(HEADER_REWRITE, params).map(|_| ())
    }

    fn on_request(&self, _req: &RequestView, params: &Params) -> Result<RequestAction> {
        let p: HeaderRewriteParams = parse(HEADER_REWRITE, params)?;
        let edits = p.request;
        if edits.set.is_empty() && edits.append.is_empty() && edits.remove.is_empty() {
            return Ok(RequestAction::Continue);
        }
        let mut m = UpstreamRequestModifications::new();
        for name in &edits.remove {
            m = m.remove_header(name);
        }
        for (name, value) in edits.set {
            m = m.set_header(&name, value);
        }
        for (name, value) in edits.append {
            m = m.append_header(&name, value);
        }
        Ok(RequestAction::Modify(m))
    }

    fn on_response(&self, _resp: &ResponseView, params: &Params) -> Result<ResponseAction> {
        let p: HeaderRewriteParams = parse(HEADER_REWRITE, params)?;
        let edits = p.response;
        if edits.set.is_empty() && edits.append.is_empty() && edits.remove.is_empty() {
            return Ok(ResponseAction::Continue);
        }
        let mut m = DownstreamResponseModifications::new();
        for name in &edits.remove {
            m = m.remove_header(name);
        }
        for (name, value) in edits.set {
            m = m.set_header(&name, value);
        }
        for (name, value) in edits.append {
            m = m.append_header(&name, value);
        }
        Ok(ResponseAction::Modify(m))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DirectResponseParams {
    status: u16,
    #[serde(default)]
    body: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

/// Answers the request itself with a fixed status, headers and body.
pub struct DirectResponse;

impl Policy for DirectResponse {
    fn mode(&self) -> ProcessingMode {
        ProcessingMode::REQUEST_HEADERS
    }

    fn validate(&self, params: &Params) -> Result<()> {
        let p: DirectResponseParams = parse(DIRECT_RESPONSE, params)?;
        if !(100..=599).contains(&p.status) {
            return Err(ChainwardError::policy(format!(
                "{DIRECT_RESPONSE}: status {} out of range",
                p.status
            )));
        }
        Ok(())
    }

    fn on_request(&self, _req: &RequestView, params: &Params) -> Result<RequestAction> {
        let p: DirectResponseParams = parse(DIRECT_RESPONSE, params)?;
        let mut resp = ImmediateResponse::new(p.status).body(p.body);
        for (name, value) in p.headers {
            resp = resp.header(&name, value);
        }
        Ok(RequestAction::Respond(resp))
    }
}
