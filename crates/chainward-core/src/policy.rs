//! Policy contract.
//!
//! Policies are plain synchronous objects: the kernel calls them in chain
//! order on the stream's own task and passes the per-route parameters in on
//! every call, so one instance can serve every route that uses it.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::action::{RequestAction, ResponseAction};
use crate::error::Result;
use crate::mode::ProcessingMode;
use crate::view::{RequestView, ResponseView};

/// Raw per-route policy parameters.
pub type Params = Map<String, Value>;

/// Contract every policy plugin implements.
///
/// Phase callbacks run on a blocking-capable thread, never on an async
/// worker. They may block, but the proxy waits on the answer.
pub trait Policy: Send + Sync {
    /// Phases this policy needs.
    fn mode(&self) -> ProcessingMode;

    /// Called once when a chain is built, never per request.
    fn validate(&self, _params: &Params) -> Result<()> {
        Ok(())
    }

    fn on_request(&self, _req: &RequestView, _params: &Params) -> Result<RequestAction> {
        Ok(RequestAction::Continue)
    }

    fn on_response(&self, _resp: &ResponseView, _params: &Params) -> Result<ResponseAction> {
        Ok(ResponseAction::Continue)
    }
}

/// Declarative description of one chain entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySpec {
    pub name: String,
    pub version: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: Params,
    /// Execution condition; `None` means always run.
    #[serde(default)]
    pub condition: Option<String>,
}

impl PolicySpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            enabled: true,
            params: Params::new(),
            condition: None,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// `true` when a non-blank condition is attached.
    pub fn has_condition(&self) -> bool {
        self.condition.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

fn default_enabled() -> bool {
    true
}
