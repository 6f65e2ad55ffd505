//! Chain executor.
//!
//! Runs a chain's enabled policies in order against one phase's view.
//! - A false condition marks the policy skipped; it is not invoked.
//! - An immediate response stops the chain; later policies never run.
//! - Errors and panics are recorded on that policy's outcome and the chain
//!   continues. No retries.
//! - Successful modifications are applied to the view before the next
//!   policy runs, so later policies see earlier effects.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use chainward_core::{
    Params, Policy, ProcessingMode, RequestAction, RequestView, ResponseAction, ResponseView,
};
use chainward_core::error::Result;

use crate::condition::ConditionEvaluator;

use super::chain::PolicyChain;
use super::translator::path::apply_request_path;

/// Outcome of one policy for one phase.
#[derive(Debug, Clone)]
pub struct PolicyOutcome<A> {
    pub name: String,
    pub version: String,
    pub action: Option<A>,
    /// Condition evaluated to false.
    pub skipped: bool,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl<A> PolicyOutcome<A> {
    /// Skipped and errored outcomes are excluded from translation alike.
    pub fn is_effective(&self) -> bool {
        !self.skipped && self.error.is_none()
    }
}

/// Ordered outcomes plus short-circuit state.
#[derive(Debug, Clone)]
pub struct ExecutionResult<A> {
    pub outcomes: Vec<PolicyOutcome<A>>,
    pub short_circuited: bool,
    /// The action that ended the chain, when short-circuited.
    pub final_action: Option<A>,
}

impl<A> Default for ExecutionResult<A> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
            short_circuited: false,
            final_action: None,
        }
    }
}

impl<A> ExecutionResult<A> {
    /// Actions of effective outcomes, in chain order.
    pub fn effective_actions(&self) -> impl Iterator<Item = (&PolicyOutcome<A>, &A)> {
        self.outcomes
            .iter()
            .filter(|o| o.is_effective())
            .filter_map(|o| o.action.as_ref().map(|a| (o, a)))
    }

    pub fn errored(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }
}

/// Phase-specific glue between the generic loop and the policy contract.
pub trait Phase {
    type View;
    type Action: Clone;

    const NAME: &'static str;

    fn participates(mode: &ProcessingMode) -> bool;
    fn condition(evaluator: &dyn ConditionEvaluator, expr: &str, view: &Self::View) -> Result<bool>;
    fn invoke(policy: &dyn Policy, view: &Self::View, params: &Params) -> Result<Self::Action>;
    fn apply(action: &Self::Action, view: &mut Self::View);
    fn is_short_circuit(action: &Self::Action) -> bool;
}

pub struct RequestPhase;
pub struct ResponsePhase;

impl Phase for RequestPhase {
    type View = RequestView;
    type Action = RequestAction;

    const NAME: &'static str = "request";

    fn participates(mode: &ProcessingMode) -> bool {
        mode.needs_request_phase()
    }

    fn condition(evaluator: &dyn ConditionEvaluator, expr: &str, view: &RequestView) -> Result<bool> {
        evaluator.evaluate_request(expr, view)
    }

    fn invoke(policy: &dyn Policy, view: &RequestView, params: &Params) -> Result<RequestAction> {
        policy.on_request(view, params)
    }

    fn apply(action: &RequestAction, view: &mut RequestView) {
        let RequestAction::Modify(m) = action else { return };
        for op in &m.header_ops {
            op.apply(&mut view.headers);
        }
        if let Some(body) = &m.body {
            view.body = Some(body.clone());
        }
        view.path = apply_request_path(&view.path, m);
    }

    fn is_short_circuit(action: &RequestAction) -> bool {
        matches!(action, RequestAction::Respond(_))
    }
}

impl Phase for ResponsePhase {
    type View = ResponseView;
    type Action = ResponseAction;

    const NAME: &'static str = "response";

    fn participates(mode: &ProcessingMode) -> bool {
        mode.needs_response_phase()
    }

    fn condition(evaluator: &dyn ConditionEvaluator, expr: &str, view: &ResponseView) -> Result<bool> {
        evaluator.evaluate_response(expr, view)
    }

    fn invoke(policy: &dyn Policy, view: &ResponseView, params: &Params) -> Result<ResponseAction> {
        policy.on_response(view, params)
    }

    fn apply(action: &ResponseAction, view: &mut ResponseView) {
        let ResponseAction::Modify(m) = action else { return };
        for op in &m.header_ops {
            op.apply(&mut view.headers);
        }
        if let Some(body) = &m.body {
            view.body = Some(body.clone());
        }
        if let Some(status) = m.status {
            view.status = status;
        }
    }

    fn is_short_circuit(action: &ResponseAction) -> bool {
        matches!(action, ResponseAction::Respond(_))
    }
}

/// Run every participating, enabled policy of `chain` for phase `P`.
pub fn execute<P: Phase>(
    chain: &PolicyChain,
    view: &mut P::View,
    evaluator: &dyn ConditionEvaluator,
) -> ExecutionResult<P::Action> {
    let mut result = ExecutionResult::default();
    let check_conditions = chain.has_execution_conditions();

    for entry in chain.enabled_entries() {
        if !P::participates(&entry.mode) {
            continue;
        }
        let spec = &entry.spec;
        let started = Instant::now();
        let mut outcome = PolicyOutcome {
            name: spec.name.clone(),
            version: spec.version.clone(),
            action: None,
            skipped: false,
            error: None,
            elapsed: Duration::ZERO,
        };

        if check_conditions && spec.has_condition() {
            let expr = spec.condition.as_deref().unwrap_or_default();
            match P::condition(evaluator, expr, view) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(phase = P::NAME, policy = %spec.name, "condition false; skipped");
                    outcome.skipped = true;
                    outcome.elapsed = started.elapsed();
                    result.outcomes.push(outcome);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(phase = P::NAME, policy = %spec.name, error = %e, "condition evaluation failed");
                    outcome.error = Some(e.to_string());
                    outcome.elapsed = started.elapsed();
                    result.outcomes.push(outcome);
                    continue;
                }
            }
        }

        let invoked = catch_unwind(AssertUnwindSafe(|| {
            P::invoke(entry.policy.as_ref(), view, &spec.params)
        }));
        outcome.elapsed = started.elapsed();

        match invoked {
            Ok(Ok(action)) => {
                if P::is_short_circuit(&action) {
                    tracing::debug!(phase = P::NAME, policy = %spec.name, "short-circuit");
                    result.short_circuited = true;
                    result.final_action = Some(action.clone());
                    outcome.action = Some(action);
                    result.outcomes.push(outcome);
                    break;
                }
                P::apply(&action, view);
                outcome.action = Some(action);
            }
            Ok(Err(e)) => {
                tracing::warn!(phase = P::NAME, policy = %spec.name, version = %spec.version, error = %e, "policy failed");
                outcome.error = Some(e.to_string());
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!(phase = P::NAME, policy = %spec.name, version = %spec.version, panic = %msg, "policy panicked");
                outcome.error = Some(format!("panic: {msg}"));
            }
        }
        result.outcomes.push(outcome);
    }

    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".into()
    }
}
