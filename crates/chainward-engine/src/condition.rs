//! Execution-condition evaluation boundary.
//!
//! The kernel does not own an expression language. Embedders inject an
//! evaluator; the executor treats it as a pure function of the expression
//! and the current view.

use chainward_core::error::{ChainwardError, Result};
use chainward_core::{RequestView, ResponseView};

pub trait ConditionEvaluator: Send + Sync {
    fn evaluate_request(&self, expr: &str, req: &RequestView) -> Result<bool>;
    fn evaluate_response(&self, expr: &str, resp: &ResponseView) -> Result<bool>;
}

/// Understands the literals `true` and `false`; rejects everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralEvaluator;

impl LiteralEvaluator {
    fn literal(expr: &str) -> Result<bool> {
        match expr.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(ChainwardError::PolicyFailed(format!(
                "unsupported condition expression: {other}"
            ))),
        }
    }
}

impl ConditionEvaluator for LiteralEvaluator {
    fn evaluate_request(&self, expr: &str, _req: &RequestView) -> Result<bool> {
        Self::literal(expr)
    }

    fn evaluate_response(&self, expr: &str, _resp: &ResponseView) -> Result<bool> {
        Self::literal(expr)
    }
}
