//! Shared error type across chainward crates.

use thiserror::Error;

/// Stable error classes, used as log fields and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed configuration or an unbuildable chain.
    Config,
    /// A policy invocation failed.
    Policy,
    /// A result could not be translated into a proxy message.
    Translation,
    /// The proxy broke the phase protocol.
    Protocol,
    /// Internal server error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Config => "CONFIG",
            ErrorCode::Policy => "POLICY",
            ErrorCode::Translation => "TRANSLATION",
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ChainwardError>;

/// Unified error type used by core, policies and the engine.
#[derive(Debug, Error)]
pub enum ChainwardError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("policy failed: {0}")]
    PolicyFailed(String),
    #[error("translation failed: {0}")]
    Translation(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ChainwardError {
    /// Map an error onto its stable class.
    pub fn code(&self) -> ErrorCode {
        match self {
            ChainwardError::Config(_) | ChainwardError::UnsupportedVersion => ErrorCode::Config,
            ChainwardError::PolicyFailed(_) => ErrorCode::Policy,
            ChainwardError::Translation(_) => ErrorCode::Translation,
            ChainwardError::Protocol(_) => ErrorCode::Protocol,
            ChainwardError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Shorthand for policies reporting a failure.
    pub fn policy(msg: impl Into<String>) -> Self {
        ChainwardError::PolicyFailed(msg.into())
    }
}
