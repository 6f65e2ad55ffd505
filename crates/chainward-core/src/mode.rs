//! Processing modes declared by policies and aggregated per chain.

use serde::Deserialize;

/// How much of one phase a policy needs. Ordered by demand: `Skip < Process < Buffer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMode {
    #[default]
    Skip,
    Process,
    Buffer,
}

impl PhaseMode {
    pub fn is_skip(self) -> bool {
        self == PhaseMode::Skip
    }
}

/// Four independent axes, one per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessingMode {
    #[serde(default)]
    pub request_headers: PhaseMode,
    #[serde(default)]
    pub request_body: PhaseMode,
    #[serde(default)]
    pub response_headers: PhaseMode,
    #[serde(default)]
    pub response_body: PhaseMode,
}

impl ProcessingMode {
    /// Nothing wanted on any axis.
    pub const SKIP_ALL: ProcessingMode = ProcessingMode {
        request_headers: PhaseMode::Skip,
        request_body: PhaseMode::Skip,
        response_headers: PhaseMode::Skip,
        response_body: PhaseMode::Skip,
    };

    /// Headers in both directions, no bodies. The usual mode for header-only policies.
    pub const HEADERS_ONLY: ProcessingMode = ProcessingMode {
        request_headers: PhaseMode::Process,
        request_body: PhaseMode::Skip,
        response_headers: PhaseMode::Process,
        response_body: PhaseMode::Skip,
    };

    /// Request headers only.
    pub const REQUEST_HEADERS: ProcessingMode = ProcessingMode {
        request_headers: PhaseMode::Process,
        request_body: PhaseMode::Skip,
        response_headers: PhaseMode::Skip,
        response_body: PhaseMode::Skip,
    };

    /// Per axis, keep the most demanding value.
    pub fn merge(self, other: ProcessingMode) -> ProcessingMode {
        ProcessingMode {
            request_headers: self.request_headers.max(other.request_headers),
            request_body: self.request_body.max(other.request_body),
            response_headers: self.response_headers.max(other.response_headers),
            response_body: self.response_body.max(other.response_body),
        }
    }

    pub fn needs_request_phase(&self) -> bool {
        !self.request_headers.is_skip() || !self.request_body.is_skip()
    }

    pub fn needs_response_phase(&self) -> bool {
        !self.response_headers.is_skip() || !self.response_body.is_skip()
    }

    pub fn requires_request_body(&self) -> bool {
        !self.request_body.is_skip()
    }

    pub fn requires_response_body(&self) -> bool {
        !self.response_body.is_skip()
    }
}
