//! chainward core: the policy contract shared by the kernel and by policy plugins.
//!
//! This crate defines the request/response views a policy sees, the actions a
//! policy may return, processing modes, header primitives, and the error
//! surface. It carries no transport or runtime dependencies so plugins can be
//! built against it without pulling in the gRPC stack.
//!
//! # Guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here.
//! All fallible paths surface as `ChainwardError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod action;
pub mod error;
pub mod headers;
pub mod mode;
pub mod policy;
pub mod route;
pub mod view;

/// Shared result type.
pub use error::{ChainwardError, ErrorCode, Result};

pub use action::{
    AnalyticsHeaderFilter, AnalyticsMap, DownstreamResponseModifications, DynamicMetadata,
    ImmediateResponse, RequestAction, ResponseAction, UpstreamRequestModifications,
};
pub use headers::{HeaderOp, Headers};
pub use mode::{PhaseMode, ProcessingMode};
pub use policy::{Params, Policy, PolicySpec};
pub use route::RouteMetadata;
pub use view::{RequestView, ResponseView};
