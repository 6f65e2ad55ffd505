//! Policy-execution kernel.
//!
//! Route registry, chain building, per-request context, chain execution
//! and action translation. Nothing here knows about streams or sockets;
//! the transport layer drives it one phase at a time.

pub mod attributes;
pub mod chain;
pub mod context;
pub mod executor;
pub mod registry;
pub mod translator;

pub use chain::{ChainEntry, PolicyChain, PolicyRegistry};
pub use context::ExecutionContext;
pub use executor::{ExecutionResult, PolicyOutcome};
pub use registry::Kernel;
pub use translator::{PhaseKind, Translation, Translator};
