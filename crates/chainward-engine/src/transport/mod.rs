//! Proxy-facing transport: the ext_proc gRPC stream and its per-stream
//! state machine.

pub mod extproc;
pub mod session;

pub use extproc::{serve_tcp, serve_uds, ExtProcService};
pub use session::{StreamPhase, StreamSession};
