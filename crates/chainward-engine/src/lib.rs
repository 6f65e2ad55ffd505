//! chainward engine library entry.
//!
//! This crate is the policy-execution kernel behind a proxy's external
//! processing hook. It wires the route registry, chain executor and action
//! translator into a gRPC stream server, plus the config, control-plane sync
//! and admin surfaces around it. It is consumed by the binary (`main.rs`) and
//! by integration tests.

pub mod app_state;
pub mod builtin;
pub mod condition;
pub mod config;
pub mod control;
pub mod kernel;
pub mod logging;
pub mod obs;
pub mod ops;
pub mod proto;
pub mod router;
pub mod transport;
