//! Lightweight in-process metrics (dependency-free).
//!
//! Metrics are stored as atomics keyed by sorted label sets and rendered in
//! Prometheus text format by the admin `/metrics` handler.

pub mod metrics;
