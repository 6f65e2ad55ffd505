//! Top-level facade crate for chainward.
//!
//! Re-exports the policy contract and the kernel runtime so embedders can depend on a single crate.

pub mod core {
    pub use chainward_core::*;
}

pub mod engine {
    pub use chainward_engine::*;
}
